// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application error types shared by the credential, polling and mapping layers.

use serde::Serialize;
use std::fmt;

/// Application error type.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    /// No usable token is available; the interactive bootstrap has to run.
    #[error("Authentication required: {0}")]
    AuthenticationRequired(String),

    /// The refresh token was rejected by the identity provider.
    #[error("Re-authentication required: refresh token was rejected")]
    ReauthenticationRequired,

    /// A family call was still unauthorized after one refresh-and-retry.
    #[error("Authentication failed for {family}")]
    AuthenticationFailed { family: String },

    /// The provider answered 401 to a single request.
    #[error("Access token rejected by provider")]
    Unauthorized,

    #[error("Fetch failed for {family}: {reason}")]
    FamilyFetchFailed { family: String, reason: String },

    #[error("Provider error: HTTP {status}: {body}")]
    Provider { status: u16, body: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Response decode error: {0}")]
    Decode(String),

    #[error("Credential storage error: {0}")]
    Storage(String),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// Low-cardinality classification used in logs and poll results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Config,
    AuthenticationRequired,
    ReauthenticationRequired,
    Unauthorized,
    RateLimited,
    Server,
    Client,
    Transport,
    Decode,
    Storage,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Config => "config",
            ErrorKind::AuthenticationRequired => "authentication_required",
            ErrorKind::ReauthenticationRequired => "reauthentication_required",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::Server => "server",
            ErrorKind::Client => "client",
            ErrorKind::Transport => "transport",
            ErrorKind::Decode => "decode",
            ErrorKind::Storage => "storage",
            ErrorKind::Internal => "internal",
        }
    }

    /// Classify an HTTP status code.
    pub fn from_status(status: u16) -> Option<Self> {
        match status {
            200..=299 => None,
            401 => Some(ErrorKind::Unauthorized),
            429 => Some(ErrorKind::RateLimited),
            500..=599 => Some(ErrorKind::Server),
            _ => Some(ErrorKind::Client),
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::ConfigInvalid(_) => ErrorKind::Config,
            AppError::AuthenticationRequired(_) => ErrorKind::AuthenticationRequired,
            AppError::ReauthenticationRequired => ErrorKind::ReauthenticationRequired,
            AppError::AuthenticationFailed { .. } | AppError::Unauthorized => {
                ErrorKind::Unauthorized
            }
            AppError::FamilyFetchFailed { .. } => ErrorKind::Client,
            AppError::Provider { status, .. } => {
                ErrorKind::from_status(*status).unwrap_or(ErrorKind::Client)
            }
            AppError::Transport(_) => ErrorKind::Transport,
            AppError::Decode(_) => ErrorKind::Decode,
            AppError::Storage(_) => ErrorKind::Storage,
            AppError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether the failure should be retried in place with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::RateLimited | ErrorKind::Server | ErrorKind::Transport
        )
    }

    /// Errors that end the current poll cycle before any family is fetched.
    pub fn is_auth_error(&self) -> bool {
        matches!(
            self,
            AppError::AuthenticationRequired(_) | AppError::ReauthenticationRequired
        )
    }
}

impl From<crate::config::ConfigError> for AppError {
    fn from(err: crate::config::ConfigError) -> Self {
        AppError::ConfigInvalid(err.to_string())
    }
}

/// Result type alias used across the crate.
pub type Result<T> = std::result::Result<T, AppError>;
