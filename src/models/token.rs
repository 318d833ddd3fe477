// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! OAuth token record persisted between runs.

use chrono::serde::ts_seconds;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Longest access token lifetime accepted from the provider.
pub const MAX_TOKEN_LIFETIME_SECS: i64 = 365 * 24 * 3600;

/// The current credential set.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    pub access_token: String,
    pub refresh_token: String,
    /// When the access token expires (unix seconds on disk)
    #[serde(with = "ts_seconds")]
    pub expires_at: DateTime<Utc>,
    pub token_type: String,
}

impl std::fmt::Debug for TokenRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenRecord")
            .field("access_token", &"***")
            .field("refresh_token", &"***")
            .field("expires_at", &self.expires_at)
            .field("token_type", &self.token_type)
            .finish()
    }
}

impl TokenRecord {
    /// Schema check applied to anything read back from disk.
    pub fn validate(&self) -> Result<(), String> {
        if self.access_token.trim().is_empty() {
            return Err("access_token is empty".to_string());
        }
        if self.refresh_token.trim().is_empty() {
            return Err("refresh_token is empty".to_string());
        }
        if self.token_type.trim().is_empty() {
            return Err("token_type is empty".to_string());
        }
        Ok(())
    }

    /// True when the access token expires within `margin` of `now`.
    pub fn expires_within(&self, margin: Duration, now: DateTime<Utc>) -> bool {
        now + margin >= self.expires_at
    }
}

/// Token endpoint response for both the code and refresh grants.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    /// Some providers omit a new refresh token on refresh.
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub expires_in: i64,
    #[serde(default = "default_token_type")]
    pub token_type: String,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl TokenResponse {
    /// Build a record, keeping `previous_refresh` when no new refresh token was issued.
    pub fn into_record(
        self,
        previous_refresh: Option<&str>,
        now: DateTime<Utc>,
    ) -> Option<TokenRecord> {
        let refresh_token = self
            .refresh_token
            .filter(|t| !t.is_empty())
            .or_else(|| previous_refresh.map(str::to_string))?;

        Some(TokenRecord {
            access_token: self.access_token,
            refresh_token,
            expires_at: now
                + Duration::seconds(self.expires_in.clamp(0, MAX_TOKEN_LIFETIME_SECS)),
            token_type: self.token_type,
        })
    }
}

/// OAuth error body (`{"error": "invalid_grant", ...}`).
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthErrorBody {
    pub error: String,
    #[serde(default)]
    pub error_description: Option<String>,
}
