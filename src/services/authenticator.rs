// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! OAuth token lifecycle against the Volvo ID provider.
//!
//! Handles:
//! - The one-time authorization code + PKCE exchange (bootstrap command)
//! - Proactive refresh when the access token is within a minute of expiry
//! - Refresh on demand after the vehicle API answers 401
//! - Persistence of every new token through the [`CredentialStore`]
//!
//! All state lives behind one async mutex, so at most one refresh is in
//! flight and concurrent callers wait for its result instead of spending the
//! refresh token a second time.

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::models::token::OAuthErrorBody;
use crate::models::{PollRecorder, PollResult, TokenRecord, TokenResponse};
use crate::services::credential_store::{CredentialStore, StoreError};
use crate::services::pkce::{self, PkceChallenge};
use crate::services::retry::{self, RetryAction, RetryPolicy};
use chrono::{Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{watch, Mutex};

pub const DEFAULT_AUTHORIZE_URL: &str = "https://volvoid.eu.volvocars.com/as/authorization.oauth2";
pub const DEFAULT_TOKEN_URL: &str = "https://volvoid.eu.volvocars.com/as/token.oauth2";

/// Refresh this long before the access token actually expires.
const TOKEN_REFRESH_MARGIN_SECS: i64 = 60;

/// Family label used for token endpoint calls in the HTTP metrics.
pub const OAUTH_FAMILY: &str = "oauth";

/// Authentication state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthPhase {
    Unauthenticated,
    Authorizing,
    Authenticated,
    Refreshing,
}

impl AuthPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthPhase::Unauthenticated => "unauthenticated",
            AuthPhase::Authorizing => "authorizing",
            AuthPhase::Authenticated => "authenticated",
            AuthPhase::Refreshing => "refreshing",
        }
    }

    /// Value exported as `volvo_auth_state`.
    pub fn gauge_value(&self) -> f64 {
        match self {
            AuthPhase::Unauthenticated => 0.0,
            AuthPhase::Authorizing => 1.0,
            AuthPhase::Authenticated => 2.0,
            AuthPhase::Refreshing => 3.0,
        }
    }
}

/// Identity provider endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthEndpoints {
    pub authorize_url: String,
    pub token_url: String,
}

impl Default for OAuthEndpoints {
    fn default() -> Self {
        Self {
            authorize_url: DEFAULT_AUTHORIZE_URL.to_string(),
            token_url: DEFAULT_TOKEN_URL.to_string(),
        }
    }
}

#[derive(Default)]
struct AuthState {
    /// In-memory working copy of the token
    record: Option<TokenRecord>,
    /// Refresh token the provider has rejected; never sent again
    rejected_refresh_token: Option<String>,
    /// Authorization attempt started by `begin_authorization`
    pending: Option<PkceChallenge>,
}

/// Produces valid access tokens and keeps them persisted.
pub struct TokenAuthenticator {
    http: reqwest::Client,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    scope: String,
    endpoints: OAuthEndpoints,
    store: Arc<dyn CredentialStore>,
    state: Mutex<AuthState>,
    phase: watch::Sender<AuthPhase>,
    retry_policy: RetryPolicy,
    recorder: Option<Arc<dyn PollRecorder>>,
}

impl TokenAuthenticator {
    pub fn new(config: &Config, store: Arc<dyn CredentialStore>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()
            .map_err(|e| AppError::Internal(anyhow::anyhow!("HTTP client build failed: {}", e)))?;

        let (phase, _) = watch::channel(AuthPhase::Unauthenticated);

        Ok(Self {
            http,
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            redirect_uri: config.redirect_uri.clone(),
            scope: config.scope_string(),
            endpoints: OAuthEndpoints::default(),
            store,
            state: Mutex::new(AuthState::default()),
            phase,
            retry_policy: RetryPolicy::default(),
            recorder: None,
        })
    }

    pub fn with_endpoints(mut self, endpoints: OAuthEndpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Record token endpoint calls alongside the vehicle API calls.
    pub fn with_recorder(mut self, recorder: Arc<dyn PollRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn phase(&self) -> AuthPhase {
        *self.phase.borrow()
    }

    fn set_phase(&self, phase: AuthPhase) {
        let previous = self.phase.send_replace(phase);
        if previous != phase {
            tracing::debug!(from = previous.as_str(), to = phase.as_str(), "Auth state changed");
        }
    }

    // ─── Token Management ────────────────────────────────────────────────────

    /// Return an access token valid for at least the refresh margin.
    ///
    /// Makes no network call while the held token is fresh. Loads from the
    /// store on first use and refreshes under the state lock when needed.
    pub async fn ensure_authenticated(&self) -> Result<String> {
        let mut state = self.state.lock().await;
        let record = self.current_or_load(&mut state)?;

        let margin = Duration::seconds(TOKEN_REFRESH_MARGIN_SECS);
        if !record.expires_within(margin, Utc::now()) {
            self.set_phase(AuthPhase::Authenticated);
            return Ok(record.access_token);
        }

        tracing::info!(expires_at = %record.expires_at, "Access token expiring, refreshing");
        self.refresh_locked(&mut state, record, true).await
    }

    /// Refresh after the provider rejected `stale_access_token` with 401.
    ///
    /// If another caller already replaced that token, the replacement is
    /// returned without a second refresh.
    pub async fn refresh_after_unauthorized(&self, stale_access_token: &str) -> Result<String> {
        let mut state = self.state.lock().await;
        let record = self.current_or_load(&mut state)?;

        let margin = Duration::seconds(TOKEN_REFRESH_MARGIN_SECS);
        if record.access_token != stale_access_token && !record.expires_within(margin, Utc::now())
        {
            tracing::debug!("Token already refreshed by another caller");
            return Ok(record.access_token);
        }

        tracing::info!("Access token rejected by provider, refreshing");
        self.refresh_locked(&mut state, record, false).await
    }

    /// In-memory record, or the stored one (falling back to the backup).
    fn current_or_load(&self, state: &mut AuthState) -> Result<TokenRecord> {
        if let Some(record) = &state.record {
            return Ok(record.clone());
        }

        let record = match self.store.load() {
            Ok(record) => record,
            Err(StoreError::NotFound) => {
                self.set_phase(AuthPhase::Unauthenticated);
                return Err(AppError::AuthenticationRequired(
                    "no stored token; run the bootstrap command".to_string(),
                ));
            }
            Err(StoreError::Corrupt(reason)) => {
                tracing::warn!(%reason, "Stored token is corrupt, trying backup");
                match self.store.restore_backup() {
                    Ok(record) => record,
                    Err(e) => {
                        tracing::error!(error = %e, "Backup token unavailable");
                        self.set_phase(AuthPhase::Unauthenticated);
                        return Err(AppError::AuthenticationRequired(
                            "stored token is corrupt and no usable backup exists".to_string(),
                        ));
                    }
                }
            }
            Err(StoreError::Io(e)) => return Err(AppError::Storage(e.to_string())),
        };

        if state.rejected_refresh_token.as_deref() == Some(record.refresh_token.as_str()) {
            self.set_phase(AuthPhase::Unauthenticated);
            return Err(AppError::ReauthenticationRequired);
        }

        tracing::info!(expires_at = %record.expires_at, "Loaded stored token");
        state.rejected_refresh_token = None;
        state.record = Some(record.clone());
        Ok(record)
    }

    /// Exchange the refresh token. Caller holds the state lock.
    ///
    /// On a transient failure the state is left untouched; if `allow_current`
    /// is set and the old access token has not actually expired yet, it is
    /// returned so the cycle can still run.
    async fn refresh_locked(
        &self,
        state: &mut AuthState,
        current: TokenRecord,
        allow_current: bool,
    ) -> Result<String> {
        self.set_phase(AuthPhase::Refreshing);

        let params = [
            ("grant_type", "refresh_token"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("refresh_token", current.refresh_token.as_str()),
        ];

        match self.token_request(&params).await {
            Ok(response) => {
                let Some(record) = response.into_record(Some(&current.refresh_token), Utc::now())
                else {
                    self.set_phase(AuthPhase::Authenticated);
                    return Err(AppError::Internal(anyhow::anyhow!(
                        "Token response without refresh token"
                    )));
                };

                state.record = Some(record.clone());
                self.set_phase(AuthPhase::Authenticated);
                tracing::info!(expires_at = %record.expires_at, "Token refreshed");
                self.persist(&record)?;
                Ok(record.access_token)
            }
            Err(AppError::Provider { status, body }) if status == 400 || status == 401 => {
                let reason = serde_json::from_str::<OAuthErrorBody>(&body)
                    .map(|b| b.error)
                    .unwrap_or_else(|_| "unknown".to_string());
                tracing::error!(
                    status,
                    %reason,
                    "Refresh token rejected; run the bootstrap command again"
                );
                state.record = None;
                state.rejected_refresh_token = Some(current.refresh_token);
                self.set_phase(AuthPhase::Unauthenticated);
                Err(AppError::ReauthenticationRequired)
            }
            Err(e) => {
                self.set_phase(AuthPhase::Authenticated);
                if allow_current && Utc::now() < current.expires_at {
                    tracing::warn!(error = %e, "Token refresh failed, using current token until it expires");
                    return Ok(current.access_token);
                }
                tracing::error!(error = %e, "Token refresh failed");
                Err(e)
            }
        }
    }

    /// Save a new record; one retry on I/O failure before giving up.
    fn persist(&self, record: &TokenRecord) -> Result<()> {
        match self.store.save(record) {
            Ok(()) => Ok(()),
            Err(StoreError::Io(first)) => {
                tracing::warn!(error = %first, "Token save failed, retrying once");
                self.store.save(record).map_err(|e| {
                    tracing::error!(error = %e, "Token could not be persisted");
                    AppError::Storage(e.to_string())
                })
            }
            Err(e) => Err(AppError::Storage(e.to_string())),
        }
    }

    // ─── Interactive Authorization ───────────────────────────────────────────

    /// Start an authorization attempt and return the URL to open.
    pub async fn begin_authorization(&self) -> Result<String> {
        let challenge = PkceChallenge::generate()?;
        let url = pkce::build_auth_url(
            &self.endpoints.authorize_url,
            &self.client_id,
            &self.redirect_uri,
            &self.scope,
            &challenge,
        );

        self.state.lock().await.pending = Some(challenge);
        self.set_phase(AuthPhase::Authorizing);
        Ok(url)
    }

    /// Finish the attempt with the pasted callback URL (or bare code).
    pub async fn complete_authorization(&self, callback: &str) -> Result<TokenRecord> {
        let mut state = self.state.lock().await;
        let pending = state.pending.take().ok_or_else(|| {
            AppError::AuthenticationRequired("no authorization in progress".to_string())
        })?;

        let params = match pkce::parse_callback(callback) {
            Ok(p) => p,
            Err(e) => {
                self.set_phase(AuthPhase::Unauthenticated);
                return Err(e);
            }
        };

        match params.state.as_deref() {
            Some(returned) if !pending.state_matches(returned) => {
                self.set_phase(AuthPhase::Unauthenticated);
                return Err(AppError::AuthenticationRequired(
                    "state mismatch in callback".to_string(),
                ));
            }
            Some(_) => {}
            None => tracing::warn!("Callback has no state parameter; accepting bare code"),
        }

        let form = [
            ("grant_type", "authorization_code"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("code", params.code.as_str()),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("code_verifier", pending.verifier.as_str()),
        ];

        let response = match self.token_request(&form).await {
            Ok(r) => r,
            Err(AppError::Provider { status, .. }) => {
                self.set_phase(AuthPhase::Unauthenticated);
                return Err(AppError::AuthenticationRequired(format!(
                    "authorization code rejected (HTTP {})",
                    status
                )));
            }
            Err(e) => {
                self.set_phase(AuthPhase::Unauthenticated);
                return Err(e);
            }
        };

        let record = response.into_record(None, Utc::now()).ok_or_else(|| {
            AppError::AuthenticationRequired("token response has no refresh token".to_string())
        })?;

        state.record = Some(record.clone());
        state.rejected_refresh_token = None;
        self.set_phase(AuthPhase::Authenticated);
        self.persist(&record)?;
        tracing::info!(expires_at = %record.expires_at, "Authorization complete");
        Ok(record)
    }

    // ─── Token Endpoint ──────────────────────────────────────────────────────

    /// POST a form to the token endpoint with bounded retries.
    ///
    /// 4xx responses come back as `AppError::Provider` without retrying.
    async fn token_request(&self, form: &[(&str, &str)]) -> Result<TokenResponse> {
        let route = reqwest::Url::parse(&self.endpoints.token_url)
            .map(|u| u.path().to_string())
            .unwrap_or_else(|_| "/token".to_string());

        retry::retry_with_backoff(&self.retry_policy, |attempt| {
            let route = route.clone();
            async move {
                let started = Instant::now();
                let response = match self
                    .http
                    .post(&self.endpoints.token_url)
                    .header(reqwest::header::ACCEPT, "application/json")
                    .form(form)
                    .send()
                    .await
                {
                    Ok(r) => r,
                    Err(e) => {
                        self.record(PollResult::transport_failure(
                            OAUTH_FAMILY,
                            "POST",
                            route,
                            started.elapsed(),
                        ));
                        let retryable = retry::is_retryable_reqwest_error(&e);
                        let err = AppError::Transport(e.without_url().to_string());
                        return if retryable {
                            RetryAction::Retry(err)
                        } else {
                            RetryAction::Fail(err)
                        };
                    }
                };

                let status = response.status().as_u16();
                self.record(PollResult::from_status(
                    OAUTH_FAMILY,
                    "POST",
                    route,
                    status,
                    started.elapsed(),
                ));

                if response.status().is_success() {
                    return match response.json::<TokenResponse>().await {
                        Ok(token) => RetryAction::Success(token),
                        Err(e) => RetryAction::Fail(AppError::Decode(format!(
                            "token response: {}",
                            e.without_url()
                        ))),
                    };
                }

                let body = response.text().await.unwrap_or_default();
                let body: String = body.chars().take(200).collect();
                tracing::warn!(status, attempt, "Token endpoint returned error");
                retry::classify(AppError::Provider { status, body })
            }
        })
        .await
    }

    fn record(&self, result: PollResult) {
        if let Some(recorder) = &self.recorder {
            recorder.record(&result);
        }
    }
}
