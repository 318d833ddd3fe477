// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Volvo Cars API client.
//!
//! Handles:
//! - Fetching every endpoint of an API family for one VIN
//! - One refresh-and-retry when the provider answers 401
//! - Bounded backoff on 429, 5xx and transport errors
//! - A [`PollResult`] for every HTTP attempt, labeled by route template

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::models::family::VEHICLE_LIST_ENDPOINT;
use crate::models::{ApiFamily, ApiFamilySpec, PollRecorder, PollResult};
use crate::services::authenticator::TokenAuthenticator;
use crate::services::retry::{self, RetryAction, RetryPolicy};
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};
use std::time::Instant;

/// Bytes of a response body included in debug logs.
const BODY_PREVIEW_BYTES: usize = 2000;

/// A path segment that looks like a VIN.
static VIN_SEGMENT: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[A-HJ-NPR-Z0-9]{17}$").ok());

/// Replace VIN-like and numeric path segments with placeholders and drop
/// any query string, so route labels stay bounded.
pub fn sanitize_route(path: &str) -> String {
    let path = path.split(['?', '#']).next().unwrap_or_default();
    path.split('/')
        .map(|segment| {
            if !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit()) {
                "{id}"
            } else if VIN_SEGMENT.as_ref().is_some_and(|re| re.is_match(segment)) {
                "{vin}"
            } else {
                segment
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Raw payloads of one family, keyed by endpoint name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FamilyResponse {
    pub family: Option<ApiFamily>,
    /// Unwrapped bodies of the endpoints that answered
    pub endpoints: BTreeMap<&'static str, Value>,
    /// Endpoints that failed after retries
    pub failed: Vec<&'static str>,
}

impl FamilyResponse {
    pub fn new(family: ApiFamily) -> Self {
        Self {
            family: Some(family),
            ..Self::default()
        }
    }

    pub fn endpoint(&self, name: &str) -> Option<&Value> {
        self.endpoints.get(name)
    }
}

/// HTTP client for the vehicle API families.
pub struct VehicleApiClient {
    http: reqwest::Client,
    api_key: String,
    authenticator: Arc<TokenAuthenticator>,
    recorder: Arc<dyn PollRecorder>,
    retry_policy: RetryPolicy,
}

impl VehicleApiClient {
    pub fn new(
        config: &Config,
        authenticator: Arc<TokenAuthenticator>,
        recorder: Arc<dyn PollRecorder>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()
            .map_err(|e| AppError::Internal(anyhow::anyhow!("HTTP client build failed: {}", e)))?;

        Ok(Self {
            http,
            api_key: config.api_key.clone(),
            authenticator,
            recorder,
            retry_policy: RetryPolicy::default(),
        })
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Fetch every endpoint of `spec` for `vin`.
    ///
    /// Endpoints are isolated from each other: the family only fails when
    /// none of them answered, or when authentication failed outright.
    pub async fn fetch(&self, spec: &ApiFamilySpec, vin: &str) -> Result<FamilyResponse> {
        let family = spec.family.name();
        let mut response = FamilyResponse::new(spec.family);
        let mut last_error = None;

        for endpoint in spec.endpoints {
            let url = spec.url_for(endpoint, vin);
            let route = sanitize_route(&spec.route_template(endpoint));

            match self.get_json(family, &url, &route, endpoint.name).await {
                Ok(body) => {
                    response
                        .endpoints
                        .insert(endpoint.name, spec.response_shape.unwrap_body(body));
                }
                Err(e @ AppError::AuthenticationFailed { .. })
                | Err(e @ AppError::AuthenticationRequired(_))
                | Err(e @ AppError::ReauthenticationRequired) => {
                    tracing::warn!(family, endpoint = endpoint.name, error = %e, "Authentication failed, skipping family");
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!(
                        family,
                        endpoint = endpoint.name,
                        kind = e.kind().as_str(),
                        error = %e,
                        "Endpoint fetch failed"
                    );
                    response.failed.push(endpoint.name);
                    last_error = Some(e);
                }
            }
        }

        if response.endpoints.is_empty() {
            return Err(AppError::FamilyFetchFailed {
                family: family.to_string(),
                reason: last_error
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "no endpoints configured".to_string()),
            });
        }

        tracing::debug!(
            family,
            ok = response.endpoints.len(),
            failed = response.failed.len(),
            "Family fetched"
        );
        Ok(response)
    }

    /// VINs on the account, from the Connected Vehicle family.
    pub async fn list_vehicles(&self, connected: &ApiFamilySpec) -> Result<Vec<String>> {
        let url = format!("{}{}", connected.base_url, VEHICLE_LIST_ENDPOINT.path);
        let route = sanitize_route(&connected.route_template(&VEHICLE_LIST_ENDPOINT));
        let body = self
            .get_json(
                connected.family.name(),
                &url,
                &route,
                VEHICLE_LIST_ENDPOINT.name,
            )
            .await?;

        let vins = body
            .get("data")
            .and_then(Value::as_array)
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|v| v.get("vin").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        Ok(vins)
    }

    /// GET with the 401 refresh-and-retry-once policy around the backoff loop.
    async fn get_json(&self, family: &str, url: &str, route: &str, operation: &str) -> Result<Value> {
        let mut token = self.authenticator.ensure_authenticated().await?;
        let mut refreshed = false;

        loop {
            let result = retry::retry_with_backoff(&self.retry_policy, |attempt| {
                self.attempt(family, url, route, operation, &token, attempt)
            })
            .await;

            match result {
                Ok(body) => return Ok(body),
                Err(AppError::Unauthorized) if !refreshed => {
                    tracing::info!(family, route, "Unauthorized, refreshing token and retrying");
                    token = self.authenticator.refresh_after_unauthorized(&token).await?;
                    refreshed = true;
                }
                Err(AppError::Unauthorized) => {
                    return Err(AppError::AuthenticationFailed {
                        family: family.to_string(),
                    });
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// One HTTP attempt, classified for the retry loop.
    async fn attempt(
        &self,
        family: &str,
        url: &str,
        route: &str,
        operation: &str,
        token: &str,
        attempt: u32,
    ) -> RetryAction<Value> {
        let started = Instant::now();
        let sent = self
            .http
            .get(url)
            .bearer_auth(token)
            .header("vcc-api-key", &self.api_key)
            .header("vcc-api-operationId", format!("exporter-poll-{}", operation))
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await;

        let response = match sent {
            Ok(r) => r,
            Err(e) => {
                self.recorder.record(&PollResult::transport_failure(
                    family,
                    "GET",
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
        let body = response.text().await;
        let result = PollResult::from_status(family, "GET", route, status, started.elapsed());
        self.recorder.record(&result);

        tracing::debug!(
            family,
            route,
            status,
            attempt,
            duration_ms = result.duration.as_millis() as u64,
            "HTTP GET"
        );

        let body = match body {
            Ok(b) => b,
            Err(e) => {
                return RetryAction::Retry(AppError::Transport(e.without_url().to_string()));
            }
        };

        if tracing::enabled!(tracing::Level::DEBUG) {
            let preview: String = body.chars().take(BODY_PREVIEW_BYTES).collect();
            tracing::debug!(route, status, body = %preview, "Response body");
        }

        if result.success {
            return match serde_json::from_str(&body) {
                Ok(value) => RetryAction::Success(value),
                Err(e) => RetryAction::Fail(AppError::Decode(format!("{}: {}", route, e))),
            };
        }

        if status == 401 {
            return RetryAction::Fail(AppError::Unauthorized);
        }

        let body: String = body.chars().take(200).collect();
        retry::classify(AppError::Provider { status, body })
    }
}
