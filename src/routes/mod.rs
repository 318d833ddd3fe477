// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! HTTP route handlers.

pub mod metrics;

use crate::services::registry::LAST_SUCCESSFUL_POLL;
use crate::time_utils::format_utc_rfc3339;
use crate::AppState;
use axum::extract::State;
use axum::{routing::get, Json, Router};
use chrono::DateTime;
use serde::Serialize;
use std::sync::Arc;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub build_id: String,
    pub auth_state: String,
    /// RFC3339, absent until a cycle has published data
    pub last_successful_poll: Option<String>,
}

/// Health check response
async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let build_id = option_env!("BUILD_ID").unwrap_or("unknown").to_string();
    let last_successful_poll = state
        .registry
        .value(LAST_SUCCESSFUL_POLL, &[])
        .and_then(|secs| DateTime::from_timestamp(secs as i64, 0))
        .map(format_utc_rfc3339);

    Json(HealthResponse {
        status: "ok".to_string(),
        build_id,
        auth_state: state.authenticator.phase().as_str().to_string(),
        last_successful_poll,
    })
}

/// Build the complete router with all routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .merge(metrics::routes())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .with_state(state)
}
