// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Volvo Exporter: republish vehicle telemetry as Prometheus metrics
//!
//! This crate polls the Volvo Cars APIs for one vehicle on a fixed interval,
//! keeps its OAuth token refreshed and durably stored, and serves the mapped
//! values on a scrape endpoint.

pub mod config;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;
pub mod time_utils;

use config::Config;
use services::{MetricRegistry, TokenAuthenticator};
use std::sync::Arc;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub registry: Arc<MetricRegistry>,
    pub authenticator: Arc<TokenAuthenticator>,
}
