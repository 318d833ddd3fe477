// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Outcome of a single outbound HTTP call.

use crate::error::ErrorKind;
use std::time::Duration;

/// Per-call record feeding the HTTP metrics. Discarded once recorded.
#[derive(Debug, Clone, PartialEq)]
pub struct PollResult {
    /// Family name, or `weather` / `oauth` for the auxiliary calls
    pub family: String,
    pub method: &'static str,
    /// Route template, never the literal request path
    pub route: String,
    pub success: bool,
    /// `None` when no response was received
    pub http_status: Option<u16>,
    pub duration: Duration,
    pub error_kind: Option<ErrorKind>,
}

impl PollResult {
    /// Result for a call that produced an HTTP response.
    pub fn from_status(
        family: impl Into<String>,
        method: &'static str,
        route: impl Into<String>,
        status: u16,
        duration: Duration,
    ) -> Self {
        let error_kind = ErrorKind::from_status(status);
        Self {
            family: family.into(),
            method,
            route: route.into(),
            success: error_kind.is_none(),
            http_status: Some(status),
            duration,
            error_kind,
        }
    }

    /// Result for a call that failed before a response arrived.
    pub fn transport_failure(
        family: impl Into<String>,
        method: &'static str,
        route: impl Into<String>,
        duration: Duration,
    ) -> Self {
        Self {
            family: family.into(),
            method,
            route: route.into(),
            success: false,
            http_status: None,
            duration,
            error_kind: Some(ErrorKind::Transport),
        }
    }

    /// Status label value: the numeric code, or `error` without a response.
    pub fn status_label(&self) -> String {
        self.http_status
            .map(|s| s.to_string())
            .unwrap_or_else(|| "error".to_string())
    }
}

/// Sink for poll results (implemented by the metric registry).
pub trait PollRecorder: Send + Sync {
    fn record(&self, result: &PollResult);
}
