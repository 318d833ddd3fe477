// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Optional weather lookup at the vehicle's last known position.

use crate::error::{AppError, Result};
use crate::models::{PollRecorder, PollResult};
use crate::services::retry::{self, RetryAction, RetryPolicy};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const DEFAULT_WEATHER_URL: &str = "https://api.openweathermap.org/data/2.5/weather";
pub const WEATHER_FAMILY: &str = "weather";

/// OpenWeatherMap current-weather client.
pub struct WeatherClient {
    http: reqwest::Client,
    api_key: String,
    url: String,
    route: String,
    recorder: Arc<dyn PollRecorder>,
    retry_policy: RetryPolicy,
}

impl WeatherClient {
    pub fn new(
        api_key: String,
        timeout: Duration,
        recorder: Arc<dyn PollRecorder>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Internal(anyhow::anyhow!("HTTP client build failed: {}", e)))?;

        let mut client = Self {
            http,
            api_key,
            url: String::new(),
            route: String::new(),
            recorder,
            retry_policy: RetryPolicy::default(),
        };
        client.set_url(DEFAULT_WEATHER_URL);
        Ok(client)
    }

    /// Point the client at another endpoint (tests).
    pub fn with_url(mut self, url: &str) -> Self {
        self.set_url(url);
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    fn set_url(&mut self, url: &str) {
        self.url = url.to_string();
        self.route = reqwest::Url::parse(url)
            .map(|u| u.path().to_string())
            .unwrap_or_else(|_| "/weather".to_string());
    }

    /// Current conditions at (`lat`, `lon`), metric units.
    pub async fn current(&self, lat: f64, lon: f64) -> Result<Value> {
        let lat = lat.to_string();
        let lon = lon.to_string();
        let (lat, lon) = (lat.as_str(), lon.as_str());

        retry::retry_with_backoff(&self.retry_policy, |_| async move {
            let started = Instant::now();
            let sent = self
                .http
                .get(&self.url)
                .query(&[
                    ("lat", lat),
                    ("lon", lon),
                    ("units", "metric"),
                    ("appid", self.api_key.as_str()),
                ])
                .header(reqwest::header::ACCEPT, "application/json")
                .send()
                .await;

            let response = match sent {
                Ok(r) => r,
                Err(e) => {
                    self.recorder.record(&PollResult::transport_failure(
                        WEATHER_FAMILY,
                        "GET",
                        self.route.as_str(),
                        started.elapsed(),
                    ));
                    let retryable = retry::is_retryable_reqwest_error(&e);
                    // without_url keeps the API key out of the error text
                    let err = AppError::Transport(e.without_url().to_string());
                    return if retryable {
                        RetryAction::Retry(err)
                    } else {
                        RetryAction::Fail(err)
                    };
                }
            };

            let status = response.status().as_u16();
            self.recorder.record(&PollResult::from_status(
                WEATHER_FAMILY,
                "GET",
                self.route.as_str(),
                status,
                started.elapsed(),
            ));

            if !response.status().is_success() {
                return retry::classify(AppError::Provider {
                    status,
                    body: String::new(),
                });
            }

            match response.json::<Value>().await {
                Ok(v) => RetryAction::Success(v),
                Err(e) => RetryAction::Fail(AppError::Decode(format!(
                    "weather response: {}",
                    e.without_url()
                ))),
            }
        })
        .await
    }
}
