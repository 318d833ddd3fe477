// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Periodic poll loop.
//!
//! Each tick: make sure a token is available, fetch the families with
//! bounded concurrency, map and merge what came back, and publish it. A
//! failed cycle is logged and counted; the loop only stops on shutdown.

use crate::error::{AppError, ErrorKind};
use crate::models::{ApiFamily, ApiFamilySpec, VehicleLabels, VehicleSnapshot};
use crate::services::authenticator::TokenAuthenticator;
use crate::services::mapper::{MapOutcome, SnapshotMapper, WEATHER_SOURCE};
use crate::services::registry::{self, labels, MetricRegistry};
use crate::services::vehicle_api::{FamilyResponse, VehicleApiClient};
use crate::services::weather::WeatherClient;
use chrono::Utc;
use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Maximum family fetches in flight at once.
pub const MAX_CONCURRENT_FAMILIES: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleOutcome {
    /// Every family published
    Success,
    /// Some families failed, the rest published
    Partial,
    /// Nothing published
    Failed,
}

impl CycleOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            CycleOutcome::Success => "success",
            CycleOutcome::Partial => "partial",
            CycleOutcome::Failed => "failed",
        }
    }
}

/// Summary of one poll cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub outcome: CycleOutcome,
    pub families_ok: Vec<ApiFamily>,
    pub families_failed: Vec<(ApiFamily, ErrorKind)>,
    pub metrics_published: usize,
    pub fields_skipped: usize,
    /// Set when the cycle ended before any fetch
    pub error: Option<ErrorKind>,
}

impl CycleReport {
    fn aborted(kind: ErrorKind) -> Self {
        Self {
            outcome: CycleOutcome::Failed,
            families_ok: Vec::new(),
            families_failed: Vec::new(),
            metrics_published: 0,
            fields_skipped: 0,
            error: Some(kind),
        }
    }
}

/// Drives the poll cycles for one vehicle.
pub struct PollingScheduler {
    vin: String,
    interval: Duration,
    families: Vec<ApiFamilySpec>,
    authenticator: Arc<TokenAuthenticator>,
    client: Arc<VehicleApiClient>,
    mapper: SnapshotMapper,
    registry: Arc<MetricRegistry>,
    weather: Option<WeatherClient>,
    /// Last known vehicle labels, reused when the details endpoint fails
    labels: Mutex<VehicleLabels>,
}

impl PollingScheduler {
    pub fn new(
        vin: &str,
        interval: Duration,
        authenticator: Arc<TokenAuthenticator>,
        client: Arc<VehicleApiClient>,
        registry: Arc<MetricRegistry>,
    ) -> Self {
        Self {
            vin: vin.to_string(),
            interval,
            families: ApiFamilySpec::defaults(),
            authenticator,
            client,
            mapper: SnapshotMapper::new(),
            registry,
            weather: None,
            labels: Mutex::new(VehicleLabels::for_vin(vin)),
        }
    }

    /// Poll these family definitions instead of the production ones.
    pub fn with_families(mut self, families: Vec<ApiFamilySpec>) -> Self {
        self.families = families;
        self
    }

    pub fn with_mapper(mut self, mapper: SnapshotMapper) -> Self {
        self.mapper = mapper;
        self
    }

    pub fn with_weather(mut self, weather: WeatherClient) -> Self {
        self.weather = Some(weather);
        self
    }

    pub fn vehicle_labels(&self) -> VehicleLabels {
        self.labels
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Run cycles on a fixed ticker until `shutdown` resolves.
    ///
    /// Shutdown is only observed between cycles, so in-flight requests and
    /// token writes always finish.
    pub async fn run<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        tracing::info!(
            interval_secs = self.interval.as_secs(),
            families = self.families.len(),
            "Polling started"
        );

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = interval.tick() => {}
            }
            self.poll_once().await;
        }

        tracing::info!("Polling stopped");
    }

    /// Run a single cycle and publish its results.
    pub async fn poll_once(&self) -> CycleReport {
        let started = Instant::now();
        self.update_auth_gauge();

        if let Err(e) = self.authenticator.ensure_authenticated().await {
            log_cycle_error(&e);
            self.update_auth_gauge();
            self.count_cycle(CycleOutcome::Failed);
            return CycleReport::aborted(e.kind());
        }

        // Owned inputs keep the fetch futures `Send` for `tokio::spawn`.
        let results: Vec<(ApiFamily, Result<FamilyResponse, AppError>)> =
            stream::iter(self.families.clone())
                .map(|spec| {
                    let client = Arc::clone(&self.client);
                    let vin = self.vin.clone();
                    async move {
                        let result = client.fetch(&spec, &vin).await;
                        (spec.family, result)
                    }
                })
                .buffer_unordered(MAX_CONCURRENT_FAMILIES)
                .collect()
                .await;

        let mut partials = Vec::new();
        let mut report = CycleReport {
            outcome: CycleOutcome::Success,
            families_ok: Vec::new(),
            families_failed: Vec::new(),
            metrics_published: 0,
            fields_skipped: 0,
            error: None,
        };

        for (family, result) in results {
            match result {
                Ok(response) => {
                    if family == ApiFamily::ConnectedVehicle {
                        self.refresh_labels(&response);
                    }
                    let outcome = self.mapper.map(family, &response);
                    report.fields_skipped += self.count_skipped(family.name(), &outcome);
                    partials.push((family, outcome.snapshot));
                    report.families_ok.push(family);
                    self.set_family_up(family.name(), true);
                }
                Err(e) => {
                    tracing::warn!(family = family.name(), kind = e.kind().as_str(), error = %e, "Family fetch failed");
                    report.families_failed.push((family, e.kind()));
                    self.set_family_up(family.name(), false);
                }
            }
        }

        report.families_ok.sort();
        report.families_failed.sort_by_key(|(f, _)| *f);

        let mut snapshot = VehicleSnapshot::merge_in_precedence(partials);
        if let Some(weather) = self.weather_snapshot(&snapshot).await {
            report.fields_skipped += self.count_skipped(WEATHER_SOURCE, &weather);
            snapshot.merge(weather.snapshot);
        }

        snapshot.apply_base_labels(&self.vehicle_labels().to_labels());
        self.registry.publish(&snapshot);
        report.metrics_published = snapshot.len();

        report.outcome = if report.families_failed.is_empty() {
            CycleOutcome::Success
        } else if report.families_ok.is_empty() {
            CycleOutcome::Failed
        } else {
            CycleOutcome::Partial
        };

        if report.outcome != CycleOutcome::Failed {
            self.registry.set_gauge(
                registry::LAST_SUCCESSFUL_POLL,
                "Unix time of the last poll cycle that published data",
                labels(&[]),
                Utc::now().timestamp() as f64,
            );
        }
        self.count_cycle(report.outcome);
        self.update_auth_gauge();

        tracing::info!(
            outcome = report.outcome.as_str(),
            ok = report.families_ok.len(),
            failed = report.families_failed.len(),
            metrics = report.metrics_published,
            skipped = report.fields_skipped,
            duration_ms = started.elapsed().as_millis() as u64,
            "Poll cycle complete"
        );
        report
    }

    /// Weather at the merged location, when enabled and a position is known.
    async fn weather_snapshot(&self, snapshot: &VehicleSnapshot) -> Option<MapOutcome> {
        let weather = self.weather.as_ref()?;
        let lat = snapshot.value("volvo_location_latitude")?;
        let lon = snapshot.value("volvo_location_longitude")?;

        match weather.current(lat, lon).await {
            Ok(body) => {
                self.set_family_up(WEATHER_SOURCE, true);
                Some(self.mapper.map_weather(&body))
            }
            Err(e) => {
                tracing::warn!(kind = e.kind().as_str(), error = %e, "Weather fetch failed");
                self.set_family_up(WEATHER_SOURCE, false);
                None
            }
        }
    }

    fn refresh_labels(&self, response: &FamilyResponse) {
        let Some(details) = response.endpoint("details") else {
            return;
        };
        let fresh = VehicleLabels::from_details(&self.vin, details);
        let mut current = self.labels.lock().unwrap_or_else(|e| e.into_inner());
        if *current != fresh {
            tracing::info!(model = %fresh.model, model_year = %fresh.model_year, "Vehicle labels updated");
            *current = fresh;
        }
    }

    fn count_skipped(&self, source: &str, outcome: &MapOutcome) -> usize {
        let count = outcome.skipped.len();
        if count > 0 {
            self.registry.inc_counter(
                registry::MAPPING_SKIPPED_TOTAL,
                "Fields present in a response that could not be mapped",
                labels(&[("family", source)]),
                count as f64,
            );
        }
        count
    }

    fn set_family_up(&self, family: &str, up: bool) {
        self.registry.set_gauge(
            registry::FAMILY_UP,
            "Whether the last fetch of the family succeeded",
            labels(&[("family", family)]),
            if up { 1.0 } else { 0.0 },
        );
    }

    fn count_cycle(&self, outcome: CycleOutcome) {
        self.registry.inc_counter(
            registry::POLL_CYCLES_TOTAL,
            "Poll cycles by outcome",
            labels(&[("outcome", outcome.as_str())]),
            1.0,
        );
    }

    fn update_auth_gauge(&self) {
        self.registry.set_gauge(
            registry::AUTH_STATE,
            "Authentication state (0=unauthenticated, 1=authorizing, 2=authenticated, 3=refreshing)",
            labels(&[]),
            self.authenticator.phase().gauge_value(),
        );
    }
}

fn log_cycle_error(e: &AppError) {
    match e {
        AppError::ReauthenticationRequired => tracing::error!(
            "Refresh token rejected; run the bootstrap command to authorize again"
        ),
        AppError::AuthenticationRequired(reason) => {
            tracing::error!(%reason, "No usable token; run the bootstrap command")
        }
        other => tracing::error!(kind = other.kind().as_str(), error = %other, "Poll cycle aborted"),
    }
}
