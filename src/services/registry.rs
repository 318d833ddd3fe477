// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! In-process metric registry rendered in the Prometheus text format.
//!
//! Vehicle metrics arrive as whole snapshots: publishing replaces every
//! series of each metric name in the snapshot and leaves other names alone,
//! so a family that failed this cycle keeps serving its last values.
//! Bookkeeping metrics (HTTP calls, poll cycles, auth state) are updated in
//! place.

use crate::models::{Labels, PollRecorder, PollResult, VehicleSnapshot};
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::fmt::Write;

pub const HTTP_REQUESTS_TOTAL: &str = "volvo_http_requests_total";
pub const HTTP_REQUEST_DURATION: &str = "volvo_http_request_duration_seconds";
pub const HTTP_REQUEST_ERRORS_TOTAL: &str = "volvo_http_request_errors_total";
pub const FAMILY_UP: &str = "volvo_family_up";
pub const POLL_CYCLES_TOTAL: &str = "volvo_poll_cycles_total";
pub const LAST_SUCCESSFUL_POLL: &str = "volvo_last_successful_poll_timestamp_seconds";
pub const AUTH_STATE: &str = "volvo_auth_state";
pub const MAPPING_SKIPPED_TOTAL: &str = "volvo_mapping_skipped_total";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Gauge,
    Counter,
    /// Rendered as `<name>_sum` and `<name>_count`
    Summary,
}

impl MetricKind {
    fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Gauge => "gauge",
            MetricKind::Counter => "counter",
            MetricKind::Summary => "summary",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct SeriesValue {
    /// Gauge/counter value, or the running sum for a summary
    value: f64,
    count: u64,
}

#[derive(Debug, Clone)]
struct MetricFamily {
    help: String,
    kind: MetricKind,
    series: BTreeMap<Labels, SeriesValue>,
}

impl MetricFamily {
    fn new(help: &str, kind: MetricKind) -> Self {
        Self {
            help: help.to_string(),
            kind,
            series: BTreeMap::new(),
        }
    }
}

/// Shared registry; cheap to read concurrently with a poll cycle writing.
#[derive(Debug, Default)]
pub struct MetricRegistry {
    families: DashMap<String, MetricFamily>,
}

/// Build a label set from pairs.
pub fn labels(pairs: &[(&str, &str)]) -> Labels {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

impl MetricRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_gauge(&self, name: &str, help: &str, labels: Labels, value: f64) {
        let mut family = self
            .families
            .entry(name.to_string())
            .or_insert_with(|| MetricFamily::new(help, MetricKind::Gauge));
        family.series.insert(labels, SeriesValue { value, count: 0 });
    }

    pub fn inc_counter(&self, name: &str, help: &str, labels: Labels, by: f64) {
        let mut family = self
            .families
            .entry(name.to_string())
            .or_insert_with(|| MetricFamily::new(help, MetricKind::Counter));
        family.series.entry(labels).or_default().value += by;
    }

    pub fn observe(&self, name: &str, help: &str, labels: Labels, value: f64) {
        let mut family = self
            .families
            .entry(name.to_string())
            .or_insert_with(|| MetricFamily::new(help, MetricKind::Summary));
        let series = family.series.entry(labels).or_default();
        series.value += value;
        series.count += 1;
    }

    /// Replace the series of every metric name present in `snapshot`.
    pub fn publish(&self, snapshot: &VehicleSnapshot) {
        for (name, sample) in snapshot.iter() {
            let mut family = MetricFamily::new(sample.help, MetricKind::Gauge);
            family.series.insert(
                sample.labels.clone(),
                SeriesValue {
                    value: sample.value,
                    count: 0,
                },
            );
            self.families.insert(name.clone(), family);
        }
        tracing::debug!(metrics = snapshot.len(), "Published snapshot");
    }

    /// Update the HTTP bookkeeping metrics for one outbound call.
    pub fn record_poll(&self, result: &PollResult) {
        let status = result.status_label();
        self.inc_counter(
            HTTP_REQUESTS_TOTAL,
            "Outbound HTTP requests by family, route and status",
            labels(&[
                ("family", &result.family),
                ("method", result.method),
                ("route", &result.route),
                ("status", &status),
            ]),
            1.0,
        );
        self.observe(
            HTTP_REQUEST_DURATION,
            "Outbound HTTP request duration",
            labels(&[("family", &result.family), ("route", &result.route)]),
            result.duration.as_secs_f64(),
        );
        if let Some(kind) = result.error_kind {
            self.inc_counter(
                HTTP_REQUEST_ERRORS_TOTAL,
                "Failed outbound HTTP requests by error kind",
                labels(&[("family", &result.family), ("kind", kind.as_str())]),
                1.0,
            );
        }
    }

    /// Value of the series whose labels include all of `pairs`.
    pub fn value(&self, name: &str, pairs: &[(&str, &str)]) -> Option<f64> {
        let family = self.families.get(name)?;
        family
            .series
            .iter()
            .find(|(labels, _)| {
                pairs
                    .iter()
                    .all(|(k, v)| labels.get(*k).map(String::as_str) == Some(*v))
            })
            .map(|(_, s)| s.value)
    }

    /// Number of observations for a summary series.
    pub fn observation_count(&self, name: &str, pairs: &[(&str, &str)]) -> Option<u64> {
        let family = self.families.get(name)?;
        family
            .series
            .iter()
            .find(|(labels, _)| {
                pairs
                    .iter()
                    .all(|(k, v)| labels.get(*k).map(String::as_str) == Some(*v))
            })
            .map(|(_, s)| s.count)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.families.contains_key(name)
    }

    /// Render everything, sorted by metric name and then label set.
    pub fn render(&self) -> String {
        let mut names: Vec<String> = self.families.iter().map(|e| e.key().clone()).collect();
        names.sort();

        let mut output = String::new();
        for name in names {
            let Some(family) = self.families.get(&name).map(|f| f.clone()) else {
                continue;
            };
            let _ = writeln!(output, "# HELP {} {}", name, escape_help(&family.help));
            let _ = writeln!(output, "# TYPE {} {}", name, family.kind.as_str());

            for (labels, series) in &family.series {
                let label_str = format_labels(labels);
                match family.kind {
                    MetricKind::Summary => {
                        let _ = writeln!(
                            output,
                            "{}_sum{} {}",
                            name,
                            label_str,
                            format_value(series.value)
                        );
                        let _ = writeln!(output, "{}_count{} {}", name, label_str, series.count);
                    }
                    _ => {
                        let _ = writeln!(
                            output,
                            "{}{} {}",
                            name,
                            label_str,
                            format_value(series.value)
                        );
                    }
                }
            }
        }
        output
    }
}

impl PollRecorder for MetricRegistry {
    fn record(&self, result: &PollResult) {
        self.record_poll(result);
    }
}

fn format_labels(labels: &Labels) -> String {
    if labels.is_empty() {
        return String::new();
    }
    let joined = labels
        .iter()
        .map(|(k, v)| format!("{}=\"{}\"", k, escape_label_value(v)))
        .collect::<Vec<_>>()
        .join(",");
    format!("{{{}}}", joined)
}

fn escape_label_value(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

fn escape_help(help: &str) -> String {
    help.replace('\\', "\\\\").replace('\n', "\\n")
}

fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value == f64::INFINITY {
        "+Inf".to_string()
    } else if value == f64::NEG_INFINITY {
        "-Inf".to_string()
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MetricSample;
    use std::time::Duration;

    fn snapshot(pairs: &[(&str, f64)]) -> VehicleSnapshot {
        let mut snap = VehicleSnapshot::new();
        for (name, value) in pairs {
            snap.insert(
                *name,
                MetricSample {
                    value: *value,
                    labels: labels(&[("vin", "VIN1")]),
                    help: "test metric",
                },
            );
        }
        snap
    }

    #[test]
    fn test_publish_replaces_only_present_names() {
        let registry = MetricRegistry::new();
        registry.publish(&snapshot(&[("volvo_a", 1.0), ("volvo_b", 2.0)]));
        registry.publish(&snapshot(&[("volvo_a", 5.0)]));

        assert_eq!(registry.value("volvo_a", &[("vin", "VIN1")]), Some(5.0));
        assert_eq!(registry.value("volvo_b", &[]), Some(2.0));
    }

    #[test]
    fn test_render_format() {
        let registry = MetricRegistry::new();
        registry.set_gauge(
            "volvo_test",
            "A \"test\"\ngauge",
            labels(&[("vin", "V\"1"), ("a", "x")]),
            1.5,
        );

        let text = registry.render();
        assert!(text.contains("# HELP volvo_test A \"test\"\\ngauge\n"));
        assert!(text.contains("# TYPE volvo_test gauge\n"));
        assert!(text.contains("volvo_test{a=\"x\",vin=\"V\\\"1\"} 1.5\n"));
    }

    #[test]
    fn test_record_poll_counts_by_route() {
        let registry = MetricRegistry::new();
        let result = PollResult::from_status(
            "energy",
            "GET",
            "/energy/v2/vehicles/{vin}/state",
            500,
            Duration::from_millis(20),
        );
        registry.record_poll(&result);
        registry.record_poll(&result);

        let pairs = [("route", "/energy/v2/vehicles/{vin}/state"), ("status", "500")];
        assert_eq!(registry.value(HTTP_REQUESTS_TOTAL, &pairs), Some(2.0));
        assert_eq!(
            registry.value(HTTP_REQUEST_ERRORS_TOTAL, &[("kind", "server")]),
            Some(2.0)
        );
        assert_eq!(
            registry.observation_count(HTTP_REQUEST_DURATION, &[("family", "energy")]),
            Some(2)
        );

        let text = registry.render();
        assert!(text.contains("# TYPE volvo_http_request_duration_seconds summary"));
        assert!(text.contains("volvo_http_request_duration_seconds_count{family=\"energy\""));
    }

    #[test]
    fn test_format_value_special_cases() {
        assert_eq!(format_value(1.0), "1");
        assert_eq!(format_value(f64::INFINITY), "+Inf");
        assert_eq!(format_value(f64::NAN), "NaN");
    }
}
