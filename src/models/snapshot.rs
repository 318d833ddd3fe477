// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Per-cycle metric snapshot.

use super::family::ApiFamily;
use std::collections::BTreeMap;

/// Label name to label value.
pub type Labels = BTreeMap<String, String>;

/// A single mapped metric value.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSample {
    pub value: f64,
    pub labels: Labels,
    /// HELP text for the exposition format
    pub help: &'static str,
}

/// Everything mapped in one poll cycle, keyed by metric name.
///
/// Built fresh every cycle; there is no identity across cycles.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VehicleSnapshot {
    samples: BTreeMap<String, MetricSample>,
}

impl VehicleSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a sample, returning the one it replaced.
    pub fn insert(&mut self, name: impl Into<String>, sample: MetricSample) -> Option<MetricSample> {
        self.samples.insert(name.into(), sample)
    }

    pub fn get(&self, name: &str) -> Option<&MetricSample> {
        self.samples.get(name)
    }

    pub fn value(&self, name: &str) -> Option<f64> {
        self.samples.get(name).map(|s| s.value)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.samples.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &MetricSample)> {
        self.samples.iter()
    }

    /// Union with `other`; samples from `other` win on name collisions.
    pub fn merge(&mut self, other: VehicleSnapshot) {
        for (name, sample) in other.samples {
            self.samples.insert(name, sample);
        }
    }

    /// Merge family partials in the fixed precedence order of [`ApiFamily::ALL`].
    ///
    /// Input order is irrelevant; a later family in the precedence order wins
    /// on colliding metric names.
    pub fn merge_in_precedence(mut partials: Vec<(ApiFamily, VehicleSnapshot)>) -> Self {
        partials.sort_by_key(|(family, _)| family.precedence());

        let mut merged = VehicleSnapshot::new();
        for (family, partial) in partials {
            for (name, sample) in partial.samples {
                if merged.samples.insert(name.clone(), sample).is_some() {
                    tracing::debug!(
                        family = %family,
                        metric = %name,
                        "Metric defined by more than one family, later family wins"
                    );
                }
            }
        }
        merged
    }

    /// Add vehicle-wide labels; a sample's own labels are kept on conflict.
    pub fn apply_base_labels(&mut self, base: &Labels) {
        for sample in self.samples.values_mut() {
            for (key, value) in base {
                sample
                    .labels
                    .entry(key.clone())
                    .or_insert_with(|| value.clone());
            }
        }
    }
}
