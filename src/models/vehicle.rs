// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Vehicle-wide labels attached to every mapped metric.

use super::snapshot::Labels;
use serde::Serialize;
use serde_json::Value;

/// Fallback value for labels that fall outside their vocabulary.
pub const OTHER_LABEL: &str = "other";
/// Value for labels the provider did not report.
pub const UNKNOWN_LABEL: &str = "unknown";

const FUEL_TYPES: &[&str] = &["PETROL", "DIESEL", "ELECTRIC", "PETROL/ELECTRIC", "NONE"];
const GEARBOXES: &[&str] = &["MANUAL", "AUTOMATIC"];
const MODEL_MAX_LEN: usize = 32;

/// Labels identifying the polled vehicle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VehicleLabels {
    pub vin: String,
    pub model: String,
    pub model_year: String,
    pub fuel_type: String,
    pub gearbox: String,
}

impl VehicleLabels {
    /// Labels known before the details endpoint has answered.
    pub fn for_vin(vin: &str) -> Self {
        Self {
            vin: vin.to_string(),
            model: UNKNOWN_LABEL.to_string(),
            model_year: UNKNOWN_LABEL.to_string(),
            fuel_type: UNKNOWN_LABEL.to_string(),
            gearbox: UNKNOWN_LABEL.to_string(),
        }
    }

    /// Extract labels from an (unwrapped) vehicle details payload.
    ///
    /// The configured VIN is authoritative; the payload never changes it.
    pub fn from_details(vin: &str, details: &Value) -> Self {
        let text = |pointer: &str| details.pointer(pointer).and_then(Value::as_str);

        let model = text("/descriptions/model")
            .map(|m| sanitize_free_text(m, MODEL_MAX_LEN))
            .unwrap_or_else(|| UNKNOWN_LABEL.to_string());

        let model_year = match details.pointer("/modelYear") {
            Some(Value::Number(n)) => n.to_string(),
            Some(Value::String(s)) => s.clone(),
            _ => UNKNOWN_LABEL.to_string(),
        };
        let model_year = if !model_year.is_empty()
            && model_year.len() <= 4
            && model_year.chars().all(|c| c.is_ascii_digit())
        {
            model_year
        } else {
            UNKNOWN_LABEL.to_string()
        };

        Self {
            vin: vin.to_string(),
            model,
            model_year,
            fuel_type: text("/fuelType")
                .map(|v| closed_vocabulary(v, FUEL_TYPES))
                .unwrap_or_else(|| UNKNOWN_LABEL.to_string()),
            gearbox: text("/gearbox")
                .map(|v| closed_vocabulary(v, GEARBOXES))
                .unwrap_or_else(|| UNKNOWN_LABEL.to_string()),
        }
    }

    pub fn to_labels(&self) -> Labels {
        let mut labels = Labels::new();
        labels.insert("vin".to_string(), self.vin.clone());
        labels.insert("model".to_string(), self.model.clone());
        labels.insert("model_year".to_string(), self.model_year.clone());
        labels.insert("fuel_type".to_string(), self.fuel_type.clone());
        labels.insert("gearbox".to_string(), self.gearbox.clone());
        labels
    }
}

/// Map a value onto a closed vocabulary (case-insensitive), else `other`.
pub fn closed_vocabulary(value: &str, allowed: &[&str]) -> String {
    let upper = value.trim().to_uppercase();
    allowed
        .iter()
        .find(|a| a.to_uppercase() == upper)
        .map(|a| a.to_string())
        .unwrap_or_else(|| OTHER_LABEL.to_string())
}

/// Keep only alphanumerics, spaces and dashes, capped at `max_len` characters.
pub fn sanitize_free_text(value: &str, max_len: usize) -> String {
    let cleaned: String = value
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == ' ' || *c == '-')
        .take(max_len)
        .collect();
    let cleaned = cleaned.trim().to_string();
    if cleaned.is_empty() {
        UNKNOWN_LABEL.to_string()
    } else {
        cleaned
    }
}
