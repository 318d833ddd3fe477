// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Maps raw family payloads onto named metric samples.
//!
//! Each family has a static table of [`FieldRule`]s: which endpoint, a JSON
//! pointer into its (unwrapped) body, the metric name and how to coerce the
//! value. Enumerated provider strings go through a [`Codebook`] so dashboards
//! see stable small integers.
//!
//! A field that is absent, `null` or `UNSPECIFIED` is left out of the
//! snapshot. A field that is present but cannot be coerced is also left out
//! and reported as a [`MappingSkipped`]. Fields with no rule are ignored.

use crate::models::vehicle::{closed_vocabulary, UNKNOWN_LABEL};
use crate::models::{ApiFamily, Labels, MetricSample, VehicleSnapshot};
use crate::services::vehicle_api::FamilyResponse;
use serde_json::Value;
use std::collections::BTreeMap;

/// Provider placeholder for "no data", treated like a missing field.
const UNSPECIFIED: &str = "UNSPECIFIED";

/// Fixed mapping from provider enum strings to gauge values.
#[derive(Debug)]
pub struct Codebook {
    pub name: &'static str,
    pub entries: &'static [(&'static str, f64)],
}

impl Codebook {
    /// Case-insensitive lookup.
    pub fn lookup(&self, raw: &str) -> Option<f64> {
        let raw = raw.trim();
        self.entries
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(raw))
            .map(|(_, v)| *v)
    }
}

/// Doors, hood, tailgate, tank lid, windows and sunroof.
pub static OPENING_STATE: Codebook = Codebook {
    name: "opening_state",
    entries: &[("CLOSED", 0.0), ("OPEN", 1.0), ("AJAR", 2.0)],
};

pub static LOCK_STATE: Codebook = Codebook {
    name: "lock_state",
    entries: &[("UNLOCKED", 0.0), ("LOCKED", 1.0)],
};

pub static ENGINE_STATUS: Codebook = Codebook {
    name: "engine_status",
    entries: &[("STOPPED", 0.0), ("RUNNING", 1.0)],
};

/// Exterior light failures.
pub static LIGHT_WARNING: Codebook = Codebook {
    name: "light_warning",
    entries: &[("NO_WARNING", 0.0), ("FAILURE", 1.0)],
};

pub static TYRE_PRESSURE: Codebook = Codebook {
    name: "tyre_pressure",
    entries: &[
        ("NO_WARNING", 0.0),
        ("VERY_LOW_PRESSURE", 1.0),
        ("LOW_PRESSURE", 2.0),
        ("HIGH_PRESSURE", 3.0),
    ],
};

/// Washer fluid, brake fluid and coolant level warnings.
pub static FLUID_LEVEL: Codebook = Codebook {
    name: "fluid_level",
    entries: &[("NO_WARNING", 0.0), ("TOO_LOW", 1.0)],
};

pub static OIL_LEVEL: Codebook = Codebook {
    name: "oil_level",
    entries: &[
        ("NO_WARNING", 0.0),
        ("SERVICE_REQUIRED", 1.0),
        ("TOO_LOW", 2.0),
        ("TOO_HIGH", 3.0),
    ],
};

/// Graded by urgency: almost time 1, time for service 2, overdue 3.
pub static SERVICE_WARNING: Codebook = Codebook {
    name: "service_warning",
    entries: &[
        ("NO_WARNING", 0.0),
        ("REGULAR_MAINTENANCE_ALMOST_TIME_FOR_SERVICE", 1.0),
        ("ENGINE_HOURS_ALMOST_TIME_FOR_SERVICE", 1.0),
        ("DISTANCE_DRIVEN_ALMOST_TIME_FOR_SERVICE", 1.0),
        ("REGULAR_MAINTENANCE_TIME_FOR_SERVICE", 2.0),
        ("ENGINE_HOURS_TIME_FOR_SERVICE", 2.0),
        ("DISTANCE_DRIVEN_TIME_FOR_SERVICE", 2.0),
        ("REGULAR_MAINTENANCE_OVERDUE_FOR_SERVICE", 3.0),
        ("ENGINE_HOURS_OVERDUE_FOR_SERVICE", 3.0),
        ("DISTANCE_DRIVEN_OVERDUE_FOR_SERVICE", 3.0),
        ("UNKNOWN_WARNING", 4.0),
    ],
};

/// What will bring the car in for its next service.
pub static SERVICE_TRIGGER: Codebook = Codebook {
    name: "service_trigger",
    entries: &[
        ("CALENDAR", 1.0),
        ("DISTANCE", 2.0),
        ("ENGINE_HOURS", 3.0),
    ],
};

pub static CHARGING_STATUS: Codebook = Codebook {
    name: "charging_status",
    entries: &[
        ("IDLE", 0.0),
        ("CHARGING", 1.0),
        ("SCHEDULED", 2.0),
        ("DISCHARGING", 3.0),
        ("DONE", 4.0),
        ("ERROR", 5.0),
    ],
};

pub static CHARGER_CONNECTION: Codebook = Codebook {
    name: "charger_connection",
    entries: &[("DISCONNECTED", 0.0), ("CONNECTED", 1.0), ("FAULT", 2.0)],
};

pub static CHARGER_POWER: Codebook = Codebook {
    name: "charger_power",
    entries: &[
        ("NO_POWER_AVAILABLE", 0.0),
        ("PROVIDING_POWER", 1.0),
        ("FAULT", 2.0),
    ],
};

pub static CHARGING_TYPE: Codebook = Codebook {
    name: "charging_type",
    entries: &[("NONE", 0.0), ("AC", 1.0), ("DC", 2.0)],
};

/// How a raw JSON value becomes a gauge value.
#[derive(Debug, Clone, Copy)]
pub enum Coercion {
    /// JSON numbers, or strings holding a finite number
    Number,
    /// JSON booleans, `"true"`/`"false"`, or 0/1
    Boolean,
    Codebook(&'static Codebook),
}

/// Extra label read from the payload, restricted to a closed vocabulary.
#[derive(Debug, Clone, Copy)]
pub struct LabelRule {
    pub name: &'static str,
    pub pointer: &'static str,
    pub allowed: &'static [&'static str],
}

/// Source path to metric name.
#[derive(Debug, Clone, Copy)]
pub struct FieldRule {
    pub endpoint: &'static str,
    /// JSON pointer into the unwrapped endpoint body
    pub pointer: &'static str,
    pub metric: &'static str,
    pub help: &'static str,
    pub coercion: Coercion,
    pub labels: &'static [LabelRule],
}

/// A present field that could not be coerced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingSkipped {
    pub source: String,
    pub metric: &'static str,
    pub reason: String,
}

/// Result of mapping one family.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MapOutcome {
    pub snapshot: VehicleSnapshot,
    pub skipped: Vec<MappingSkipped>,
}

const DISTANCE_UNITS: &[&str] = &["km", "miles", "mi"];
const STATISTIC_UNITS: &[&str] = &[
    "km", "miles", "mi", "km/h", "mph", "l/100km", "mpg", "kWh/100km", "kwh/100km", "miles/kWh",
];
const SERVICE_UNITS: &[&str] = &["km", "miles", "mi", "h", "hours", "days", "months"];

const fn unit_label(pointer: &'static str, allowed: &'static [&'static str]) -> LabelRule {
    LabelRule {
        name: "unit",
        pointer,
        allowed,
    }
}

macro_rules! rule {
    ($endpoint:expr, $pointer:expr, $metric:expr, $help:expr, $coercion:expr) => {
        FieldRule {
            endpoint: $endpoint,
            pointer: $pointer,
            metric: $metric,
            help: $help,
            coercion: $coercion,
            labels: &[],
        }
    };
    ($endpoint:expr, $pointer:expr, $metric:expr, $help:expr, $coercion:expr, $labels:expr) => {
        FieldRule {
            endpoint: $endpoint,
            pointer: $pointer,
            metric: $metric,
            help: $help,
            coercion: $coercion,
            labels: $labels,
        }
    };
}

use Coercion::{Boolean, Number};

const fn code(book: &'static Codebook) -> Coercion {
    Coercion::Codebook(book)
}

#[rustfmt::skip]
static CONNECTED_VEHICLE_RULES: &[FieldRule] = &[
    rule!("details", "/batteryCapacityKWH", "volvo_battery_capacity_kwh", "Battery capacity (kWh)", Number),
    // doors
    rule!("doors", "/centralLock/value", "volvo_lock_state", "Central lock (0=unlocked, 1=locked)", code(&LOCK_STATE)),
    rule!("doors", "/frontLeftDoor/value", "volvo_door_front_left", "Front left door (0=closed, 1=open, 2=ajar)", code(&OPENING_STATE)),
    rule!("doors", "/frontRightDoor/value", "volvo_door_front_right", "Front right door (0=closed, 1=open, 2=ajar)", code(&OPENING_STATE)),
    rule!("doors", "/rearLeftDoor/value", "volvo_door_rear_left", "Rear left door (0=closed, 1=open, 2=ajar)", code(&OPENING_STATE)),
    rule!("doors", "/rearRightDoor/value", "volvo_door_rear_right", "Rear right door (0=closed, 1=open, 2=ajar)", code(&OPENING_STATE)),
    rule!("doors", "/hood/value", "volvo_hood", "Hood (0=closed, 1=open, 2=ajar)", code(&OPENING_STATE)),
    rule!("doors", "/tailgate/value", "volvo_tailgate", "Tailgate (0=closed, 1=open, 2=ajar)", code(&OPENING_STATE)),
    rule!("doors", "/tankLid/value", "volvo_tank_lid", "Tank lid (0=closed, 1=open, 2=ajar)", code(&OPENING_STATE)),
    // windows
    rule!("windows", "/frontLeftWindow/value", "volvo_window_front_left", "Front left window (0=closed, 1=open, 2=ajar)", code(&OPENING_STATE)),
    rule!("windows", "/frontRightWindow/value", "volvo_window_front_right", "Front right window (0=closed, 1=open, 2=ajar)", code(&OPENING_STATE)),
    rule!("windows", "/rearLeftWindow/value", "volvo_window_rear_left", "Rear left window (0=closed, 1=open, 2=ajar)", code(&OPENING_STATE)),
    rule!("windows", "/rearRightWindow/value", "volvo_window_rear_right", "Rear right window (0=closed, 1=open, 2=ajar)", code(&OPENING_STATE)),
    rule!("windows", "/sunroof/value", "volvo_sunroof", "Sunroof (0=closed, 1=open, 2=ajar)", code(&OPENING_STATE)),
    // odometer and statistics
    rule!("odometer", "/odometer/value", "volvo_odometer", "Odometer reading", Number,
        &[unit_label("/odometer/unit", DISTANCE_UNITS)]),
    rule!("statistics", "/averageFuelConsumption/value", "volvo_average_fuel_consumption", "Average fuel consumption since reset", Number,
        &[unit_label("/averageFuelConsumption/unit", STATISTIC_UNITS)]),
    rule!("statistics", "/averageFuelConsumptionAutomatic/value", "volvo_average_fuel_consumption_automatic", "Average fuel consumption, automatic trip", Number,
        &[unit_label("/averageFuelConsumptionAutomatic/unit", STATISTIC_UNITS)]),
    rule!("statistics", "/averageEnergyConsumption/value", "volvo_average_energy_consumption", "Average energy consumption since reset", Number,
        &[unit_label("/averageEnergyConsumption/unit", STATISTIC_UNITS)]),
    rule!("statistics", "/averageSpeed/value", "volvo_average_speed", "Average speed since reset", Number,
        &[unit_label("/averageSpeed/unit", STATISTIC_UNITS)]),
    rule!("statistics", "/averageSpeedAutomatic/value", "volvo_average_speed_automatic", "Average speed, automatic trip", Number,
        &[unit_label("/averageSpeedAutomatic/unit", STATISTIC_UNITS)]),
    rule!("statistics", "/tripMeterManual/value", "volvo_trip_meter_manual", "Manual trip meter", Number,
        &[unit_label("/tripMeterManual/unit", DISTANCE_UNITS)]),
    rule!("statistics", "/tripMeterAutomatic/value", "volvo_trip_meter_automatic", "Automatic trip meter", Number,
        &[unit_label("/tripMeterAutomatic/unit", DISTANCE_UNITS)]),
    rule!("statistics", "/distanceToEmptyTank/value", "volvo_distance_to_empty_tank", "Distance to empty tank", Number,
        &[unit_label("/distanceToEmptyTank/unit", DISTANCE_UNITS)]),
    rule!("statistics", "/distanceToEmptyBattery/value", "volvo_distance_to_empty_battery", "Distance to empty battery", Number,
        &[unit_label("/distanceToEmptyBattery/unit", DISTANCE_UNITS)]),
    // engine
    rule!("engine-status", "/engineStatus/value", "volvo_engine_running", "Engine (0=stopped, 1=running)", code(&ENGINE_STATUS)),
    rule!("engine", "/oilLevelWarning/value", "volvo_oil_level_warning", "Oil level (0=ok, 1=service required, 2=too low, 3=too high)", code(&OIL_LEVEL)),
    rule!("engine", "/engineCoolantLevelWarning/value", "volvo_coolant_level_warning", "Coolant level (0=ok, 1=too low)", code(&FLUID_LEVEL)),
    // exterior lights
    rule!("warnings", "/brakeLightCenterWarning/value", "volvo_brake_light_center_warning", "Brake light center (0=ok, 1=failure)", code(&LIGHT_WARNING)),
    rule!("warnings", "/brakeLightLeftWarning/value", "volvo_brake_light_left_warning", "Brake light left (0=ok, 1=failure)", code(&LIGHT_WARNING)),
    rule!("warnings", "/brakeLightRightWarning/value", "volvo_brake_light_right_warning", "Brake light right (0=ok, 1=failure)", code(&LIGHT_WARNING)),
    rule!("warnings", "/fogLightFrontWarning/value", "volvo_fog_light_front_warning", "Front fog light (0=ok, 1=failure)", code(&LIGHT_WARNING)),
    rule!("warnings", "/fogLightRearWarning/value", "volvo_fog_light_rear_warning", "Rear fog light (0=ok, 1=failure)", code(&LIGHT_WARNING)),
    rule!("warnings", "/positionLightFrontLeftWarning/value", "volvo_position_light_front_left_warning", "Position light front left (0=ok, 1=failure)", code(&LIGHT_WARNING)),
    rule!("warnings", "/positionLightFrontRightWarning/value", "volvo_position_light_front_right_warning", "Position light front right (0=ok, 1=failure)", code(&LIGHT_WARNING)),
    rule!("warnings", "/positionLightRearLeftWarning/value", "volvo_position_light_rear_left_warning", "Position light rear left (0=ok, 1=failure)", code(&LIGHT_WARNING)),
    rule!("warnings", "/positionLightRearRightWarning/value", "volvo_position_light_rear_right_warning", "Position light rear right (0=ok, 1=failure)", code(&LIGHT_WARNING)),
    rule!("warnings", "/highBeamLeftWarning/value", "volvo_high_beam_left_warning", "High beam left (0=ok, 1=failure)", code(&LIGHT_WARNING)),
    rule!("warnings", "/highBeamRightWarning/value", "volvo_high_beam_right_warning", "High beam right (0=ok, 1=failure)", code(&LIGHT_WARNING)),
    rule!("warnings", "/lowBeamLeftWarning/value", "volvo_low_beam_left_warning", "Low beam left (0=ok, 1=failure)", code(&LIGHT_WARNING)),
    rule!("warnings", "/lowBeamRightWarning/value", "volvo_low_beam_right_warning", "Low beam right (0=ok, 1=failure)", code(&LIGHT_WARNING)),
    rule!("warnings", "/daytimeRunningLightLeftWarning/value", "volvo_daytime_light_left_warning", "Daytime running light left (0=ok, 1=failure)", code(&LIGHT_WARNING)),
    rule!("warnings", "/daytimeRunningLightRightWarning/value", "volvo_daytime_light_right_warning", "Daytime running light right (0=ok, 1=failure)", code(&LIGHT_WARNING)),
    rule!("warnings", "/turnIndicationFrontLeftWarning/value", "volvo_turn_indicator_front_left_warning", "Turn indicator front left (0=ok, 1=failure)", code(&LIGHT_WARNING)),
    rule!("warnings", "/turnIndicationFrontRightWarning/value", "volvo_turn_indicator_front_right_warning", "Turn indicator front right (0=ok, 1=failure)", code(&LIGHT_WARNING)),
    rule!("warnings", "/turnIndicationRearLeftWarning/value", "volvo_turn_indicator_rear_left_warning", "Turn indicator rear left (0=ok, 1=failure)", code(&LIGHT_WARNING)),
    rule!("warnings", "/turnIndicationRearRightWarning/value", "volvo_turn_indicator_rear_right_warning", "Turn indicator rear right (0=ok, 1=failure)", code(&LIGHT_WARNING)),
    rule!("warnings", "/registrationPlateLightWarning/value", "volvo_plate_light_warning", "Registration plate light (0=ok, 1=failure)", code(&LIGHT_WARNING)),
    rule!("warnings", "/sideMarkLightsWarning/value", "volvo_side_mark_light_warning", "Side marker lights (0=ok, 1=failure)", code(&LIGHT_WARNING)),
    rule!("warnings", "/hazardLightsWarning/value", "volvo_hazard_light_warning", "Hazard lights (0=ok, 1=failure)", code(&LIGHT_WARNING)),
    rule!("warnings", "/reverseLightsWarning/value", "volvo_reverse_light_warning", "Reverse lights (0=ok, 1=failure)", code(&LIGHT_WARNING)),
    // tyres
    rule!("tyres", "/frontLeft/value", "volvo_tyre_front_left", "Front left tyre (0=ok, 1=very low, 2=low, 3=high)", code(&TYRE_PRESSURE)),
    rule!("tyres", "/frontRight/value", "volvo_tyre_front_right", "Front right tyre (0=ok, 1=very low, 2=low, 3=high)", code(&TYRE_PRESSURE)),
    rule!("tyres", "/rearLeft/value", "volvo_tyre_rear_left", "Rear left tyre (0=ok, 1=very low, 2=low, 3=high)", code(&TYRE_PRESSURE)),
    rule!("tyres", "/rearRight/value", "volvo_tyre_rear_right", "Rear right tyre (0=ok, 1=very low, 2=low, 3=high)", code(&TYRE_PRESSURE)),
    // diagnostics
    rule!("diagnostics", "/serviceWarning/value", "volvo_service_warning", "Service (0=ok, 1=almost time, 2=time for service, 3=overdue, 4=unknown)", code(&SERVICE_WARNING)),
    rule!("diagnostics", "/serviceTrigger/value", "volvo_service_trigger", "Service trigger (1=calendar, 2=distance, 3=engine hours)", code(&SERVICE_TRIGGER)),
    rule!("diagnostics", "/engineHoursToService/value", "volvo_engine_hours_to_service", "Engine hours until service", Number,
        &[unit_label("/engineHoursToService/unit", SERVICE_UNITS)]),
    rule!("diagnostics", "/distanceToService/value", "volvo_distance_to_service", "Distance until service", Number,
        &[unit_label("/distanceToService/unit", SERVICE_UNITS)]),
    rule!("diagnostics", "/timeToService/value", "volvo_time_to_service", "Time until service", Number,
        &[unit_label("/timeToService/unit", SERVICE_UNITS)]),
    rule!("diagnostics", "/washerFluidLevelWarning/value", "volvo_washer_fluid_warning", "Washer fluid (0=ok, 1=too low)", code(&FLUID_LEVEL)),
    rule!("brakes", "/brakeFluidLevelWarning/value", "volvo_brake_fluid_warning", "Brake fluid (0=ok, 1=too low)", code(&FLUID_LEVEL)),
    rule!("fuel", "/fuelAmount/value", "volvo_fuel_amount_liters", "Fuel in tank (liters)", Number),
];

#[rustfmt::skip]
static EXTENDED_VEHICLE_RULES: &[FieldRule] = &[
    rule!("resources", "/resources/batteryChargeLevel/value", "volvo_battery_charge_level_percent", "Battery charge level (%)", Number),
    rule!("resources", "/resources/electricRange/value", "volvo_electric_range_km", "Remaining electric range (km)", Number),
    rule!("resources", "/resources/estimatedChargingTime/value", "volvo_estimated_charging_time_minutes", "Estimated time to finish charging (minutes)", Number),
    rule!("resources", "/resources/fuelAmount/value", "volvo_fuel_amount_liters", "Fuel in tank (liters)", Number),
    rule!("resources", "/resources/engineRunning/value", "volvo_engine_running", "Engine (0=stopped, 1=running)", Boolean),
];

#[rustfmt::skip]
static ENERGY_RULES: &[FieldRule] = &[
    rule!("state", "/batteryChargeLevel/value", "volvo_battery_charge_level_percent", "Battery charge level (%)", Number),
    rule!("state", "/electricRange/value", "volvo_electric_range_km", "Remaining electric range (km)", Number),
    rule!("state", "/chargingStatus/value", "volvo_charging_status", "Charging (0=idle, 1=charging, 2=scheduled, 3=discharging, 4=done, 5=error)", code(&CHARGING_STATUS)),
    rule!("state", "/chargerConnectionStatus/value", "volvo_charger_connected", "Charger (0=disconnected, 1=connected, 2=fault)", code(&CHARGER_CONNECTION)),
    rule!("state", "/chargerPowerStatus/value", "volvo_charger_power_status", "Charger power (0=none, 1=providing power, 2=fault)", code(&CHARGER_POWER)),
    rule!("state", "/chargingType/value", "volvo_charging_type", "Charging type (0=none, 1=AC, 2=DC)", code(&CHARGING_TYPE)),
    rule!("state", "/chargingPower/value", "volvo_charging_power_watts", "Charging power (W)", Number),
    rule!("state", "/chargingCurrentLimit/value", "volvo_charging_current_limit_amperes", "Charging current limit (A)", Number),
    rule!("state", "/targetBatteryChargeLevel/value", "volvo_target_battery_charge_level_percent", "Target battery charge level (%)", Number),
    rule!("state", "/estimatedChargingTimeToTargetBatteryChargeLevel/value", "volvo_estimated_charging_time_minutes", "Estimated time to finish charging (minutes)", Number),
];

#[rustfmt::skip]
static LOCATION_RULES: &[FieldRule] = &[
    rule!("location", "/geometry/coordinates/1", "volvo_location_latitude", "Last known latitude", Number),
    rule!("location", "/geometry/coordinates/0", "volvo_location_longitude", "Last known longitude", Number),
    rule!("location", "/geometry/coordinates/2", "volvo_location_altitude", "Last known altitude", Number),
    rule!("location", "/properties/heading", "volvo_location_heading_degrees", "Last known heading (degrees)", Number),
];

/// Source name used for weather rules and skip records.
pub const WEATHER_SOURCE: &str = "weather";

#[rustfmt::skip]
static WEATHER_RULES: &[FieldRule] = &[
    rule!(WEATHER_SOURCE, "/main/temp", "weather_temperature_celsius", "Current temperature at the vehicle location", Number),
    rule!(WEATHER_SOURCE, "/main/feels_like", "weather_feels_like_celsius", "Feels like temperature", Number),
    rule!(WEATHER_SOURCE, "/main/temp_min", "weather_temp_min_celsius", "Temperature minimum", Number),
    rule!(WEATHER_SOURCE, "/main/temp_max", "weather_temp_max_celsius", "Temperature maximum", Number),
    rule!(WEATHER_SOURCE, "/main/pressure", "weather_pressure_hpa", "Atmospheric pressure (hPa)", Number),
    rule!(WEATHER_SOURCE, "/main/humidity", "weather_humidity_percent", "Relative humidity (%)", Number),
];

/// Production rule table of a family.
pub fn default_rules(family: ApiFamily) -> &'static [FieldRule] {
    match family {
        ApiFamily::ExtendedVehicle => EXTENDED_VEHICLE_RULES,
        ApiFamily::ConnectedVehicle => CONNECTED_VEHICLE_RULES,
        ApiFamily::Energy => ENERGY_RULES,
        ApiFamily::Location => LOCATION_RULES,
    }
}

/// Stateless mapper over per-family rule tables.
#[derive(Debug, Clone)]
pub struct SnapshotMapper {
    rules: BTreeMap<ApiFamily, &'static [FieldRule]>,
}

impl Default for SnapshotMapper {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotMapper {
    pub fn new() -> Self {
        Self {
            rules: ApiFamily::ALL
                .iter()
                .map(|f| (*f, default_rules(*f)))
                .collect(),
        }
    }

    /// Replace the rule table of one family.
    pub fn with_rules(mut self, family: ApiFamily, rules: &'static [FieldRule]) -> Self {
        self.rules.insert(family, rules);
        self
    }

    /// Map one family's payloads to a partial snapshot.
    pub fn map(&self, family: ApiFamily, response: &FamilyResponse) -> MapOutcome {
        let rules = self.rules.get(&family).copied().unwrap_or_default();
        let outcome = apply_rules(family.name(), rules, |endpoint| response.endpoint(endpoint));
        tracing::debug!(
            family = family.name(),
            metrics = outcome.snapshot.len(),
            skipped = outcome.skipped.len(),
            "Family mapped"
        );
        outcome
    }

    /// Map a weather API response.
    pub fn map_weather(&self, body: &Value) -> MapOutcome {
        apply_rules(WEATHER_SOURCE, WEATHER_RULES, |endpoint| {
            (endpoint == WEATHER_SOURCE).then_some(body)
        })
    }
}

fn apply_rules<'a, F>(source: &str, rules: &[FieldRule], body_for: F) -> MapOutcome
where
    F: Fn(&str) -> Option<&'a Value>,
{
    let mut outcome = MapOutcome::default();

    for rule in rules {
        let Some(body) = body_for(rule.endpoint) else {
            continue;
        };
        let raw = match body.pointer(rule.pointer) {
            None | Some(Value::Null) => continue,
            Some(Value::String(s)) if s.eq_ignore_ascii_case(UNSPECIFIED) => continue,
            Some(v) => v,
        };

        match coerce(rule.coercion, raw) {
            Some(value) => {
                let labels = extract_labels(body, rule.labels);
                outcome.snapshot.insert(
                    rule.metric,
                    MetricSample {
                        value,
                        labels,
                        help: rule.help,
                    },
                );
            }
            None => {
                tracing::debug!(source, metric = rule.metric, raw = %raw, "Field could not be coerced");
                outcome.skipped.push(MappingSkipped {
                    source: source.to_string(),
                    metric: rule.metric,
                    reason: describe_failure(rule.coercion, raw),
                });
            }
        }
    }

    outcome
}

fn coerce(coercion: Coercion, raw: &Value) -> Option<f64> {
    match coercion {
        Coercion::Number => match raw {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
        .filter(|v| v.is_finite()),
        Coercion::Boolean => match raw {
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::String(s) if s.eq_ignore_ascii_case("true") => Some(1.0),
            Value::String(s) if s.eq_ignore_ascii_case("false") => Some(0.0),
            Value::Number(n) => match n.as_f64() {
                Some(v) if v == 0.0 || v == 1.0 => Some(v),
                _ => None,
            },
            _ => None,
        },
        Coercion::Codebook(book) => raw.as_str().and_then(|s| book.lookup(s)),
    }
}

fn describe_failure(coercion: Coercion, raw: &Value) -> String {
    match coercion {
        Coercion::Number => "not a number".to_string(),
        Coercion::Boolean => "not a boolean".to_string(),
        Coercion::Codebook(book) => match raw.as_str() {
            Some(s) => format!("{} not in {} codebook", s, book.name),
            None => format!("non-string value for {} codebook", book.name),
        },
    }
}

fn extract_labels(body: &Value, rules: &[LabelRule]) -> Labels {
    rules
        .iter()
        .map(|rule| {
            let value = body
                .pointer(rule.pointer)
                .and_then(Value::as_str)
                .map(|v| closed_vocabulary(v, rule.allowed))
                .unwrap_or_else(|| UNKNOWN_LABEL.to_string());
            (rule.name.to_string(), value)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn response(family: ApiFamily, endpoint: &'static str, body: Value) -> FamilyResponse {
        let mut r = FamilyResponse::new(family);
        r.endpoints.insert(endpoint, body);
        r
    }

    #[test]
    fn test_codebook_lookup_is_case_insensitive() {
        assert_eq!(OPENING_STATE.lookup("open"), Some(1.0));
        assert_eq!(OPENING_STATE.lookup(" CLOSED "), Some(0.0));
        assert_eq!(OPENING_STATE.lookup("HALF_OPEN"), None);
    }

    #[test]
    fn test_coercions() {
        assert_eq!(coerce(Number, &json!(12.5)), Some(12.5));
        assert_eq!(coerce(Number, &json!("80.0")), Some(80.0));
        assert_eq!(coerce(Number, &json!("n/a")), None);
        assert_eq!(coerce(Boolean, &json!("TRUE")), Some(1.0));
        assert_eq!(coerce(Boolean, &json!(false)), Some(0.0));
        assert_eq!(coerce(Boolean, &json!(2)), None);
    }

    #[test]
    fn test_unit_label_uses_closed_vocabulary() {
        let mapper = SnapshotMapper::new();
        let out = mapper.map(
            ApiFamily::ConnectedVehicle,
            &response(
                ApiFamily::ConnectedVehicle,
                "odometer",
                json!({"odometer": {"value": 12345, "unit": "furlongs"}}),
            ),
        );
        let sample = out.snapshot.get("volvo_odometer").unwrap();
        assert_eq!(sample.value, 12345.0);
        assert_eq!(sample.labels.get("unit").map(String::as_str), Some("other"));
    }

    #[test]
    fn test_unspecified_and_null_are_missing_not_skipped() {
        let mapper = SnapshotMapper::new();
        let out = mapper.map(
            ApiFamily::ConnectedVehicle,
            &response(
                ApiFamily::ConnectedVehicle,
                "tyres",
                json!({
                    "frontLeft": {"value": "UNSPECIFIED"},
                    "frontRight": {"value": null},
                    "rearLeft": {"value": "LOW_PRESSURE"}
                }),
            ),
        );
        assert_eq!(out.snapshot.len(), 1);
        assert_eq!(out.snapshot.value("volvo_tyre_rear_left"), Some(2.0));
        assert!(out.skipped.is_empty());
    }

    #[test]
    fn test_location_coordinates() {
        let mapper = SnapshotMapper::new();
        let out = mapper.map(
            ApiFamily::Location,
            &response(
                ApiFamily::Location,
                "location",
                json!({
                    "type": "Feature",
                    "properties": {"heading": "215"},
                    "geometry": {"type": "Point", "coordinates": [11.97, 57.70, 12.0]}
                }),
            ),
        );
        assert_eq!(out.snapshot.value("volvo_location_latitude"), Some(57.70));
        assert_eq!(out.snapshot.value("volvo_location_longitude"), Some(11.97));
        assert_eq!(out.snapshot.value("volvo_location_altitude"), Some(12.0));
        assert_eq!(out.snapshot.value("volvo_location_heading_degrees"), Some(215.0));
    }

    #[test]
    fn test_weather_mapping() {
        let mapper = SnapshotMapper::new();
        let out = mapper.map_weather(&json!({
            "main": {"temp": 14.2, "feels_like": 13.1, "pressure": 1012, "humidity": 71},
            "name": "Gothenburg"
        }));
        assert_eq!(out.snapshot.value("weather_temperature_celsius"), Some(14.2));
        assert_eq!(out.snapshot.value("weather_humidity_percent"), Some(71.0));
        assert!(!out.snapshot.contains("weather_temp_min_celsius"));
    }
}
