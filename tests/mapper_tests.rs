// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Mapping of recorded provider payloads to metric samples.

use serde_json::{json, Value};
use volvo_exporter::models::{ApiFamily, ResponseShape, VehicleSnapshot};
use volvo_exporter::services::{FamilyResponse, SnapshotMapper};

mod common;
use common::fixture;

/// Build a family response the way the client does: envelope stripped.
fn connected_response() -> FamilyResponse {
    let mut response = FamilyResponse::new(ApiFamily::ConnectedVehicle);
    if let Value::Object(endpoints) = fixture("connected_vehicle.json") {
        for (name, body) in endpoints {
            let name: &'static str = Box::leak(name.into_boxed_str());
            response
                .endpoints
                .insert(name, ResponseShape::DataEnvelope.unwrap_body(body));
        }
    }
    response
}

fn single(family: ApiFamily, endpoint: &'static str, body: Value) -> FamilyResponse {
    let mut response = FamilyResponse::new(family);
    response.endpoints.insert(endpoint, body);
    response
}

#[test]
fn test_connected_vehicle_fixture() {
    let out = SnapshotMapper::new().map(ApiFamily::ConnectedVehicle, &connected_response());
    let s = &out.snapshot;

    assert_eq!(s.value("volvo_lock_state"), Some(1.0));
    assert_eq!(s.value("volvo_door_front_left"), Some(0.0));
    assert_eq!(s.value("volvo_door_front_right"), Some(1.0));
    assert_eq!(s.value("volvo_tailgate"), Some(2.0));
    assert_eq!(s.value("volvo_odometer"), Some(48213.0));
    assert_eq!(
        s.get("volvo_odometer").unwrap().labels.get("unit").map(String::as_str),
        Some("km")
    );
    assert_eq!(s.value("volvo_engine_running"), Some(0.0));
    assert_eq!(s.value("volvo_brake_light_right_warning"), Some(1.0));
    assert_eq!(s.value("volvo_tyre_rear_left"), Some(2.0));
    assert_eq!(s.value("volvo_washer_fluid_warning"), Some(1.0));
    assert_eq!(s.value("volvo_service_trigger"), Some(2.0));
    assert_eq!(s.value("volvo_fuel_amount_liters"), Some(42.5));
    assert_eq!(s.value("volvo_battery_capacity_kwh"), Some(18.8));
    assert!(out.skipped.is_empty());
}

#[test]
fn test_missing_fields_are_omitted_not_zeroed() {
    let out = SnapshotMapper::new().map(ApiFamily::ConnectedVehicle, &connected_response());

    // UNSPECIFIED in the payload
    assert!(!out.snapshot.contains("volvo_tank_lid"));
    assert!(!out.snapshot.contains("volvo_fog_light_front_warning"));
    // Not in the payload at all
    assert!(!out.snapshot.contains("volvo_average_speed_automatic"));
    assert!(!out.snapshot.contains("volvo_hazard_light_warning"));
}

#[test]
fn test_mapping_is_idempotent() {
    let mapper = SnapshotMapper::new();
    let response = connected_response();

    let first = mapper.map(ApiFamily::ConnectedVehicle, &response);
    let second = mapper.map(ApiFamily::ConnectedVehicle, &response);

    assert_eq!(first, second);
}

#[test]
fn test_door_codebook() {
    let mapper = SnapshotMapper::new();
    let out = mapper.map(
        ApiFamily::ConnectedVehicle,
        &single(
            ApiFamily::ConnectedVehicle,
            "doors",
            json!({
                "frontLeftDoor": {"value": "OPEN"},
                "frontRightDoor": {"value": "CLOSED"},
                "rearLeftDoor": {"value": "HALF_OPEN"}
            }),
        ),
    );

    assert_eq!(out.snapshot.value("volvo_door_front_left"), Some(1.0));
    assert_eq!(out.snapshot.value("volvo_door_front_right"), Some(0.0));
    assert!(!out.snapshot.contains("volvo_door_rear_left"));

    assert_eq!(out.skipped.len(), 1);
    assert_eq!(out.skipped[0].metric, "volvo_door_rear_left");
    assert_eq!(out.skipped[0].source, "connected_vehicle");
}

#[test]
fn test_service_trigger_codebook() {
    let mapper = SnapshotMapper::new();
    let map = |value: &str| {
        mapper.map(
            ApiFamily::ConnectedVehicle,
            &single(
                ApiFamily::ConnectedVehicle,
                "diagnostics",
                json!({"serviceTrigger": {"value": value}}),
            ),
        )
    };

    assert_eq!(map("CALENDAR").snapshot.value("volvo_service_trigger"), Some(1.0));
    assert_eq!(map("ENGINE_HOURS").snapshot.value("volvo_service_trigger"), Some(3.0));

    let unknown = map("MOON_PHASE");
    assert!(!unknown.snapshot.contains("volvo_service_trigger"));
    assert_eq!(unknown.skipped.len(), 1);
}

#[test]
fn test_uncoercible_number_skips_only_that_field() {
    let out = SnapshotMapper::new().map(
        ApiFamily::Energy,
        &single(
            ApiFamily::Energy,
            "state",
            json!({
                "batteryChargeLevel": {"value": "eighty"},
                "electricRange": {"value": 54}
            }),
        ),
    );

    assert!(!out.snapshot.contains("volvo_battery_charge_level_percent"));
    assert_eq!(out.snapshot.value("volvo_electric_range_km"), Some(54.0));
    assert_eq!(out.skipped.len(), 1);
}

#[test]
fn test_unknown_fields_are_ignored() {
    let mapper = SnapshotMapper::new();
    let mut body = fixture("energy_state.json");
    body["quantumFluxLevel"] = json!({"status": "OK", "value": "MAXIMUM"});

    let with_extra = mapper.map(ApiFamily::Energy, &single(ApiFamily::Energy, "state", body));
    let plain = mapper.map(
        ApiFamily::Energy,
        &single(ApiFamily::Energy, "state", fixture("energy_state.json")),
    );

    assert_eq!(with_extra, plain);
    assert!(with_extra.skipped.is_empty());
}

#[test]
fn test_energy_fixture() {
    let out = SnapshotMapper::new().map(
        ApiFamily::Energy,
        &single(ApiFamily::Energy, "state", fixture("energy_state.json")),
    );
    let s = &out.snapshot;

    assert_eq!(s.value("volvo_battery_charge_level_percent"), Some(80.5));
    assert_eq!(s.value("volvo_charging_status"), Some(1.0));
    assert_eq!(s.value("volvo_charger_connected"), Some(1.0));
    assert_eq!(s.value("volvo_charging_type"), Some(1.0));
    assert_eq!(s.value("volvo_charging_power_watts"), Some(3400.0));
    // An error entry has no value and is left out.
    assert!(!s.contains("volvo_charging_current_limit_amperes"));
}

#[test]
fn test_overlapping_metrics_follow_precedence() {
    let mapper = SnapshotMapper::new();
    let extended = mapper.map(
        ApiFamily::ExtendedVehicle,
        &single(
            ApiFamily::ExtendedVehicle,
            "resources",
            fixture("extended_vehicle.json"),
        ),
    );
    let energy = mapper.map(
        ApiFamily::Energy,
        &single(ApiFamily::Energy, "state", fixture("energy_state.json")),
    );
    let connected = mapper.map(ApiFamily::ConnectedVehicle, &connected_response());

    assert_eq!(
        extended.snapshot.value("volvo_battery_charge_level_percent"),
        Some(79.0)
    );

    // Input order must not matter.
    let merged = VehicleSnapshot::merge_in_precedence(vec![
        (ApiFamily::Energy, energy.snapshot.clone()),
        (ApiFamily::ConnectedVehicle, connected.snapshot.clone()),
        (ApiFamily::ExtendedVehicle, extended.snapshot.clone()),
    ]);
    let reversed = VehicleSnapshot::merge_in_precedence(vec![
        (ApiFamily::ExtendedVehicle, extended.snapshot),
        (ApiFamily::ConnectedVehicle, connected.snapshot),
        (ApiFamily::Energy, energy.snapshot),
    ]);
    assert_eq!(merged, reversed);

    // Energy outranks Extended Vehicle.
    assert_eq!(merged.value("volvo_battery_charge_level_percent"), Some(80.5));
    assert_eq!(merged.value("volvo_electric_range_km"), Some(54.0));
    assert_eq!(merged.value("volvo_estimated_charging_time_minutes"), Some(95.0));
    // Connected Vehicle outranks Extended Vehicle.
    assert_eq!(merged.value("volvo_fuel_amount_liters"), Some(42.5));
}

#[test]
fn test_location_and_weather_fixtures() {
    let mapper = SnapshotMapper::new();
    let location = mapper.map(
        ApiFamily::Location,
        &single(
            ApiFamily::Location,
            "location",
            ResponseShape::DataEnvelope.unwrap_body(fixture("location.json")),
        ),
    );
    assert_eq!(location.snapshot.value("volvo_location_latitude"), Some(57.7089));
    assert_eq!(location.snapshot.value("volvo_location_longitude"), Some(11.9746));
    assert_eq!(location.snapshot.value("volvo_location_heading_degrees"), Some(215.0));

    let weather = mapper.map_weather(&fixture("weather.json"));
    assert_eq!(weather.snapshot.len(), 6);
    assert_eq!(weather.snapshot.value("weather_temperature_celsius"), Some(9.4));
    assert_eq!(weather.snapshot.value("weather_pressure_hpa"), Some(1009.0));
}
