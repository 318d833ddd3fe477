// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! The provider API families polled each cycle.
//!
//! Each family is static data: a base URL, the endpoint paths below it and the
//! envelope its responses come wrapped in. Adding a family means adding a
//! table entry here plus its field rules in the mapper.

use serde::Serialize;
use serde_json::Value;
use std::fmt;

/// Placeholder substituted with the VIN in endpoint paths.
pub const VIN_PLACEHOLDER: &str = "{vin}";

/// API family identifier.
///
/// Declaration order is the merge precedence: when two families produce the
/// same metric name, the later family wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiFamily {
    ExtendedVehicle,
    ConnectedVehicle,
    Energy,
    Location,
}

impl ApiFamily {
    /// All families, in merge precedence order (lowest first).
    pub const ALL: [ApiFamily; 4] = [
        ApiFamily::ExtendedVehicle,
        ApiFamily::ConnectedVehicle,
        ApiFamily::Energy,
        ApiFamily::Location,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ApiFamily::ExtendedVehicle => "extended_vehicle",
            ApiFamily::ConnectedVehicle => "connected_vehicle",
            ApiFamily::Energy => "energy",
            ApiFamily::Location => "location",
        }
    }

    pub fn precedence(&self) -> usize {
        Self::ALL
            .iter()
            .position(|f| f == self)
            .unwrap_or(Self::ALL.len())
    }
}

impl fmt::Display for ApiFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How a family wraps its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseShape {
    /// `{"data": {...}}`
    DataEnvelope,
    /// The payload is the body itself.
    Bare,
}

impl ResponseShape {
    /// Strip the envelope, falling back to the whole body if it is missing.
    pub fn unwrap_body(&self, body: Value) -> Value {
        match self {
            ResponseShape::DataEnvelope => match body {
                Value::Object(mut map) if map.contains_key("data") => {
                    map.remove("data").unwrap_or(Value::Null)
                }
                other => other,
            },
            ResponseShape::Bare => body,
        }
    }
}

/// One endpoint within a family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointSpec {
    /// Short name used in logs, operation IDs and mapper rules
    pub name: &'static str,
    /// Path below the family base URL, containing `{vin}`
    pub path: &'static str,
}

#[rustfmt::skip]
const CONNECTED_VEHICLE_ENDPOINTS: &[EndpointSpec] = &[
    EndpointSpec { name: "details", path: "/vehicles/{vin}" },
    EndpointSpec { name: "doors", path: "/vehicles/{vin}/doors" },
    EndpointSpec { name: "windows", path: "/vehicles/{vin}/windows" },
    EndpointSpec { name: "odometer", path: "/vehicles/{vin}/odometer" },
    EndpointSpec { name: "statistics", path: "/vehicles/{vin}/statistics" },
    EndpointSpec { name: "engine-status", path: "/vehicles/{vin}/engine-status" },
    EndpointSpec { name: "engine", path: "/vehicles/{vin}/engine" },
    EndpointSpec { name: "warnings", path: "/vehicles/{vin}/warnings" },
    EndpointSpec { name: "tyres", path: "/vehicles/{vin}/tyres" },
    EndpointSpec { name: "diagnostics", path: "/vehicles/{vin}/diagnostics" },
    EndpointSpec { name: "brakes", path: "/vehicles/{vin}/brakes" },
    EndpointSpec { name: "fuel", path: "/vehicles/{vin}/fuel" },
];

const EXTENDED_VEHICLE_ENDPOINTS: &[EndpointSpec] = &[EndpointSpec {
    name: "resources",
    path: "/vehicles/{vin}/resources",
}];

const ENERGY_ENDPOINTS: &[EndpointSpec] = &[EndpointSpec {
    name: "state",
    path: "/vehicles/{vin}/state",
}];

const LOCATION_ENDPOINTS: &[EndpointSpec] = &[EndpointSpec {
    name: "location",
    path: "/vehicles/{vin}/location",
}];

/// Static description of one API family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiFamilySpec {
    pub family: ApiFamily,
    pub base_url: String,
    pub endpoints: &'static [EndpointSpec],
    pub response_shape: ResponseShape,
}

impl ApiFamilySpec {
    /// Production definition of a family.
    pub fn for_family(family: ApiFamily) -> Self {
        let (base_url, endpoints, response_shape) = match family {
            ApiFamily::ConnectedVehicle => (
                "https://api.volvocars.com/connected-vehicle/v2",
                CONNECTED_VEHICLE_ENDPOINTS,
                ResponseShape::DataEnvelope,
            ),
            ApiFamily::ExtendedVehicle => (
                "https://api.volvocars.com/extended-vehicle/v1",
                EXTENDED_VEHICLE_ENDPOINTS,
                ResponseShape::Bare,
            ),
            ApiFamily::Energy => (
                "https://api.volvocars.com/energy/v2",
                ENERGY_ENDPOINTS,
                ResponseShape::Bare,
            ),
            ApiFamily::Location => (
                "https://api.volvocars.com/location/v1",
                LOCATION_ENDPOINTS,
                ResponseShape::DataEnvelope,
            ),
        };

        Self {
            family,
            base_url: base_url.to_string(),
            endpoints,
            response_shape,
        }
    }

    /// All four production families in precedence order.
    pub fn defaults() -> Vec<Self> {
        ApiFamily::ALL.iter().copied().map(Self::for_family).collect()
    }

    /// Point the family at another host (tests, proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Restrict the family to a subset of its endpoints.
    pub fn with_endpoints(mut self, endpoints: &'static [EndpointSpec]) -> Self {
        self.endpoints = endpoints;
        self
    }

    pub fn endpoint(&self, name: &str) -> Option<&'static EndpointSpec> {
        self.endpoints.iter().find(|e| e.name == name)
    }

    /// Concrete request URL for a VIN.
    pub fn url_for(&self, endpoint: &EndpointSpec, vin: &str) -> String {
        format!(
            "{}{}",
            self.base_url,
            endpoint
                .path
                .replace(VIN_PLACEHOLDER, &urlencoding::encode(vin))
        )
    }

    /// Request path with the VIN left as a placeholder, used as a metric label.
    pub fn route_template(&self, endpoint: &EndpointSpec) -> String {
        let base_path = reqwest::Url::parse(&self.base_url)
            .map(|u| u.path().trim_end_matches('/').to_string())
            .unwrap_or_default();
        format!("{}{}", base_path, endpoint.path)
    }
}

/// Endpoint listing the vehicles on the account.
pub const VEHICLE_LIST_ENDPOINT: EndpointSpec = EndpointSpec {
    name: "vehicles",
    path: "/vehicles",
};
