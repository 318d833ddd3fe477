// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Data models for the application.

pub mod family;
pub mod poll;
pub mod snapshot;
pub mod token;
pub mod vehicle;

pub use family::{ApiFamily, ApiFamilySpec, EndpointSpec, ResponseShape};
pub use poll::{PollRecorder, PollResult};
pub use snapshot::{Labels, MetricSample, VehicleSnapshot};
pub use token::{TokenRecord, TokenResponse};
pub use vehicle::VehicleLabels;
