// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Services module - business logic layer.

pub mod authenticator;
pub mod credential_store;
pub mod mapper;
pub mod pkce;
pub mod registry;
pub mod retry;
pub mod scheduler;
pub mod vehicle_api;
pub mod weather;

pub use authenticator::{AuthPhase, OAuthEndpoints, TokenAuthenticator};
pub use credential_store::{
    CredentialStore, FileCredentialStore, MemoryCredentialStore, StoreError,
};
pub use mapper::{MapOutcome, MappingSkipped, SnapshotMapper};
pub use registry::MetricRegistry;
pub use retry::RetryPolicy;
pub use scheduler::{CycleOutcome, CycleReport, PollingScheduler};
pub use vehicle_api::{FamilyResponse, VehicleApiClient};
pub use weather::WeatherClient;
