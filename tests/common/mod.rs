// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Shared helpers: an in-process fake of the Volvo ID and Volvo Cars APIs,
//! token records and pre-wired clients.

use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Form, Json, Router};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use volvo_exporter::config::Config;
use volvo_exporter::models::{ApiFamily, ApiFamilySpec, TokenRecord};
use volvo_exporter::routes::create_router;
use volvo_exporter::services::{
    CredentialStore, MemoryCredentialStore, MetricRegistry, OAuthEndpoints, RetryPolicy,
    TokenAuthenticator, VehicleApiClient,
};
use volvo_exporter::AppState;

/// VIN of `Config::test_default()`.
#[allow(dead_code)]
pub const TEST_VIN: &str = "YV1XZK7V0PA000001";

pub const TOKEN_PATH: &str = "/oauth/token";
pub const AUTHORIZE_PATH: &str = "/oauth/authorize";

/// Mutable behavior and counters of the fake provider.
#[derive(Default)]
pub struct ProviderState {
    pub token_requests: AtomicU32,
    pub refresh_requests: AtomicU32,
    pub code_requests: AtomicU32,
    issued: AtomicU32,
    token_delay_ms: AtomicU64,
    token_lifetime: Mutex<Option<i64>>,
    token_statuses: Mutex<VecDeque<u16>>,
    last_token_form: Mutex<Option<HashMap<String, String>>>,
    enforce_bearer: AtomicBool,
    accepted_token: Mutex<Option<String>>,
    endpoint_statuses: Mutex<HashMap<String, VecDeque<u16>>>,
    bodies: Mutex<HashMap<String, Value>>,
    hits: Mutex<HashMap<String, u32>>,
    last_headers: Mutex<HashMap<String, HeaderMap>>,
}

/// Fake identity provider plus vehicle API on an ephemeral local port.
pub struct FakeProvider {
    pub base_url: String,
    pub state: Arc<ProviderState>,
}

#[allow(dead_code)]
impl FakeProvider {
    pub async fn start() -> Self {
        let state = Arc::new(ProviderState::default());
        let app = Router::new()
            .route(TOKEN_PATH, post(token_endpoint))
            .fallback(api_endpoint)
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind fake provider");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        Self {
            base_url: format!("http://{}", addr),
            state,
        }
    }

    pub fn endpoints(&self) -> OAuthEndpoints {
        OAuthEndpoints {
            authorize_url: format!("{}{}", self.base_url, AUTHORIZE_PATH),
            token_url: format!("{}{}", self.base_url, TOKEN_PATH),
        }
    }

    /// Production family definition re-homed onto this server.
    pub fn family(&self, family: ApiFamily) -> ApiFamilySpec {
        let spec = ApiFamilySpec::for_family(family);
        let path = reqwest::Url::parse(&spec.base_url)
            .expect("family base url")
            .path()
            .to_string();
        spec.with_base_url(format!("{}{}", self.base_url, path))
    }

    pub fn families(&self) -> Vec<ApiFamilySpec> {
        ApiFamily::ALL.iter().map(|f| self.family(*f)).collect()
    }

    /// Literal request path of an endpoint for [`TEST_VIN`].
    pub fn path(&self, family: ApiFamily, endpoint: &str) -> String {
        let spec = self.family(family);
        let endpoint = spec.endpoint(endpoint).expect("known endpoint");
        spec.route_template(endpoint).replace("{vin}", TEST_VIN)
    }

    pub fn set_body(&self, path: &str, body: Value) {
        self.state
            .bodies
            .lock()
            .unwrap()
            .insert(path.to_string(), body);
    }

    /// Serve the fixture payloads for every family endpoint.
    pub fn load_vehicle_fixtures(&self) {
        let connected = fixture("connected_vehicle.json");
        if let Value::Object(endpoints) = connected {
            for (name, body) in endpoints {
                self.set_body(&self.path(ApiFamily::ConnectedVehicle, &name), body);
            }
        }
        self.set_body(
            &self.path(ApiFamily::ExtendedVehicle, "resources"),
            fixture("extended_vehicle.json"),
        );
        self.set_body(
            &self.path(ApiFamily::Energy, "state"),
            fixture("energy_state.json"),
        );
        self.set_body(
            &self.path(ApiFamily::Location, "location"),
            fixture("location.json"),
        );
    }

    /// Statuses returned, in order, by the next requests to `path`.
    pub fn script_statuses(&self, path: &str, statuses: &[u16]) {
        self.state
            .endpoint_statuses
            .lock()
            .unwrap()
            .insert(path.to_string(), statuses.iter().copied().collect());
    }

    /// Statuses returned, in order, by the next token requests.
    pub fn script_token_statuses(&self, statuses: &[u16]) {
        *self.state.token_statuses.lock().unwrap() = statuses.iter().copied().collect();
    }

    /// Hold every token response for `delay`.
    pub fn delay_token_responses(&self, delay: Duration) {
        self.state
            .token_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Reject every access token issued so far; the next issued one is accepted.
    /// Lifetime reported in `expires_in` by later token responses.
    pub fn set_token_lifetime(&self, secs: i64) {
        *self.state.token_lifetime.lock().unwrap() = Some(secs);
    }

    pub fn revoke_access_tokens(&self) {
        *self.state.accepted_token.lock().unwrap() = Some("revoked".to_string());
        self.state.enforce_bearer.store(true, Ordering::SeqCst);
    }

    pub fn hits(&self, path: &str) -> u32 {
        self.state
            .hits
            .lock()
            .unwrap()
            .get(path)
            .copied()
            .unwrap_or(0)
    }

    pub fn last_headers(&self, path: &str) -> Option<HeaderMap> {
        self.state.last_headers.lock().unwrap().get(path).cloned()
    }

    pub fn last_token_form(&self) -> Option<HashMap<String, String>> {
        self.state.last_token_form.lock().unwrap().clone()
    }

    pub fn token_requests(&self) -> u32 {
        self.state.token_requests.load(Ordering::SeqCst)
    }

    pub fn refresh_requests(&self) -> u32 {
        self.state.refresh_requests.load(Ordering::SeqCst)
    }

    pub fn code_requests(&self) -> u32 {
        self.state.code_requests.load(Ordering::SeqCst)
    }
}

async fn token_endpoint(
    State(state): State<Arc<ProviderState>>,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    state.token_requests.fetch_add(1, Ordering::SeqCst);
    match form.get("grant_type").map(String::as_str) {
        Some("refresh_token") => state.refresh_requests.fetch_add(1, Ordering::SeqCst),
        Some("authorization_code") => state.code_requests.fetch_add(1, Ordering::SeqCst),
        _ => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": "unsupported_grant_type"})),
            )
                .into_response()
        }
    };
    *state.last_token_form.lock().unwrap() = Some(form);

    let delay = state.token_delay_ms.load(Ordering::SeqCst);
    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }

    let status = state
        .token_statuses
        .lock()
        .unwrap()
        .pop_front()
        .unwrap_or(200);
    if status != 200 {
        let error = if status == 400 || status == 401 {
            "invalid_grant"
        } else {
            "temporarily_unavailable"
        };
        return (
            StatusCode::from_u16(status).unwrap(),
            Json(json!({"error": error, "error_description": "scripted"})),
        )
            .into_response();
    }

    let n = state.issued.fetch_add(1, Ordering::SeqCst) + 1;
    let access_token = format!("access-{}", n);
    *state.accepted_token.lock().unwrap() = Some(access_token.clone());

    Json(json!({
        "access_token": access_token,
        "refresh_token": format!("refresh-{}", n),
        "expires_in": state.token_lifetime.lock().unwrap().unwrap_or(1799),
        "token_type": "Bearer"
    }))
    .into_response()
}

async fn api_endpoint(
    State(state): State<Arc<ProviderState>>,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    let path = uri.path().to_string();
    *state.hits.lock().unwrap().entry(path.clone()).or_default() += 1;
    state
        .last_headers
        .lock()
        .unwrap()
        .insert(path.clone(), headers.clone());

    let scripted = state
        .endpoint_statuses
        .lock()
        .unwrap()
        .get_mut(&path)
        .and_then(VecDeque::pop_front);
    if let Some(status) = scripted.filter(|s| *s != 200) {
        return (
            StatusCode::from_u16(status).unwrap(),
            Json(json!({"status": status, "error": {"message": "scripted"}})),
        )
            .into_response();
    }

    if state.enforce_bearer.load(Ordering::SeqCst) {
        let presented = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::to_string);
        let accepted = state.accepted_token.lock().unwrap().clone();
        if presented != accepted {
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({"error": {"message": "invalid token"}})),
            )
                .into_response();
        }
    }

    let body = state.bodies.lock().unwrap().get(&path).cloned();
    match body {
        Some(body) => Json(body).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": {"message": "not found"}})),
        )
            .into_response(),
    }
}

/// Parsed JSON fixture from `tests/fixtures`.
pub fn fixture(name: &str) -> Value {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name);
    let text = std::fs::read_to_string(&path).expect("read fixture");
    serde_json::from_str(&text).expect("parse fixture")
}

/// Token record expiring `expires_in_secs` from now, at whole-second
/// precision like the on-disk format.
#[allow(dead_code)]
pub fn token_record(access: &str, refresh: &str, expires_in_secs: i64) -> TokenRecord {
    let expires_at = Utc::now() + ChronoDuration::seconds(expires_in_secs);
    TokenRecord {
        access_token: access.to_string(),
        refresh_token: refresh.to_string(),
        expires_at: DateTime::from_timestamp(expires_at.timestamp(), 0).expect("timestamp"),
        token_type: "Bearer".to_string(),
    }
}

/// Authenticator talking to `provider`, without backoff delays.
#[allow(dead_code)]
pub fn test_authenticator(
    provider: &FakeProvider,
    store: Arc<dyn CredentialStore>,
    registry: &Arc<MetricRegistry>,
) -> TokenAuthenticator {
    TokenAuthenticator::new(&Config::test_default(), store)
        .expect("authenticator")
        .with_endpoints(provider.endpoints())
        .with_retry_policy(RetryPolicy::immediate(3))
        .with_recorder(registry.clone())
}

/// Everything needed to drive the client against the fake provider.
#[allow(dead_code)]
pub struct Harness {
    pub provider: FakeProvider,
    pub store: Arc<MemoryCredentialStore>,
    pub registry: Arc<MetricRegistry>,
    pub authenticator: Arc<TokenAuthenticator>,
    pub client: Arc<VehicleApiClient>,
}

#[allow(dead_code)]
impl Harness {
    /// Harness whose store starts with `record`, if any.
    pub async fn new(record: Option<TokenRecord>) -> Self {
        let provider = FakeProvider::start().await;
        let store = Arc::new(match record {
            Some(r) => MemoryCredentialStore::with_record(r),
            None => MemoryCredentialStore::new(),
        });
        let registry = Arc::new(MetricRegistry::new());
        let authenticator = Arc::new(test_authenticator(&provider, store.clone(), &registry));
        let client = Arc::new(
            VehicleApiClient::new(
                &Config::test_default(),
                authenticator.clone(),
                registry.clone(),
            )
            .expect("client")
            .with_retry_policy(RetryPolicy::immediate(3)),
        );

        Self {
            provider,
            store,
            registry,
            authenticator,
            client,
        }
    }

    /// Harness with a stored token valid for an hour.
    pub async fn authenticated() -> Self {
        Self::new(Some(token_record("access-0", "refresh-0", 3600))).await
    }
}

/// Create a test app over a fresh registry and an empty credential store.
/// Returns the router and the shared state.
#[allow(dead_code)]
pub fn create_test_app() -> (axum::Router, Arc<AppState>) {
    let config = Config::test_default();
    let registry = Arc::new(MetricRegistry::new());
    let store = Arc::new(MemoryCredentialStore::new());
    let authenticator = Arc::new(
        TokenAuthenticator::new(&config, store)
            .expect("authenticator")
            .with_recorder(registry.clone()),
    );

    let state = Arc::new(AppState {
        config,
        registry,
        authenticator,
    });

    (create_router(state.clone()), state)
}
