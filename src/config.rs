// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application configuration loaded from an optional YAML file and the environment.
//!
//! Environment variables win over file values so a container can override a
//! baked-in `config.yaml`. The result is immutable for the process lifetime.

use serde::Deserialize;
use std::env;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default polling cadence in seconds.
pub const DEFAULT_SCRAPE_INTERVAL_SECS: u64 = 300;
/// Default per-call HTTP timeout in seconds.
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 10;
/// Default metrics listener port.
pub const DEFAULT_PORT: u16 = 9101;
/// Default token persistence file.
pub const DEFAULT_TOKEN_PATH: &str = "volvo_token.json";

/// Application configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// OAuth client ID
    pub client_id: String,
    /// OAuth client secret
    pub client_secret: String,
    /// Provider API key (sent as `vcc-api-key`)
    pub api_key: String,
    /// OAuth redirect URI registered with the provider
    pub redirect_uri: String,
    /// Vehicle identification number to poll
    pub vin: String,
    /// Requested OAuth scopes
    pub scopes: Vec<String>,
    /// Polling cadence
    pub scrape_interval: Duration,
    /// Optional weather API key; enables weather enrichment
    pub weather_api_key: Option<String>,
    /// Token file; the backup lives next to it with a `.bak` suffix
    pub token_path: PathBuf,
    /// Metrics listener address
    pub listen_addr: IpAddr,
    /// Metrics listener port
    pub port: u16,
    /// Per-call HTTP timeout
    pub http_timeout: Duration,
}

/// Scope accepted either as a YAML list or a space/comma separated string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum ScopeValue {
    List(Vec<String>),
    Text(String),
}

impl ScopeValue {
    fn into_scopes(self) -> Vec<String> {
        match self {
            ScopeValue::List(list) => list
                .into_iter()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            ScopeValue::Text(text) => split_scopes(&text),
        }
    }
}

fn split_scopes(text: &str) -> Vec<String> {
    text.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Unvalidated configuration as read from file and environment.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawConfig {
    client_id: Option<String>,
    client_secret: Option<String>,
    api_key: Option<String>,
    redirect_uri: Option<String>,
    vin: Option<String>,
    scope: Option<ScopeValue>,
    scrape_interval: Option<u64>,
    weather_api_key: Option<String>,
    token_path: Option<PathBuf>,
    listen_addr: Option<String>,
    listen_port: Option<u16>,
    http_timeout: Option<u64>,
}

impl RawConfig {
    /// Parse a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(yaml).map_err(|e| ConfigError::File(e.to_string()))
    }

    /// Read and parse a YAML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::File(format!("{}: {}", path.display(), e)))?;
        Self::from_yaml_str(&text)
    }

    /// Overlay values from a key lookup (the process environment in production).
    pub fn overlay<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let text = |key: &str| lookup(key).map(|v| v.trim().to_string());

        if let Some(v) = text("VOLVO_CLIENT_ID") {
            self.client_id = Some(v);
        }
        if let Some(v) = text("VOLVO_CLIENT_SECRET") {
            self.client_secret = Some(v);
        }
        if let Some(v) = text("VOLVO_API_KEY") {
            self.api_key = Some(v);
        }
        if let Some(v) = text("VOLVO_REDIRECT_URI") {
            self.redirect_uri = Some(v);
        }
        if let Some(v) = text("VOLVO_VIN") {
            self.vin = Some(v);
        }
        if let Some(v) = text("VOLVO_SCOPE") {
            self.scope = Some(ScopeValue::Text(v));
        }
        if let Some(v) = text("WEATHER_API_KEY") {
            self.weather_api_key = Some(v);
        }
        if let Some(v) = text("TOKEN_PATH") {
            self.token_path = Some(PathBuf::from(v));
        }
        if let Some(v) = text("LISTEN_ADDR") {
            self.listen_addr = Some(v);
        }
        if let Some(v) = text("SCRAPE_INTERVAL") {
            self.scrape_interval = Some(parse_number("SCRAPE_INTERVAL", &v)?);
        }
        if let Some(v) = text("HTTP_TIMEOUT_SECS") {
            self.http_timeout = Some(parse_number("HTTP_TIMEOUT_SECS", &v)?);
        }
        if let Some(v) = text("PORT") {
            self.listen_port = Some(parse_number("PORT", &v)?);
        }

        Ok(self)
    }

    /// Validate and build the final configuration.
    pub fn build(self) -> Result<Config, ConfigError> {
        let client_id = required(self.client_id, "client_id")?;
        let client_secret = required(self.client_secret, "client_secret")?;
        let api_key = required(self.api_key, "api_key")?;
        let redirect_uri = required(self.redirect_uri, "redirect_uri")?;
        let vin = required(self.vin, "vin")?;

        reqwest::Url::parse(&redirect_uri).map_err(|e| ConfigError::Invalid {
            field: "redirect_uri",
            reason: e.to_string(),
        })?;

        let scopes = self
            .scope
            .map(ScopeValue::into_scopes)
            .unwrap_or_default();
        if scopes.is_empty() {
            return Err(ConfigError::Missing("scope"));
        }

        let scrape_interval = self
            .scrape_interval
            .unwrap_or(DEFAULT_SCRAPE_INTERVAL_SECS);
        if scrape_interval == 0 {
            return Err(ConfigError::Invalid {
                field: "scrape_interval",
                reason: "must be greater than zero".to_string(),
            });
        }

        let http_timeout = self.http_timeout.unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS);
        if http_timeout == 0 {
            return Err(ConfigError::Invalid {
                field: "http_timeout",
                reason: "must be greater than zero".to_string(),
            });
        }

        let listen_addr = self
            .listen_addr
            .as_deref()
            .unwrap_or("127.0.0.1")
            .parse::<IpAddr>()
            .map_err(|e| ConfigError::Invalid {
                field: "listen_addr",
                reason: e.to_string(),
            })?;

        Ok(Config {
            client_id,
            client_secret,
            api_key,
            redirect_uri,
            vin: vin.to_uppercase(),
            scopes,
            scrape_interval: Duration::from_secs(scrape_interval),
            weather_api_key: self.weather_api_key.filter(|k| !k.trim().is_empty()),
            token_path: self
                .token_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_TOKEN_PATH)),
            listen_addr,
            port: self.listen_port.unwrap_or(DEFAULT_PORT),
            http_timeout: Duration::from_secs(http_timeout),
        })
    }
}

fn required(value: Option<String>, field: &'static str) -> Result<String, ConfigError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or(ConfigError::Missing(field))
}

fn parse_number<T: std::str::FromStr>(field: &'static str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e: T::Err| ConfigError::Invalid {
        field,
        reason: e.to_string(),
    })
}

impl Config {
    /// Load configuration from an optional YAML file plus environment variables.
    ///
    /// A `.env` file is honored for local development.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let file_path = path
            .map(Path::to_path_buf)
            .or_else(|| env::var("CONFIG_FILE").ok().map(PathBuf::from));

        let raw = match file_path {
            Some(p) => RawConfig::from_file(&p)?,
            None => RawConfig::default(),
        };

        raw.overlay(|key| env::var(key).ok())?.build()
    }

    /// Scopes joined the way the authorization endpoint expects them.
    pub fn scope_string(&self) -> String {
        self.scopes.join(" ")
    }

    /// Config for tests only.
    pub fn test_default() -> Self {
        Self {
            client_id: "test_client_id".to_string(),
            client_secret: "test_secret".to_string(),
            api_key: "test_api_key".to_string(),
            redirect_uri: "http://localhost:8080/callback".to_string(),
            vin: "YV1XZK7V0PA000001".to_string(),
            scopes: vec![
                "openid".to_string(),
                "conve:odometer_status".to_string(),
            ],
            scrape_interval: Duration::from_secs(DEFAULT_SCRAPE_INTERVAL_SECS),
            weather_api_key: None,
            token_path: PathBuf::from(DEFAULT_TOKEN_PATH),
            listen_addr: IpAddr::from([127, 0, 0, 1]),
            port: DEFAULT_PORT,
            http_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
        }
    }
}

/// `<path>.bak` sibling of a token file.
pub fn backup_path_for(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".bak");
    PathBuf::from(name)
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required setting: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("Config file error: {0}")]
    File(String),
}
