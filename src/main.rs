// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Volvo Exporter
//!
//! `serve` runs the unattended poll loop and the scrape endpoint.
//! `bootstrap` runs the one-time interactive authorization.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use volvo_exporter::{
    config::Config,
    models::{ApiFamily, ApiFamilySpec},
    services::{
        FileCredentialStore, MetricRegistry, PollingScheduler, TokenAuthenticator,
        VehicleApiClient, WeatherClient,
    },
    AppState,
};

#[derive(Debug, Parser)]
#[command(name = "volvo-exporter", version, about = "Volvo vehicle metrics exporter")]
struct Cli {
    /// Optional YAML config file; environment variables override its values
    #[arg(long, env = "CONFIG_FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Poll the vehicle and serve /metrics (default)
    Serve,
    /// Authorize interactively and store the first token
    Bootstrap,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_logging();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref()).context("invalid configuration")?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Bootstrap => bootstrap(config).await,
    }
}

/// Build the authenticator shared by both commands.
fn authenticator(config: &Config, registry: &Arc<MetricRegistry>) -> anyhow::Result<Arc<TokenAuthenticator>> {
    let store = Arc::new(FileCredentialStore::new(config.token_path.clone()));
    let authenticator = TokenAuthenticator::new(config, store)?.with_recorder(registry.clone());
    Ok(Arc::new(authenticator))
}

async fn serve(config: Config) -> anyhow::Result<()> {
    tracing::info!(
        vin = %config.vin,
        interval_secs = config.scrape_interval.as_secs(),
        token_path = %config.token_path.display(),
        "Starting Volvo exporter"
    );

    let registry = Arc::new(MetricRegistry::new());
    let authenticator = authenticator(&config, &registry)?;
    let client = Arc::new(VehicleApiClient::new(
        &config,
        authenticator.clone(),
        registry.clone(),
    )?);

    let mut scheduler = PollingScheduler::new(
        &config.vin,
        config.scrape_interval,
        authenticator.clone(),
        client,
        registry.clone(),
    );
    if let Some(key) = &config.weather_api_key {
        scheduler = scheduler.with_weather(WeatherClient::new(
            key.clone(),
            config.http_timeout,
            registry.clone(),
        )?);
        tracing::info!("Weather enrichment enabled");
    }

    let addr = SocketAddr::new(config.listen_addr, config.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    tracing::info!(address = %addr, "Metrics server listening");

    let state = Arc::new(AppState {
        config,
        registry,
        authenticator,
    });
    let app = volvo_exporter::routes::create_router(state);

    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());

    let poller = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { scheduler.run(shutdown.cancelled_owned()).await })
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .await?;

    // The poll loop exits between cycles, so an in-flight token write completes.
    poller.await.context("poll loop panicked")?;
    tracing::info!("Shutdown complete");
    Ok(())
}

async fn bootstrap(config: Config) -> anyhow::Result<()> {
    let registry = Arc::new(MetricRegistry::new());
    let authenticator = authenticator(&config, &registry)?;

    let url = authenticator.begin_authorization().await?;
    println!("Open this URL in a browser and sign in:\n\n{}\n", url);
    println!("Then paste the URL you were redirected to (or just the code):");

    let mut line = String::new();
    BufReader::new(tokio::io::stdin())
        .read_line(&mut line)
        .await
        .context("failed to read callback from stdin")?;

    let record = authenticator.complete_authorization(line.trim()).await?;
    println!(
        "Token stored at {} (expires {})",
        config.token_path.display(),
        volvo_exporter::time_utils::format_utc_rfc3339(record.expires_at)
    );

    let client = VehicleApiClient::new(&config, authenticator.clone(), registry)?;
    let connected = ApiFamilySpec::for_family(ApiFamily::ConnectedVehicle);
    match client.list_vehicles(&connected).await {
        Ok(vins) => {
            println!("Vehicles on this account: {}", vins.join(", "));
            if !vins.iter().any(|v| v.eq_ignore_ascii_case(&config.vin)) {
                tracing::warn!(vin = %config.vin, "Configured VIN is not on this account");
            }
        }
        Err(e) => tracing::warn!(error = %e, "Could not list vehicles"),
    }
    Ok(())
}

/// Cancel `shutdown` on SIGTERM or Ctrl-C.
fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).ok();

        #[cfg(unix)]
        let terminate = async {
            match sigterm.as_mut() {
                Some(s) => {
                    s.recv().await;
                }
                None => std::future::pending::<()>().await,
            }
        };
        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = tokio::signal::ctrl_c() => tracing::info!("Received Ctrl-C"),
            _ = terminate => tracing::info!("Received SIGTERM"),
        }
        shutdown.cancel();
    });
}

/// Initialize structured JSON logging.
///
/// `RUST_LOG` wins when set; otherwise `LOG_LEVEL` picks info or debug.
fn init_logging() {
    let level = match std::env::var("LOG_LEVEL") {
        Ok(v) if v.trim().eq_ignore_ascii_case("debug") => "debug",
        _ => "info",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},hyper=info,h2=info,rustls=info", level)));

    let format = tracing_subscriber::fmt::layer()
        .json()
        .with_target(false)
        .with_current_span(true)
        .flatten_event(true);

    tracing_subscriber::registry().with(filter).with(format).init();
}
