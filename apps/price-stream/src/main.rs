//! Price Stream Server Binary
//!
//! Starts the price broadcaster and the `/prices` WebSocket endpoint.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin price-stream
//! ```
//!
//! # Environment Variables
//!
//! - `PRICE_STREAM_PORT`: Listener port (default: 8080)
//! - `PRICE_STREAM_CHANNELS`: Comma-separated channels (default: BTC,ETH,SOL)
//! - `PRICE_STREAM_PUBLISH_INTERVAL_SECS`: Publish interval (default: 10)
//! - `PRICE_STREAM_PING_INTERVAL_SECS`: Keepalive ping interval (default: 60)
//! - `PRICE_STREAM_PONG_WAIT_SECS`: Ping write deadline (default: 120)
//! - `PRICE_STREAM_WRITE_TIMEOUT_SECS`: Write deadline for ticks and acks (default: 10)
//! - `PRICE_STREAM_INITIAL_PRICES`: `SYM=price,...` starting prices
//! - `PRICE_STREAM_DRIFT`: Price model drift (default: 0.02)
//! - `PRICE_STREAM_DIFFUSION`: Price model diffusion (default: 0.04)
//! - `OTEL_ENABLED`: Enable OpenTelemetry export (default: false)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4318>)
//! - `OTEL_SERVICE_NAME`: Service name (default: price-stream)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use price_stream::infrastructure::telemetry;
use price_stream::{
    AppState, Broadcaster, GbmPriceGenerator, HealthServerState, KeepaliveConfig, StreamConfig,
    StreamServer, SubscriptionRegistry, init_metrics,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    load_dotenv();

    // Initialize telemetry (tracing + optional OpenTelemetry)
    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting price stream server");

    // Initialize Prometheus metrics
    let _metrics_handle = init_metrics();

    let config = StreamConfig::from_env()?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    let registry = Arc::new(SubscriptionRegistry::new(config.channels.clone()));

    // Broadcaster
    let source = GbmPriceGenerator::from_settings(&config.pricing, &config.channels);
    let broadcaster = Broadcaster::new(
        Arc::clone(&registry),
        source,
        config.stream.publish_interval,
        shutdown_token.clone(),
    );
    let publisher_status = broadcaster.status();

    // Server
    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        Arc::clone(&registry),
        publisher_status,
    ));
    let app_state = AppState::new(
        registry,
        KeepaliveConfig::from_stream_settings(&config.stream),
        config.stream.write_timeout,
        health_state,
        shutdown_token.clone(),
    );
    let server = StreamServer::new(config.server.port, app_state);

    // Bind before spawning so a taken port fails startup
    let listener = server.bind().await?;

    let broadcaster_handle = tokio::spawn(broadcaster.run());
    let server_shutdown = shutdown_token.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = server.serve(listener).await {
            tracing::error!(error = %e, "Stream server error");
            server_shutdown.cancel();
        }
    });

    tracing::info!("Price stream ready");

    await_shutdown(shutdown_token).await;

    let drained = tokio::time::timeout(SHUTDOWN_TIMEOUT, async {
        let _ = broadcaster_handle.await;
        let _ = server_handle.await;
    })
    .await;
    if drained.is_err() {
        tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Graceful shutdown timed out"
        );
    }

    tracing::info!("Price stream stopped");
    Ok(())
}

/// Log the parsed configuration.
fn log_config(config: &StreamConfig) {
    tracing::info!(
        port = config.server.port,
        channels = ?config.channels,
        publish_interval_secs = config.stream.publish_interval.as_secs(),
        ping_interval_secs = config.stream.ping_interval.as_secs(),
        pong_wait_secs = config.stream.pong_wait.as_secs(),
        "Configuration loaded"
    );
    tracing::debug!(
        drift = config.pricing.drift,
        diffusion = config.pricing.diffusion,
        initial_prices = ?config.pricing.initial_prices,
        "Price model"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT), or for an internal
/// component to cancel the token.
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
        () = shutdown_token.cancelled() => {
            tracing::warn!("Internal shutdown requested");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
