//! Stream Server
//!
//! axum server for the price feed. `GET /prices` upgrades to a WebSocket and
//! starts a `ConnectionSession`; the health and metrics routes share the same
//! listener.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use futures_util::StreamExt;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use super::sink::{WebSocketSink, inbound_frames};
use crate::application::ports::{SharedRegistry, SharedSink};
use crate::application::services::{ConnectionSession, KeepaliveConfig};
use crate::domain::streaming::ClientId;
use crate::infrastructure::health::{self, HealthServerState};
use crate::infrastructure::metrics;

/// Path of the WebSocket endpoint.
pub const PRICES_PATH: &str = "/prices";

// =============================================================================
// State
// =============================================================================

/// Shared state of the `/prices` handler.
#[derive(Clone)]
pub struct AppState {
    registry: SharedRegistry,
    keepalive: KeepaliveConfig,
    write_timeout: Duration,
    health: Arc<HealthServerState>,
    shutdown: CancellationToken,
}

impl AppState {
    /// Create handler state.
    #[must_use]
    pub const fn new(
        registry: SharedRegistry,
        keepalive: KeepaliveConfig,
        write_timeout: Duration,
        health: Arc<HealthServerState>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            registry,
            keepalive,
            write_timeout,
            health,
            shutdown,
        }
    }
}

/// Build the full router: `/prices` plus the health routes.
pub fn build_router(state: AppState) -> Router {
    let health_state = Arc::clone(&state.health);
    Router::new()
        .route(PRICES_PATH, get(ws_handler))
        .with_state(state)
        .merge(health::router(health_state))
}

// =============================================================================
// Server
// =============================================================================

/// HTTP and WebSocket server.
pub struct StreamServer {
    addr: SocketAddr,
    state: AppState,
}

impl StreamServer {
    /// Create a server bound to `0.0.0.0:port` once run.
    #[must_use]
    pub fn new(port: u16, state: AppState) -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], port)),
            state,
        }
    }

    /// Bind the listener.
    ///
    /// # Errors
    ///
    /// Returns `BindFailed` if the address is unavailable.
    pub async fn bind(&self) -> Result<TcpListener, StreamServerError> {
        TcpListener::bind(self.addr)
            .await
            .map_err(|e| StreamServerError::BindFailed(self.addr, e.to_string()))
    }

    /// Bind and serve until the shutdown token is cancelled.
    ///
    /// # Errors
    ///
    /// Returns `StreamServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), StreamServerError> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener until the shutdown token is
    /// cancelled.
    ///
    /// # Errors
    ///
    /// Returns `ServerFailed` if the HTTP server fails while running.
    pub async fn serve(self, listener: TcpListener) -> Result<(), StreamServerError> {
        let local_addr = listener
            .local_addr()
            .map_err(|e| StreamServerError::ServerFailed(e.to_string()))?;
        let shutdown = self.state.shutdown.clone();
        let app = build_router(self.state);

        tracing::info!(addr = %local_addr, path = PRICES_PATH, "Stream server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await
            .map_err(|e| StreamServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Stream server stopped");
        Ok(())
    }
}

// =============================================================================
// Handlers
// =============================================================================

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let client = ClientId::new();
    metrics::set_connected_clients(state.health.client_connected());
    tracing::info!(client_id = %client, "Client connected");

    let (writer, reader) = socket.split();
    let sink = Arc::new(WebSocketSink::new(writer, state.write_timeout));
    let close_signal = sink.close_signal();
    let sink: SharedSink = sink;

    let session = ConnectionSession::new(
        client,
        sink,
        Arc::clone(&state.registry),
        state.keepalive,
        &state.shutdown,
    )
    .with_close_signal(close_signal);
    session.run(inbound_frames(reader)).await;

    metrics::set_connected_clients(state.health.client_disconnected());
}

// =============================================================================
// Errors
// =============================================================================

/// Stream server errors.
#[derive(Debug, thiserror::Error)]
pub enum StreamServerError {
    /// Failed to bind the listener.
    #[error("failed to bind to {0}: {1}")]
    BindFailed(SocketAddr, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}
