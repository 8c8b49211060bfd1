//! Health Check and Metrics Endpoint
//!
//! HTTP routes for health checks, publisher status reporting, and Prometheus
//! metrics. Served on the same listener as the `/prices` WebSocket endpoint.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns JSON health status
//! - `GET /healthz` - Kubernetes liveness probe (simple OK)
//! - `GET /readyz` - Kubernetes readiness probe (checks the publisher)
//! - `GET /metrics` - Prometheus metrics in text format

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::application::ports::SharedRegistry;
use crate::application::services::PublisherStatus;
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status: "healthy", "degraded", or "unhealthy".
    pub status: HealthStatus,
    /// Server version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Broadcaster status.
    pub publisher: PublisherInfo,
    /// Connected client count.
    pub clients: ClientStatus,
    /// Subscription statistics.
    pub subscriptions: SubscriptionStatus,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Publishing every configured channel.
    Healthy,
    /// Publishing, but some channels were skipped in the last cycle.
    Degraded,
    /// The broadcaster is not running.
    Unhealthy,
}

/// Broadcaster status.
#[derive(Debug, Clone, Serialize)]
pub struct PublisherInfo {
    /// Whether the publish loop is running.
    pub running: bool,
    /// Completed publish cycles.
    pub cycles: u64,
    /// Ticks generated since start.
    pub ticks_published: u64,
    /// Completion time of the last cycle.
    pub last_publish_at: Option<DateTime<Utc>>,
    /// Channels skipped in the last cycle.
    pub skipped_last_cycle: usize,
}

/// Connected client information.
#[derive(Debug, Clone, Serialize)]
pub struct ClientStatus {
    /// Open WebSocket connections.
    pub connected: usize,
    /// Clients holding at least one subscription.
    pub subscribed: usize,
}

/// Subscription statistics.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionStatus {
    /// Total (client, channel) subscriptions.
    pub total: usize,
    /// Subscribers per channel, in configuration order.
    pub channels: Vec<ChannelInfo>,
}

/// Subscriber count for one channel.
#[derive(Debug, Clone, Serialize)]
pub struct ChannelInfo {
    /// Channel name.
    pub channel: String,
    /// Subscriber count.
    pub subscribers: usize,
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health routes.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    registry: SharedRegistry,
    publisher: Arc<PublisherStatus>,
    connected: AtomicUsize,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(version: String, registry: SharedRegistry, publisher: Arc<PublisherStatus>) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            registry,
            publisher,
            connected: AtomicUsize::new(0),
        }
    }

    /// Record an accepted connection and return the new count.
    pub fn client_connected(&self) -> usize {
        self.connected.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Record a closed connection and return the new count.
    pub fn client_disconnected(&self) -> usize {
        self.connected
            .fetch_sub(1, Ordering::Relaxed)
            .saturating_sub(1)
    }

    /// Open WebSocket connections.
    #[must_use]
    pub fn connected_clients(&self) -> usize {
        self.connected.load(Ordering::Relaxed)
    }
}

/// Build the health and metrics routes.
pub fn router(state: Arc<HealthServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    if state.publisher.is_running() {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            let body = handle.render();
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                body,
            )
        },
    )
}

fn build_health_response(state: &HealthServerState) -> HealthResponse {
    let publisher = PublisherInfo {
        running: state.publisher.is_running(),
        cycles: state.publisher.cycles(),
        ticks_published: state.publisher.ticks_published(),
        last_publish_at: state.publisher.last_publish_at(),
        skipped_last_cycle: state.publisher.skipped_last_cycle(),
    };
    let stats = state.registry.stats();

    HealthResponse {
        status: determine_health_status(&publisher),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        publisher,
        clients: ClientStatus {
            connected: state.connected_clients(),
            subscribed: stats.distinct_clients,
        },
        subscriptions: SubscriptionStatus {
            total: stats.total_subscriptions,
            channels: stats
                .channels
                .into_iter()
                .map(|c| ChannelInfo {
                    channel: c.channel,
                    subscribers: c.subscribers,
                })
                .collect(),
        },
    }
}

const fn determine_health_status(publisher: &PublisherInfo) -> HealthStatus {
    match (publisher.running, publisher.skipped_last_cycle) {
        (false, _) => HealthStatus::Unhealthy,
        (true, 0) => HealthStatus::Healthy,
        (true, _) => HealthStatus::Degraded,
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use tower::ServiceExt;

    use super::*;
    use crate::application::ports::SharedSink;
    use crate::domain::subscription::SubscriptionRegistry;

    fn publisher(running: bool, skipped: usize) -> PublisherInfo {
        PublisherInfo {
            running,
            cycles: 3,
            ticks_published: 9,
            last_publish_at: None,
            skipped_last_cycle: skipped,
        }
    }

    fn state() -> Arc<HealthServerState> {
        let registry: SharedRegistry = Arc::new(SubscriptionRegistry::<SharedSink>::new(
            ["BTC", "ETH"].map(String::from),
        ));
        Arc::new(HealthServerState::new(
            "0.1.0".to_string(),
            registry,
            Arc::new(PublisherStatus::new()),
        ))
    }

    #[test]
    fn health_status_serialization() {
        assert_eq!(
            serde_json::to_string(&HealthStatus::Healthy).unwrap(),
            "\"healthy\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Degraded).unwrap(),
            "\"degraded\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Unhealthy).unwrap(),
            "\"unhealthy\""
        );
    }

    #[test]
    fn determine_status_follows_publisher() {
        assert_eq!(
            determine_health_status(&publisher(true, 0)),
            HealthStatus::Healthy
        );
        assert_eq!(
            determine_health_status(&publisher(true, 1)),
            HealthStatus::Degraded
        );
        assert_eq!(
            determine_health_status(&publisher(false, 0)),
            HealthStatus::Unhealthy
        );
    }

    #[test]
    fn connection_counter() {
        let state = state();
        assert_eq!(state.client_connected(), 1);
        assert_eq!(state.client_connected(), 2);
        assert_eq!(state.client_disconnected(), 1);
        assert_eq!(state.connected_clients(), 1);
    }

    #[tokio::test]
    async fn liveness_is_always_ok() {
        let response = router(state())
            .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn readiness_requires_running_publisher() {
        let response = router(state())
            .oneshot(Request::get("/readyz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn health_reports_channels() {
        let response = router(state())
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "unhealthy");
        assert_eq!(json["version"], "0.1.0");
        assert_eq!(json["subscriptions"]["channels"][0]["channel"], "BTC");
        assert_eq!(json["subscriptions"]["channels"][1]["subscribers"], 0);
    }
}
