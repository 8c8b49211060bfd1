//! Prometheus Metrics Module
//!
//! Exposes application metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Publishing**: ticks generated, delivered, and failed per channel
//! - **Sessions**: requests by method, session ends by reason, pings
//! - **Clients**: connected clients and subscribers per channel
//! - **Latency**: publish cycle duration
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::infrastructure::websocket::messages::Method;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Subsequent calls return the handle installed by the first one.
///
/// # Panics
///
/// Panics if the recorder cannot be installed.
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let builder = PrometheusBuilder::new();
            let handle = builder
                .install_recorder()
                .expect("failed to install Prometheus recorder");

            register_metrics();
            handle
        })
        .clone()
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Publishing
    describe_counter!(
        "price_stream_ticks_published_total",
        "Total ticks generated by the data source"
    );
    describe_counter!(
        "price_stream_ticks_delivered_total",
        "Total ticks written to subscribed clients"
    );
    describe_counter!(
        "price_stream_delivery_failures_total",
        "Total failed tick writes (client removed)"
    );
    describe_counter!(
        "price_stream_data_source_failures_total",
        "Total channels skipped because the data source failed"
    );

    // Sessions
    describe_counter!(
        "price_stream_requests_total",
        "Total subscription requests by method"
    );
    describe_counter!(
        "price_stream_sessions_closed_total",
        "Total client sessions closed by reason"
    );
    describe_counter!(
        "price_stream_pings_total",
        "Total keepalive pings sent by outcome"
    );

    // Clients
    describe_gauge!(
        "price_stream_connected_clients",
        "Number of open WebSocket connections"
    );
    describe_gauge!(
        "price_stream_channel_subscribers",
        "Number of subscribers per channel"
    );

    // Latency
    describe_histogram!(
        "price_stream_publish_cycle_seconds",
        "Time to generate and deliver one publish cycle"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record ticks generated in one cycle.
pub fn record_ticks_published(count: u64) {
    counter!("price_stream_ticks_published_total").increment(count);
}

/// Record ticks delivered to subscribers of a channel.
pub fn record_ticks_delivered(channel: &str, count: u64) {
    counter!(
        "price_stream_ticks_delivered_total",
        "channel" => channel.to_string()
    )
    .increment(count);
}

/// Record failed tick writes for a channel.
pub fn record_delivery_failures(channel: &str, count: u64) {
    counter!(
        "price_stream_delivery_failures_total",
        "channel" => channel.to_string()
    )
    .increment(count);
}

/// Record a data source failure for a channel.
pub fn record_data_source_failure(channel: &str) {
    counter!(
        "price_stream_data_source_failures_total",
        "channel" => channel.to_string()
    )
    .increment(1);
}

/// Record a processed subscription request.
pub fn record_request(method: Method) {
    counter!(
        "price_stream_requests_total",
        "method" => method.as_str()
    )
    .increment(1);
}

/// Record a closed session.
pub fn record_session_closed(reason: &'static str) {
    counter!(
        "price_stream_sessions_closed_total",
        "reason" => reason
    )
    .increment(1);
}

/// Record a keepalive ping.
pub fn record_ping(success: bool) {
    counter!(
        "price_stream_pings_total",
        "outcome" => outcome(success)
    )
    .increment(1);
}

/// Update the connected client count.
#[allow(clippy::cast_precision_loss)]
pub fn set_connected_clients(count: usize) {
    gauge!("price_stream_connected_clients").set(count as f64);
}

/// Update the subscriber count of a channel.
#[allow(clippy::cast_precision_loss)]
pub fn set_channel_subscribers(channel: &str, count: usize) {
    gauge!(
        "price_stream_channel_subscribers",
        "channel" => channel.to_string()
    )
    .set(count as f64);
}

/// Record publish cycle duration.
pub fn record_publish_cycle(duration: Duration) {
    histogram!("price_stream_publish_cycle_seconds").record(duration.as_secs_f64());
}

const fn outcome(success: bool) -> &'static str {
    if success { "ok" } else { "failed" }
}

// =============================================================================
// Tests
// =============================================================================
