//! Port Interfaces
//!
//! Defines the interfaces (ports) the application services depend on,
//! following the Hexagonal Architecture pattern. Infrastructure adapters
//! implement them.
//!
//! ## Driven Ports (Outbound)
//!
//! - `ClientSink`: serialized write path to one connected client
//! - `DataSource`: produces the next value for a channel

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::subscription::SubscriptionRegistry;

// =============================================================================
// Client Sink
// =============================================================================

/// Transport-level failure on a client connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Writing to the connection failed.
    #[error("write failed: {0}")]
    Write(String),

    /// Reading from the connection failed.
    #[error("read failed: {0}")]
    Read(String),

    /// The write did not complete before its deadline.
    #[error("write timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The connection is already closed.
    #[error("connection closed")]
    Closed,
}

/// Outbound path of a single client connection.
///
/// Implementations must serialize concurrent callers: the broadcaster and the
/// session's own loops may write at the same time. `send_text` is bounded by
/// the implementation's write deadline; the keepalive loop applies its own
/// deadline to `send_ping`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ClientSink: Send + Sync {
    /// Send a text frame.
    async fn send_text(&self, text: String) -> Result<(), TransportError>;

    /// Send a transport-level liveness probe.
    async fn send_ping(&self) -> Result<(), TransportError>;

    /// Close the connection. Closing twice is a no-op.
    async fn close(&self);
}

/// Shared client sink reference, as stored in the registry.
pub type SharedSink = Arc<dyn ClientSink>;

/// Registry of client sinks shared by sessions and the broadcaster.
pub type SharedRegistry = Arc<SubscriptionRegistry<SharedSink>>;

// =============================================================================
// Data Source
// =============================================================================

/// Errors produced by a data source.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DataSourceError {
    /// The channel has no model configured.
    #[error("{0} not supported")]
    UnsupportedChannel(String),
}

/// Produces the next value for a channel.
///
/// Stateful per channel and not safe for concurrent use; the broadcaster is
/// the only caller.
#[cfg_attr(test, mockall::automock)]
pub trait DataSource: Send {
    /// Advance the channel's state and return the new value.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedChannel` if the channel is not configured.
    fn next_value(&mut self, channel: &str) -> Result<f64, DataSourceError>;
}
