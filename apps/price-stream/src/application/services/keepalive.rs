//! Keepalive Loop
//!
//! Proves liveness of a client connection with periodic transport-level
//! pings. Runs independently of the session's command loop so that a
//! subscribed but silent client is still kept alive.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{SharedSink, TransportError};
use crate::domain::streaming::ClientId;
use crate::infrastructure::metrics;

/// Configuration for keepalive behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepaliveConfig {
    /// Interval between pings.
    pub ping_interval: Duration,
    /// Deadline for a ping write to complete.
    pub pong_wait: Duration,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(60),
            pong_wait: Duration::from_secs(120),
        }
    }
}

impl KeepaliveConfig {
    /// Create a new configuration with custom values.
    #[must_use]
    pub const fn new(ping_interval: Duration, pong_wait: Duration) -> Self {
        Self {
            ping_interval,
            pong_wait,
        }
    }

    /// Create configuration from `StreamSettings`.
    #[must_use]
    pub const fn from_stream_settings(settings: &crate::StreamSettings) -> Self {
        Self {
            ping_interval: settings.ping_interval,
            pong_wait: settings.pong_wait,
        }
    }
}

/// Pong bookkeeping for one connection.
///
/// Pongs are handled at transport level; this only records when the last one
/// arrived so it can be logged.
#[derive(Debug)]
pub struct PongTracker {
    last_pong: RwLock<Option<Instant>>,
}

impl Default for PongTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl PongTracker {
    /// Create a tracker that has not seen a pong yet.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            last_pong: RwLock::new(None),
        }
    }

    /// Record that a pong was received.
    pub fn record_pong(&self) {
        *self.last_pong.write() = Some(Instant::now());
    }

    /// Time since the last pong, if any was received.
    #[must_use]
    pub fn time_since_pong(&self) -> Option<Duration> {
        self.last_pong.read().map(|at| at.elapsed())
    }
}

/// Periodic pinger for one connection.
pub struct Pinger {
    client: ClientId,
    config: KeepaliveConfig,
    sink: SharedSink,
    pongs: Arc<PongTracker>,
    cancel: CancellationToken,
}

impl Pinger {
    /// Create a new pinger.
    #[must_use]
    pub fn new(
        client: ClientId,
        config: KeepaliveConfig,
        sink: SharedSink,
        pongs: Arc<PongTracker>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            client,
            config,
            sink,
            pongs,
            cancel,
        }
    }

    /// Run the ping loop until cancelled or a ping fails.
    ///
    /// The first ping goes out one interval after start.
    ///
    /// # Errors
    ///
    /// Returns the transport error of the ping that failed or timed out.
    pub async fn run(self) -> Result<(), TransportError> {
        let start = tokio::time::Instant::now() + self.config.ping_interval;
        let mut interval = tokio::time::interval_at(start, self.config.ping_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::debug!(client_id = %self.client, "Pinger cancelled");
                    return Ok(());
                }
                _ = interval.tick() => {
                    self.ping().await?;
                }
            }
        }
    }

    async fn ping(&self) -> Result<(), TransportError> {
        tracing::debug!(
            client_id = %self.client,
            since_last_pong_secs = self.pongs.time_since_pong().map(|d| d.as_secs()),
            "Sending ping to client"
        );

        let result = tokio::time::timeout(self.config.pong_wait, self.sink.send_ping())
            .await
            .unwrap_or(Err(TransportError::Timeout(self.config.pong_wait)));

        metrics::record_ping(result.is_ok());
        result
    }
}
