//! Broadcaster
//!
//! The single periodic publisher. Once per publish interval it asks the data
//! source for a fresh value per channel and pushes the resulting tick to every
//! client subscribed to that channel.
//!
//! # Failure handling
//!
//! - A data source failure skips that channel for the current tick only.
//! - A failed push removes that client from every channel and closes its
//!   sink, which ends the client's session; delivery to the other
//!   subscribers continues. Pushes run concurrently, so a slow client costs
//!   at most its own write deadline.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{DataSource, SharedRegistry};
use crate::domain::streaming::{Channel, ClientId, Tick};
use crate::infrastructure::metrics;
use crate::infrastructure::websocket::codec;

// =============================================================================
// Publisher Status
// =============================================================================

/// Observable state of the broadcaster, read by the health endpoints.
#[derive(Debug, Default)]
pub struct PublisherStatus {
    running: AtomicBool,
    cycles: AtomicU64,
    ticks_published: AtomicU64,
    skipped_last_cycle: AtomicUsize,
    last_publish_at: parking_lot::RwLock<Option<DateTime<Utc>>>,
}

impl PublisherStatus {
    /// Create a status for a broadcaster that has not started.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the publish loop is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Number of completed publish cycles.
    #[must_use]
    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }

    /// Number of ticks generated (one per channel per successful draw).
    #[must_use]
    pub fn ticks_published(&self) -> u64 {
        self.ticks_published.load(Ordering::Relaxed)
    }

    /// Channels skipped in the most recent cycle.
    #[must_use]
    pub fn skipped_last_cycle(&self) -> usize {
        self.skipped_last_cycle.load(Ordering::Relaxed)
    }

    /// Completion time of the most recent cycle.
    #[must_use]
    pub fn last_publish_at(&self) -> Option<DateTime<Utc>> {
        *self.last_publish_at.read()
    }

    fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::Relaxed);
    }

    fn record_cycle(&self, report: &PublishReport) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
        self.ticks_published
            .fetch_add(report.published.len() as u64, Ordering::Relaxed);
        self.skipped_last_cycle
            .store(report.skipped.len(), Ordering::Relaxed);
        *self.last_publish_at.write() = Some(Utc::now());
    }
}

// =============================================================================
// Publish Report
// =============================================================================

/// Outcome of one publish cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PublishReport {
    /// Ticks generated this cycle, in channel order.
    pub published: Vec<Tick>,
    /// Channels skipped because the data source failed.
    pub skipped: Vec<Channel>,
    /// Number of successful pushes.
    pub delivered: usize,
    /// Clients removed because a push failed.
    pub dropped: Vec<ClientId>,
}

// =============================================================================
// Broadcaster
// =============================================================================

/// Periodic tick publisher.
pub struct Broadcaster<D> {
    registry: SharedRegistry,
    source: D,
    interval: Duration,
    status: Arc<PublisherStatus>,
    cancel: CancellationToken,
}

impl<D: DataSource> Broadcaster<D> {
    /// Create a new broadcaster.
    #[must_use]
    pub fn new(
        registry: SharedRegistry,
        source: D,
        interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            registry,
            source,
            interval,
            status: Arc::new(PublisherStatus::new()),
            cancel,
        }
    }

    /// Shared status for health reporting.
    #[must_use]
    pub fn status(&self) -> Arc<PublisherStatus> {
        Arc::clone(&self.status)
    }

    /// Run the publish loop until cancelled.
    ///
    /// The first cycle runs one interval after start; missed ticks are
    /// skipped rather than bunched up.
    pub async fn run(mut self) {
        let start = tokio::time::Instant::now() + self.interval;
        let mut ticker = tokio::time::interval_at(start, self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        self.status.set_running(true);
        tracing::info!(
            interval_secs = self.interval.as_secs_f64(),
            channels = ?self.registry.channels(),
            "Ready to publish prices to subscribers"
        );

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::info!("Broadcaster stopped");
                    break;
                }
                _ = ticker.tick() => {
                    self.publish_once().await;
                }
            }
        }

        self.status.set_running(false);
    }

    /// Run a single publish cycle over every configured channel.
    pub async fn publish_once(&mut self) -> PublishReport {
        let started = Instant::now();
        let mut report = PublishReport::default();
        let channels = self.registry.channels().to_vec();

        for channel in channels {
            let price = match self.source.next_value(&channel) {
                Ok(price) => price,
                Err(e) => {
                    tracing::warn!(channel = %channel, error = %e, "Failed to generate price, skipping tick");
                    metrics::record_data_source_failure(&channel);
                    report.skipped.push(channel);
                    continue;
                }
            };

            let tick = Tick::new(channel, price);
            self.fan_out(&tick, &mut report).await;
            report.published.push(tick);
        }

        self.status.record_cycle(&report);
        metrics::record_ticks_published(report.published.len() as u64);
        metrics::record_publish_cycle(started.elapsed());
        report
    }

    async fn fan_out(&self, tick: &Tick, report: &mut PublishReport) {
        let Some(subscribers) = self.registry.subscribers(&tick.channel) else {
            return;
        };
        metrics::set_channel_subscribers(&tick.channel, subscribers.len());
        if subscribers.is_empty() {
            return;
        }

        let payload = match codec::encode_tick(tick) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(channel = %tick.channel, error = %e, "Failed to encode tick");
                return;
            }
        };

        let sends = subscribers.into_iter().map(|subscriber| {
            let payload = payload.clone();
            async move {
                tracing::debug!(
                    channel = %tick.channel,
                    client_id = %subscriber.client,
                    "Publishing price to client"
                );
                let result = subscriber.handle.send_text(payload).await;
                (subscriber, result)
            }
        });

        let mut delivered = 0;
        let mut failed = Vec::new();
        for (subscriber, result) in join_all(sends).await {
            match result {
                Ok(()) => delivered += 1,
                Err(e) => {
                    tracing::error!(
                        client_id = %subscriber.client,
                        channel = %tick.channel,
                        error = %e,
                        "Failed to write message to client, removing subscriptions"
                    );
                    self.registry.remove_client(subscriber.client);
                    report.dropped.push(subscriber.client);
                    failed.push(subscriber.handle);
                }
            }
        }

        if !failed.is_empty() {
            metrics::record_delivery_failures(&tick.channel, failed.len() as u64);
            join_all(failed.iter().map(|handle| handle.close())).await;
        }

        metrics::record_ticks_delivered(&tick.channel, delivered as u64);
        report.delivered += delivered;
    }
}

// =============================================================================
// Tests
// =============================================================================
