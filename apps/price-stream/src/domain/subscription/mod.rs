//! Subscription Registry
//!
//! Tracks which clients are subscribed to which channels. This is the single
//! piece of mutable state shared between the per-connection sessions and the
//! broadcaster.
//!
//! # Design
//!
//! - The set of channels is fixed at construction; every configured channel
//!   starts with an empty subscriber set and no channel is added or removed
//!   later.
//! - One `RwLock` guards the whole mapping. Critical sections are short and
//!   never await, so sessions adding/removing and the broadcaster reading do
//!   not contend for long.
//! - Reads hand out copies (`snapshot`, `subscribers`) so that a broadcast pass
//!   never iterates the live map.
//!
//! The registry is generic over the handle stored per subscription. In the
//! server this is the connection's shared write path; the registry only clones
//! and hands it out, it never closes it.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;

use crate::domain::streaming::{Channel, ClientId};

// =============================================================================
// Errors
// =============================================================================

/// Errors returned by registry mutations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// The channel is not part of the configured set.
    #[error("channel {0} does not exist")]
    UnknownChannel(Channel),
}

// =============================================================================
// Types
// =============================================================================

/// A client subscribed to a channel, together with its send handle.
#[derive(Debug, Clone)]
pub struct Subscriber<H> {
    /// The subscribed client.
    pub client: ClientId,
    /// Handle used to push ticks to the client.
    pub handle: H,
}

/// Subscriber count for a single channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelStats {
    /// Channel name.
    pub channel: Channel,
    /// Number of clients subscribed to it.
    pub subscribers: usize,
}

/// Registry-wide statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Per-channel counts, in configuration order.
    pub channels: Vec<ChannelStats>,
    /// Number of distinct clients holding at least one subscription.
    pub distinct_clients: usize,
    /// Total number of (client, channel) subscriptions.
    pub total_subscriptions: usize,
}

// =============================================================================
// Subscription Registry
// =============================================================================

/// Concurrency-safe mapping from channel to subscribed clients.
///
/// # Example
///
/// ```rust
/// use price_stream::domain::streaming::ClientId;
/// use price_stream::domain::subscription::SubscriptionRegistry;
///
/// let registry: SubscriptionRegistry<&str> =
///     SubscriptionRegistry::new(["BTC".to_string(), "ETH".to_string()]);
/// let client = ClientId::new();
///
/// registry
///     .add_subscriptions(client, "handle", &["BTC".to_string()])
///     .unwrap();
/// assert!(registry.is_subscribed(client, "BTC"));
/// assert!(!registry.is_subscribed(client, "ETH"));
///
/// // Empty list means "every channel"
/// registry.remove_subscriptions(client, &[]).unwrap();
/// assert!(registry.client_channels(client).is_empty());
/// ```
#[derive(Debug)]
pub struct SubscriptionRegistry<H> {
    channels: Vec<Channel>,
    subscriptions: RwLock<HashMap<Channel, HashMap<ClientId, H>>>,
}

impl<H: Clone> SubscriptionRegistry<H> {
    /// Create a registry seeded with an empty subscriber set per channel.
    ///
    /// Duplicate channel names are collapsed; the first occurrence fixes the
    /// iteration order.
    #[must_use]
    pub fn new(channels: impl IntoIterator<Item = Channel>) -> Self {
        let mut seen = HashSet::new();
        let channels: Vec<Channel> = channels
            .into_iter()
            .filter(|channel| seen.insert(channel.clone()))
            .collect();

        let subscriptions = channels
            .iter()
            .map(|channel| (channel.clone(), HashMap::new()))
            .collect();

        Self {
            channels,
            subscriptions: RwLock::new(subscriptions),
        }
    }

    /// Configured channels, in configuration order.
    #[must_use]
    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    /// Check whether a channel is part of the configured set.
    #[must_use]
    pub fn has_channel(&self, channel: &str) -> bool {
        self.channels.iter().any(|c| c == channel)
    }

    /// Subscribe a client to each of the given channels.
    ///
    /// Channels are applied in order. If one is unknown the call fails with
    /// [`RegistryError::UnknownChannel`] and the channels before it stay
    /// subscribed; there is no rollback.
    ///
    /// # Errors
    ///
    /// Returns `UnknownChannel` for the first channel that is not configured.
    pub fn add_subscriptions(
        &self,
        client: ClientId,
        handle: H,
        channels: &[Channel],
    ) -> Result<(), RegistryError> {
        let mut subscriptions = self.subscriptions.write();

        for channel in channels {
            let Some(clients) = subscriptions.get_mut(channel) else {
                return Err(RegistryError::UnknownChannel(channel.clone()));
            };
            clients.insert(client, handle.clone());
        }

        Ok(())
    }

    /// Unsubscribe a client from the given channels.
    ///
    /// An empty list removes the client from every channel. Removing a client
    /// that is not subscribed is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `UnknownChannel` for the first channel that is not configured;
    /// channels listed before it have already been removed.
    pub fn remove_subscriptions(
        &self,
        client: ClientId,
        channels: &[Channel],
    ) -> Result<(), RegistryError> {
        if channels.is_empty() {
            self.remove_client(client);
            return Ok(());
        }

        let mut subscriptions = self.subscriptions.write();

        for channel in channels {
            let Some(clients) = subscriptions.get_mut(channel) else {
                return Err(RegistryError::UnknownChannel(channel.clone()));
            };
            clients.remove(&client);
        }

        Ok(())
    }

    /// Remove a client from every channel.
    ///
    /// Returns the number of subscriptions that were dropped. Safe to call any
    /// number of times.
    pub fn remove_client(&self, client: ClientId) -> usize {
        self.subscriptions
            .write()
            .values_mut()
            .filter_map(|clients| clients.remove(&client))
            .count()
    }

    /// Point-in-time copy of every channel's subscribers.
    #[must_use]
    pub fn snapshot(&self) -> HashMap<Channel, Vec<Subscriber<H>>> {
        self.subscriptions
            .read()
            .iter()
            .map(|(channel, clients)| (channel.clone(), to_subscribers(clients)))
            .collect()
    }

    /// Point-in-time copy of a single channel's subscribers.
    ///
    /// Returns `None` if the channel is not configured.
    #[must_use]
    pub fn subscribers(&self, channel: &str) -> Option<Vec<Subscriber<H>>> {
        self.subscriptions.read().get(channel).map(to_subscribers)
    }

    /// Check whether a client is subscribed to a channel.
    #[must_use]
    pub fn is_subscribed(&self, client: ClientId, channel: &str) -> bool {
        self.subscriptions
            .read()
            .get(channel)
            .is_some_and(|clients| clients.contains_key(&client))
    }

    /// Channels a client is subscribed to, in configuration order.
    #[must_use]
    pub fn client_channels(&self, client: ClientId) -> Vec<Channel> {
        let subscriptions = self.subscriptions.read();
        self.channels
            .iter()
            .filter(|channel| {
                subscriptions
                    .get(*channel)
                    .is_some_and(|clients| clients.contains_key(&client))
            })
            .cloned()
            .collect()
    }

    /// Get registry statistics.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        let subscriptions = self.subscriptions.read();
        let mut distinct = HashSet::new();
        let mut total_subscriptions = 0;

        let channels = self
            .channels
            .iter()
            .map(|channel| {
                let count = subscriptions.get(channel).map_or(0, |clients| {
                    distinct.extend(clients.keys().copied());
                    clients.len()
                });
                total_subscriptions += count;
                ChannelStats {
                    channel: channel.clone(),
                    subscribers: count,
                }
            })
            .collect();

        RegistryStats {
            channels,
            distinct_clients: distinct.len(),
            total_subscriptions,
        }
    }
}

fn to_subscribers<H: Clone>(clients: &HashMap<ClientId, H>) -> Vec<Subscriber<H>> {
    clients
        .iter()
        .map(|(client, handle)| Subscriber {
            client: *client,
            handle: handle.clone(),
        })
        .collect()
}

// =============================================================================
// Tests
// =============================================================================
