//! Price Streaming Types
//!
//! Core domain types for the price feed: channel names, client identifiers
//! and the ticks published to subscribers. These types are transport-agnostic;
//! the wire encoding lives in the WebSocket adapter.

use std::fmt;

use uuid::Uuid;

/// A channel (stream) name such as `"BTC"`.
pub type Channel = String;

/// Unique identifier for a connected client.
///
/// Minted when a connection is accepted and valid for the lifetime of that
/// connection only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(Uuid);

impl ClientId {
    /// Mint a fresh random client identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// One published price update for a channel.
#[derive(Debug, Clone, PartialEq)]
pub struct Tick {
    /// Channel the value belongs to.
    pub channel: Channel,
    /// Newly generated value.
    pub price: f64,
}

impl Tick {
    /// Create a new tick.
    #[must_use]
    pub fn new(channel: impl Into<Channel>, price: f64) -> Self {
        Self {
            channel: channel.into(),
            price,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_ids_are_unique() {
        let a = ClientId::new();
        let b = ClientId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn client_id_displays_as_uuid() {
        let id = ClientId::new();
        assert_eq!(id.to_string(), id.as_uuid().to_string());
        assert_eq!(id.to_string().len(), 36);
    }

    #[test]
    fn tick_new_accepts_str() {
        let tick = Tick::new("BTC", 61_000.0);
        assert_eq!(tick.channel, "BTC");
        assert_eq!(tick.price, 61_000.0);
    }
}
