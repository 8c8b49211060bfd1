//! WebSocket Message Types
//!
//! Wire format types exchanged with clients on the `/prices` endpoint.
//!
//! # Client to Server
//! - `SubscriptionRequest`: subscribe or unsubscribe a set of channels
//!
//! # Server to Client
//! - `SubscriptionResult`: acknowledgement of a processed request
//! - `TickMessage`: a published price update

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

use crate::domain::streaming::{Channel, Tick};

// =============================================================================
// Requests
// =============================================================================

/// Request method carried by a `SubscriptionRequest`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// Add channels to the client's subscriptions.
    Subscribe,
    /// Remove channels (or all channels) from the client's subscriptions.
    Unsubscribe,
}

impl Method {
    /// Wire name of the method.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Subscribe => "SUBSCRIBE",
            Self::Unsubscribe => "UNSUBSCRIBE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a method name is not recognized.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported method: {0}")]
pub struct UnknownMethod(pub String);

impl FromStr for Method {
    type Err = UnknownMethod;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SUBSCRIBE" => Ok(Self::Subscribe),
            "UNSUBSCRIBE" => Ok(Self::Unsubscribe),
            other => Err(UnknownMethod(other.to_string())),
        }
    }
}

/// Subscription request sent by a client.
///
/// # Wire Format (JSON)
/// ```json
/// {"method": "SUBSCRIBE", "streams": ["BTC", "ETH"], "id": "1"}
/// ```
///
/// The method is kept as a raw string so an unrecognized method can be
/// reported by name rather than as a parse failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionRequest {
    /// "SUBSCRIBE" or "UNSUBSCRIBE".
    pub method: String,

    /// Channel names. Empty (or null) on UNSUBSCRIBE means all channels.
    #[serde(default, deserialize_with = "null_as_default")]
    pub streams: Vec<Channel>,

    /// Correlation id echoed in the result.
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: String,
}

/// Treat an explicit JSON `null` like a missing field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl SubscriptionRequest {
    /// Build a request.
    #[must_use]
    pub fn new(method: Method, streams: Vec<Channel>, id: impl Into<String>) -> Self {
        Self {
            method: method.as_str().to_string(),
            streams,
            id: id.into(),
        }
    }
}

// =============================================================================
// Responses
// =============================================================================

/// Acknowledgement of a processed request.
///
/// # Wire Format (JSON)
/// ```json
/// {"result": null, "id": "1"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionResult {
    /// Always null on success.
    pub result: Option<String>,

    /// Id of the request being acknowledged.
    pub id: String,
}

impl SubscriptionResult {
    /// Successful result for the given request id.
    #[must_use]
    pub fn ok(id: impl Into<String>) -> Self {
        Self {
            result: None,
            id: id.into(),
        }
    }
}

/// Published price update.
///
/// # Wire Format (JSON)
/// ```json
/// {"s": "BTC", "p": 61000.0}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickMessage {
    /// Channel name.
    #[serde(rename = "s")]
    pub channel: Channel,

    /// Price.
    #[serde(rename = "p")]
    pub price: f64,
}

impl From<&Tick> for TickMessage {
    fn from(tick: &Tick) -> Self {
        Self {
            channel: tick.channel.clone(),
            price: tick.price,
        }
    }
}

impl From<TickMessage> for Tick {
    fn from(msg: TickMessage) -> Self {
        Self::new(msg.channel, msg.price)
    }
}

// =============================================================================
// Tests
// =============================================================================
