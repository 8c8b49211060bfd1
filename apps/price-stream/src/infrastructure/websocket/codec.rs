//! JSON Codec
//!
//! Encoding and decoding for the `/prices` endpoint. Requests may arrive as
//! text or binary frames; both are parsed as JSON.

use crate::domain::streaming::Tick;
use crate::infrastructure::websocket::messages::{SubscriptionRequest, SubscriptionResult, TickMessage};

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding/decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// The frame was empty or whitespace.
    #[error("empty message")]
    Empty,

    /// The payload is not a JSON object.
    #[error("invalid message format: {0}")]
    InvalidFormat(String),
}

/// Decode a subscription request from a raw frame payload.
///
/// # Errors
///
/// Returns an error if the payload is empty, not a JSON object, or is
/// missing the `method` field.
pub fn decode_request(payload: &[u8]) -> Result<SubscriptionRequest, CodecError> {
    let text = String::from_utf8_lossy(payload);
    let trimmed = text.trim();

    if trimmed.is_empty() {
        return Err(CodecError::Empty);
    }
    if !trimmed.starts_with('{') {
        return Err(CodecError::InvalidFormat(format!(
            "expected JSON object, got: {}...",
            trimmed.chars().take(50).collect::<String>()
        )));
    }

    Ok(serde_json::from_str(trimmed)?)
}

/// Encode a request acknowledgement.
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn encode_result(result: &SubscriptionResult) -> Result<String, CodecError> {
    Ok(serde_json::to_string(result)?)
}

/// Encode a tick for delivery to subscribers.
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn encode_tick(tick: &Tick) -> Result<String, CodecError> {
    Ok(serde_json::to_string(&TickMessage::from(tick))?)
}

/// Decode a tick as received by a client.
///
/// # Errors
///
/// Returns an error if the text is not a valid tick message.
pub fn decode_tick(text: &str) -> Result<Tick, CodecError> {
    let msg: TickMessage = serde_json::from_str(text.trim())?;
    Ok(msg.into())
}
