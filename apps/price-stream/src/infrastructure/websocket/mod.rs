//! WebSocket Adapter
//!
//! The `/prices` endpoint: wire messages, JSON codec, the per-connection
//! write path and the axum server that accepts connections.

pub mod codec;
pub mod messages;
pub mod server;
pub mod sink;

pub use codec::CodecError;
pub use messages::{Method, SubscriptionRequest, SubscriptionResult, TickMessage};
pub use server::{AppState, PRICES_PATH, StreamServer, StreamServerError, build_router};
pub use sink::WebSocketSink;
