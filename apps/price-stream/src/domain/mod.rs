//! Domain Layer - Core streaming types and subscription state.
//!
//! This layer holds the channel/tick types and the subscription registry.
//! It does not know about WebSockets or HTTP.

/// Price streaming types (channels, client ids, ticks).
pub mod streaming;

/// Subscription registry shared by sessions and the broadcaster.
pub mod subscription;
