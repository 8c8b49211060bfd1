#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Price Stream - Real-time Price Broadcaster
//!
//! A WebSocket server that publishes simulated prices for a fixed set of
//! channels. Clients subscribe and unsubscribe with JSON requests and receive
//! a tick per subscribed channel on every publish cycle.
//!
//! # Layers (inside -> outside)
//!
//! - **Domain**: Core types with no transport dependencies
//!   - `streaming`: Channels, client ids, ticks
//!   - `subscription`: The subscription registry
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: `ClientSink` and `DataSource` interfaces
//!   - `services`: Broadcaster, connection sessions, keepalive
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `websocket`: `/prices` endpoint, wire messages, codec, write path
//!   - `pricing`: Geometric Brownian motion data source
//!   - `config`: Environment configuration
//!   - `health`: Health check and metrics routes
//!
//! # Data Flow
//!
//! ```text
//!                 +-------------+     +--------------+
//! DataSource ---->| Broadcaster |---->| Registry     |
//!                 +-------------+     | snapshot     |
//!                                     +------+-------+
//!                                            |
//!            +-------------------------------+---------------+
//!            v                               v               v
//!     ConnectionSession 1            ConnectionSession 2    ...
//!     (commands + pinger)            (commands + pinger)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core streaming types with no external dependencies.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::streaming::{Channel, ClientId, Tick};
pub use domain::subscription::{
    ChannelStats, RegistryError, RegistryStats, Subscriber, SubscriptionRegistry,
};

// Ports and services
pub use application::ports::{
    ClientSink, DataSource, DataSourceError, SharedRegistry, SharedSink, TransportError,
};
pub use application::services::{
    Broadcaster, ConnectionSession, InboundFrame, KeepaliveConfig, PublishReport, PublisherStatus,
    SessionEnd, SessionError, SessionState,
};

// Infrastructure config
pub use infrastructure::config::{
    ConfigError, PriceModelSettings, ServerSettings, StreamConfig, StreamSettings,
};

// Server (for integration tests)
pub use infrastructure::health::HealthServerState;
pub use infrastructure::pricing::{ChannelModel, GbmPriceGenerator};
pub use infrastructure::websocket::{
    AppState, CodecError, Method, StreamServer, StreamServerError, SubscriptionRequest,
    SubscriptionResult, TickMessage, WebSocketSink,
};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
