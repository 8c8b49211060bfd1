//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `Broadcaster`: periodic tick generation and fan-out
//! - `ConnectionSession`: per-client command loop and teardown
//! - `Pinger`: per-client liveness probing

mod broadcaster;
mod keepalive;
mod session;

pub use broadcaster::{Broadcaster, PublishReport, PublisherStatus};
pub use keepalive::{KeepaliveConfig, Pinger, PongTracker};
pub use session::{ConnectionSession, InboundFrame, SessionEnd, SessionError, SessionState};
