//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the application services and port interfaces
//! that define how the domain interacts with the transport and price models.

/// Port interfaces for client connections and data sources.
pub mod ports;

/// Application services for publishing, sessions, and keepalive.
pub mod services;
