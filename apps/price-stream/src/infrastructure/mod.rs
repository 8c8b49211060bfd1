//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// WebSocket endpoint, wire format and server.
pub mod websocket;

/// Geometric Brownian motion price model.
pub mod pricing;

/// Configuration loading.
pub mod config;

/// Health check HTTP routes.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// OpenTelemetry tracing integration.
pub mod telemetry;
