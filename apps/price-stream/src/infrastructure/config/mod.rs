//! Configuration Module
//!
//! Configuration loading for the price stream server.

mod settings;

pub use settings::{
    ConfigError, DEFAULT_CHANNELS, DEFAULT_INITIAL_PRICES, PriceModelSettings, ServerSettings,
    StreamConfig, StreamSettings,
};
