//! Server Configuration Settings
//!
//! Configuration types for the price stream server, loaded from environment
//! variables.

use std::str::FromStr;
use std::time::Duration;

use crate::domain::streaming::Channel;

/// Channels served when `PRICE_STREAM_CHANNELS` is unset.
pub const DEFAULT_CHANNELS: [&str; 3] = ["BTC", "ETH", "SOL"];

/// Starting prices used when `PRICE_STREAM_INITIAL_PRICES` does not name a channel.
pub const DEFAULT_INITIAL_PRICES: [(&str, f64); 3] =
    [("BTC", 60_000.0), ("ETH", 3_000.0), ("SOL", 142.0)];

/// Server listener settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    /// Port serving `/prices` and the health routes.
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { port: 8080 }
    }
}

/// Publishing and connection timing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSettings {
    /// Interval between publish cycles.
    pub publish_interval: Duration,
    /// Interval between keepalive pings.
    pub ping_interval: Duration,
    /// Deadline for a ping write.
    pub pong_wait: Duration,
    /// Deadline for any other write to a client.
    pub write_timeout: Duration,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            publish_interval: Duration::from_secs(10),
            ping_interval: Duration::from_secs(60),
            pong_wait: Duration::from_secs(120),
            write_timeout: Duration::from_secs(10),
        }
    }
}

/// Price model parameters shared by every channel.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceModelSettings {
    /// Starting price per channel, in the order given.
    pub initial_prices: Vec<(Channel, f64)>,
    /// Expected rate of return per step.
    pub drift: f64,
    /// Volatility per step.
    pub diffusion: f64,
}

impl Default for PriceModelSettings {
    fn default() -> Self {
        Self {
            initial_prices: DEFAULT_INITIAL_PRICES
                .iter()
                .map(|(channel, price)| ((*channel).to_string(), *price))
                .collect(),
            drift: 0.02,
            diffusion: 0.04,
        }
    }
}

impl PriceModelSettings {
    /// Starting price of a channel, if one is configured.
    #[must_use]
    pub fn initial_price(&self, channel: &str) -> Option<f64> {
        self.initial_prices
            .iter()
            .find(|(c, _)| c == channel)
            .map(|(_, price)| *price)
    }
}

/// Complete server configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamConfig {
    /// Configured channels, in order.
    pub channels: Vec<Channel>,
    /// Listener settings.
    pub server: ServerSettings,
    /// Timing settings.
    pub stream: StreamSettings,
    /// Price model settings.
    pub pricing: PriceModelSettings,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            channels: DEFAULT_CHANNELS.iter().map(ToString::to_string).collect(),
            server: ServerSettings::default(),
            stream: StreamSettings::default(),
            pricing: PriceModelSettings::default(),
        }
    }
}

impl StreamConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable cannot be parsed or the resulting
    /// configuration is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if a value cannot be parsed or the resulting
    /// configuration is invalid.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let channels = match lookup("PRICE_STREAM_CHANNELS") {
            Some(value) => parse_channels("PRICE_STREAM_CHANNELS", &value)?,
            None => defaults.channels,
        };

        let server = ServerSettings {
            port: parse_value(&lookup, "PRICE_STREAM_PORT", defaults.server.port)?,
        };

        let stream = StreamSettings {
            publish_interval: parse_duration_secs(
                &lookup,
                "PRICE_STREAM_PUBLISH_INTERVAL_SECS",
                defaults.stream.publish_interval,
            )?,
            ping_interval: parse_duration_secs(
                &lookup,
                "PRICE_STREAM_PING_INTERVAL_SECS",
                defaults.stream.ping_interval,
            )?,
            pong_wait: parse_duration_secs(
                &lookup,
                "PRICE_STREAM_PONG_WAIT_SECS",
                defaults.stream.pong_wait,
            )?,
            write_timeout: parse_duration_secs(
                &lookup,
                "PRICE_STREAM_WRITE_TIMEOUT_SECS",
                defaults.stream.write_timeout,
            )?,
        };

        let mut initial_prices = defaults.pricing.initial_prices;
        if let Some(value) = lookup("PRICE_STREAM_INITIAL_PRICES") {
            for (channel, price) in parse_prices("PRICE_STREAM_INITIAL_PRICES", &value)? {
                match initial_prices.iter_mut().find(|(c, _)| *c == channel) {
                    Some(entry) => entry.1 = price,
                    None => initial_prices.push((channel, price)),
                }
            }
        }

        let pricing = PriceModelSettings {
            initial_prices,
            drift: parse_value(&lookup, "PRICE_STREAM_DRIFT", defaults.pricing.drift)?,
            diffusion: parse_value(&lookup, "PRICE_STREAM_DIFFUSION", defaults.pricing.diffusion)?,
        };

        let config = Self {
            channels,
            server,
            stream,
            pricing,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns `MissingModel` if a channel has no starting price, or
    /// `InvalidValue` for non-finite model parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.channels.is_empty() {
            return Err(ConfigError::EmptyValue("PRICE_STREAM_CHANNELS".to_string()));
        }
        if let Some(channel) = self
            .channels
            .iter()
            .find(|c| self.pricing.initial_price(c).is_none())
        {
            return Err(ConfigError::MissingModel(channel.clone()));
        }
        if !self.pricing.drift.is_finite() {
            return Err(invalid("PRICE_STREAM_DRIFT", self.pricing.drift));
        }
        if !self.pricing.diffusion.is_finite() || self.pricing.diffusion < 0.0 {
            return Err(invalid("PRICE_STREAM_DIFFUSION", self.pricing.diffusion));
        }
        Ok(())
    }
}

/// Configuration error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable could not be parsed.
    #[error("invalid value for {key}: {value}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Offending value.
        value: String,
    },
    /// A configured channel has no starting price.
    #[error("no price model for channel {0}")]
    MissingModel(Channel),
}

fn invalid(key: &str, value: impl ToString) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    }
}

fn parse_value<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|_| invalid(key, value)),
    }
}

fn parse_duration_secs<F>(lookup: &F, key: &str, default: Duration) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let secs: u64 = parse_value(lookup, key, default.as_secs())?;
    if secs == 0 {
        return Err(invalid(key, secs));
    }
    Ok(Duration::from_secs(secs))
}

fn parse_channels(key: &str, value: &str) -> Result<Vec<Channel>, ConfigError> {
    let mut channels: Vec<Channel> = Vec::new();
    for name in value.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        if !channels.iter().any(|c| c == name) {
            channels.push(name.to_string());
        }
    }
    if channels.is_empty() {
        return Err(ConfigError::EmptyValue(key.to_string()));
    }
    Ok(channels)
}

fn parse_prices(key: &str, value: &str) -> Result<Vec<(Channel, f64)>, ConfigError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|entry| {
            let (channel, price) = entry.split_once('=').ok_or_else(|| invalid(key, entry))?;
            let channel = channel.trim();
            let price: f64 = price.trim().parse().map_err(|_| invalid(key, entry))?;
            if channel.is_empty() || !price.is_finite() || price <= 0.0 {
                return Err(invalid(key, entry));
            }
            Ok((channel.to_string(), price))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use test_case::test_case;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<StreamConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        StreamConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        let config = load(&[]).unwrap();
        assert_eq!(config, StreamConfig::default());
        assert_eq!(config.channels, vec!["BTC", "ETH", "SOL"]);
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.stream.publish_interval, Duration::from_secs(10));
        assert_eq!(config.stream.ping_interval, Duration::from_secs(60));
        assert_eq!(config.stream.pong_wait, Duration::from_secs(120));
        assert_eq!(config.pricing.initial_price("SOL"), Some(142.0));
    }

    #[test]
    fn overrides_are_applied() {
        let config = load(&[
            ("PRICE_STREAM_PORT", "9000"),
            ("PRICE_STREAM_CHANNELS", " ETH , BTC ,ETH"),
            ("PRICE_STREAM_PUBLISH_INTERVAL_SECS", "1"),
            ("PRICE_STREAM_DRIFT", "0.1"),
        ])
        .unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.channels, vec!["ETH", "BTC"]);
        assert_eq!(config.stream.publish_interval, Duration::from_secs(1));
        assert!((config.pricing.drift - 0.1).abs() < f64::EPSILON);
    }

    #[test]
    fn initial_prices_override_and_extend() {
        let config = load(&[
            ("PRICE_STREAM_CHANNELS", "BTC,DOGE"),
            ("PRICE_STREAM_INITIAL_PRICES", "BTC=61000, DOGE=0.15"),
        ])
        .unwrap();
        assert_eq!(config.pricing.initial_price("BTC"), Some(61_000.0));
        assert_eq!(config.pricing.initial_price("DOGE"), Some(0.15));
        assert_eq!(config.pricing.initial_price("ETH"), Some(3_000.0));
    }

    #[test]
    fn channel_without_price_is_rejected() {
        let err = load(&[("PRICE_STREAM_CHANNELS", "BTC,XRP")]).unwrap_err();
        assert_eq!(err, ConfigError::MissingModel("XRP".to_string()));
    }

    #[test_case("PRICE_STREAM_PORT", "eighty" ; "port not a number")]
    #[test_case("PRICE_STREAM_PORT", "70000" ; "port out of range")]
    #[test_case("PRICE_STREAM_PUBLISH_INTERVAL_SECS", "0" ; "zero interval")]
    #[test_case("PRICE_STREAM_PONG_WAIT_SECS", "-1" ; "negative wait")]
    #[test_case("PRICE_STREAM_DIFFUSION", "-0.5" ; "negative diffusion")]
    #[test_case("PRICE_STREAM_DRIFT", "NaN" ; "nan drift")]
    #[test_case("PRICE_STREAM_INITIAL_PRICES", "BTC" ; "price without value")]
    #[test_case("PRICE_STREAM_INITIAL_PRICES", "BTC=-3" ; "negative price")]
    fn invalid_values_are_rejected(key: &str, value: &str) {
        let err = load(&[(key, value)]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }), "{err:?}");
    }

    #[test]
    fn empty_channel_list_is_rejected() {
        let err = load(&[("PRICE_STREAM_CHANNELS", " , ")]).unwrap_err();
        assert_eq!(
            err,
            ConfigError::EmptyValue("PRICE_STREAM_CHANNELS".to_string())
        );
    }
}
