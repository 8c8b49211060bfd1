//! Price Model
//!
//! `DataSource` adapter that simulates prices with geometric Brownian motion.
//! Each channel evolves independently:
//!
//! ```text
//! next = price * exp((drift - diffusion^2 / 2) * dt + diffusion * sqrt(dt) * Z)
//! ```
//!
//! with `dt = 1` and `Z` drawn from the standard normal distribution. The new
//! price becomes the channel's state for the next call.

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

use crate::application::ports::{DataSource, DataSourceError};
use crate::domain::streaming::Channel;
use crate::infrastructure::config::PriceModelSettings;

/// Time step of one draw.
const DT: f64 = 1.0;

/// Model state of one channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelModel {
    /// Current price.
    pub price: f64,
    /// Expected rate of return per step.
    pub drift: f64,
    /// Volatility per step.
    pub diffusion: f64,
}

impl ChannelModel {
    /// Create a model.
    #[must_use]
    pub const fn new(price: f64, drift: f64, diffusion: f64) -> Self {
        Self {
            price,
            drift,
            diffusion,
        }
    }

    /// Price after one step given a standard normal draw `z`.
    #[must_use]
    pub fn step(&self, z: f64) -> f64 {
        let drift_term = (self.drift - 0.5 * self.diffusion.powi(2)) * DT;
        let shock = self.diffusion * DT.sqrt() * z;
        self.price * (drift_term + shock).exp()
    }
}

/// Geometric Brownian motion price generator.
#[derive(Debug)]
pub struct GbmPriceGenerator<R = StdRng> {
    models: HashMap<Channel, ChannelModel>,
    rng: R,
}

impl GbmPriceGenerator<StdRng> {
    /// Build a generator for `channels` from the configured model settings,
    /// seeded from the operating system.
    ///
    /// Channels without a configured starting price are left out and report
    /// `UnsupportedChannel`.
    #[must_use]
    pub fn from_settings(settings: &PriceModelSettings, channels: &[Channel]) -> Self {
        let models = channels
            .iter()
            .filter_map(|channel| {
                settings.initial_price(channel).map(|price| {
                    (
                        channel.clone(),
                        ChannelModel::new(price, settings.drift, settings.diffusion),
                    )
                })
            })
            .collect();
        Self::new(models, StdRng::from_os_rng())
    }
}

impl<R: Rng> GbmPriceGenerator<R> {
    /// Create a generator with explicit models and randomness source.
    #[must_use]
    pub const fn new(models: HashMap<Channel, ChannelModel>, rng: R) -> Self {
        Self { models, rng }
    }

    /// Current model state of a channel.
    #[must_use]
    pub fn model(&self, channel: &str) -> Option<&ChannelModel> {
        self.models.get(channel)
    }
}

impl<R: Rng + Send> DataSource for GbmPriceGenerator<R> {
    fn next_value(&mut self, channel: &str) -> Result<f64, DataSourceError> {
        let model = self
            .models
            .get_mut(channel)
            .ok_or_else(|| DataSourceError::UnsupportedChannel(channel.to_string()))?;

        let z: f64 = self.rng.sample(StandardNormal);
        model.price = model.step(z);
        Ok(model.price)
    }
}
