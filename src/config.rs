//! Configuration Module
//!
//! Handles loading and managing cache configuration from environment variables.

use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default period between background sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Cache configuration parameters.
///
/// TTL is chosen per call, so there is no default TTL here: entries written
/// without one never expire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Period between background sweeps; the first sweep runs one period after start
    pub sweep_interval: Duration,
    /// Whether the store spawns its own background sweeper
    pub auto_sweep: bool,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_SWEEP_INTERVAL_SECS` - Sweep frequency in seconds (default: 60)
    /// - `CACHE_AUTO_SWEEP` - Spawn the background sweeper (default: true)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            sweep_interval: env::var("CACHE_SWEEP_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.sweep_interval),
            auto_sweep: env::var("CACHE_AUTO_SWEEP")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.auto_sweep),
        }
    }

    /// Sets the sweep period.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Disables the background sweeper; expired entries are then only removed
    /// by explicit calls to `sweep_expired` or `remove`.
    pub fn without_auto_sweep(mut self) -> Self {
        self.auto_sweep = false;
        self
    }

    /// Sweep period as handed to the timer. Tokio intervals reject zero.
    pub(crate) fn effective_sweep_interval(&self) -> Duration {
        self.sweep_interval.max(Duration::from_millis(1))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            auto_sweep: true,
        }
    }
}
