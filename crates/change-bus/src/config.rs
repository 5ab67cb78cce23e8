//! Bus configuration from code or environment variables.

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Default per-subscription queue capacity.
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 100;

/// Default reaper period.
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(300);

/// Environment variable overriding `max_queue_size`.
pub const ENV_MAX_QUEUE_SIZE: &str = "CS_BUS_MAX_QUEUE_SIZE";

/// Environment variable overriding `cleanup_interval`, in seconds.
pub const ENV_CLEANUP_INTERVAL_SECS: &str = "CS_BUS_CLEANUP_INTERVAL_SECS";

/// Configuration errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Queues must hold at least one event.
    #[error("max_queue_size must be at least 1")]
    ZeroQueueSize,

    /// The reaper needs a non-zero period.
    #[error("cleanup_interval must be greater than zero")]
    ZeroCleanupInterval,

    /// An environment variable was set but could not be parsed.
    #[error("invalid value {value:?} for {var}")]
    InvalidEnv { var: &'static str, value: String },
}

/// Event bus configuration.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Capacity of each subscription's delivery queue.
    pub max_queue_size: usize,

    /// Reaper period. Subscriptions idle for twice this long are reclaimed.
    #[serde_as(as = "DurationSeconds<u64>")]
    pub cleanup_interval: Duration,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
        }
    }
}

impl BusConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `CS_BUS_MAX_QUEUE_SIZE`: queue capacity (default: 100)
    /// - `CS_BUS_CLEANUP_INTERVAL_SECS`: reaper period (default: 300)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidEnv` if a variable is set but is not a
    /// number, or a validation error if the resulting config is unusable.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENV_MAX_QUEUE_SIZE) {
            config.max_queue_size = raw.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                var: ENV_MAX_QUEUE_SIZE,
                value: raw.clone(),
            })?;
        }

        if let Some(raw) = lookup(ENV_CLEANUP_INTERVAL_SECS) {
            let secs: u64 = raw.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                var: ENV_CLEANUP_INTERVAL_SECS,
                value: raw.clone(),
            })?;
            config.cleanup_interval = Duration::from_secs(secs);
        }

        config.validate()?;
        Ok(config)
    }

    /// Set the queue capacity.
    #[must_use]
    pub fn with_max_queue_size(mut self, size: usize) -> Self {
        self.max_queue_size = size;
        self
    }

    /// Set the reaper period.
    #[must_use]
    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    /// Idle time after which the reaper reclaims a subscription.
    #[must_use]
    pub fn idle_threshold(&self) -> Duration {
        self.cleanup_interval.saturating_mul(2)
    }

    /// Check the configuration is usable.
    ///
    /// # Errors
    ///
    /// - `ConfigError::ZeroQueueSize` if `max_queue_size` is 0
    /// - `ConfigError::ZeroCleanupInterval` if `cleanup_interval` is 0
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_queue_size == 0 {
            return Err(ConfigError::ZeroQueueSize);
        }
        if self.cleanup_interval.is_zero() {
            return Err(ConfigError::ZeroCleanupInterval);
        }
        Ok(())
    }
}
