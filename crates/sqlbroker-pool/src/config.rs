//! Pool configuration.

use std::time::Duration;

use crate::error::PoolError;

/// Connections are never recycled on age more often than this, regardless of
/// how small a max age is configured.
pub const MIN_CONNECTION_AGE: Duration = Duration::from_secs(30);

/// Default time a connection may stay checked out before housekeeping treats
/// it as leaked.
pub const DEFAULT_CHECKOUT_TIMEOUT: Duration = Duration::from_secs(60);

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Configuration for a connection pool.
///
/// `debug_level` (0–3) scales log volume only — 0 silences optional
/// messages, 1 adds errors, 2 adds warnings, 3 adds per-checkout
/// information. It never changes pool behavior.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of connections established at startup.
    pub min_connections: u32,

    /// Maximum number of connections (the pool's capacity).
    pub max_connections: u32,

    /// Maximum age of a physical connection before housekeeping replaces it
    /// regardless of health. Floored at [`MIN_CONNECTION_AGE`].
    pub max_connection_age: Duration,

    /// How long a connection may stay checked out before housekeeping
    /// force-recycles it. `Duration::ZERO` disables leak detection.
    pub checkout_timeout: Duration,

    /// Log verbosity, 0–3.
    pub debug_level: u8,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_connections: 1,
            max_connections: 10,
            max_connection_age: Duration::from_secs(86_400),
            checkout_timeout: DEFAULT_CHECKOUT_TIMEOUT,
            debug_level: 2,
        }
    }
}

impl PoolConfig {
    /// Create a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of connections established at startup.
    #[must_use]
    pub fn min_connections(mut self, count: u32) -> Self {
        self.min_connections = count;
        self
    }

    /// Set the pool capacity.
    #[must_use]
    pub fn max_connections(mut self, count: u32) -> Self {
        self.max_connections = count;
        self
    }

    /// Set the maximum connection age in days, floored at
    /// [`MIN_CONNECTION_AGE`].
    #[must_use]
    pub fn max_connection_age_days(mut self, days: f64) -> Self {
        let age = Duration::from_secs_f64((days * SECONDS_PER_DAY).max(0.0));
        self.max_connection_age = age.max(MIN_CONNECTION_AGE);
        self
    }

    /// Set the checkout timeout in seconds. Zero disables leak detection.
    #[must_use]
    pub fn checkout_timeout_secs(mut self, seconds: u64) -> Self {
        self.checkout_timeout = Duration::from_secs(seconds);
        self
    }

    /// Set the log verbosity (clamped to 0–3).
    #[must_use]
    pub fn debug_level(mut self, level: u8) -> Self {
        self.debug_level = level.min(3);
        self
    }

    /// Check the configuration for internal consistency.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.min_connections == 0 {
            return Err(PoolError::Config(
                "min_connections must be at least 1".to_string(),
            ));
        }
        if self.min_connections > self.max_connections {
            return Err(PoolError::Config(format!(
                "min_connections ({}) exceeds max_connections ({})",
                self.min_connections, self.max_connections
            )));
        }
        Ok(())
    }

    /// Max age with the 30-second floor applied.
    pub(crate) fn effective_max_age(&self) -> Duration {
        self.max_connection_age.max(MIN_CONNECTION_AGE)
    }

    /// Checkout timeout, `None` when leak detection is disabled.
    pub(crate) fn leak_timeout(&self) -> Option<Duration> {
        (!self.checkout_timeout.is_zero()).then_some(self.checkout_timeout)
    }
}
