//! Pool error types.

use thiserror::Error;

/// Errors surfaced by the pool.
///
/// Only [`Config`](PoolError::Config) and [`Startup`](PoolError::Startup)
/// are fatal. [`Exhausted`](PoolError::Exhausted) is a normal outcome under
/// load, and [`UnsafeShutdown`](PoolError::UnsafeShutdown) is a report, not
/// a failure — the shutdown it describes has already completed.
#[derive(Debug, Error)]
pub enum PoolError {
    /// The configuration is invalid.
    #[error("invalid pool configuration: {0}")]
    Config(String),

    /// The minimum connection set could not be established at startup.
    #[error("could not establish minimum connections after {attempts} attempts")]
    Startup {
        /// Number of startup attempts made before giving up.
        attempts: u32,
    },

    /// The pool is shutting down and refuses new checkouts.
    #[error("pool is shut down")]
    Closed,

    /// Every slot stayed busy through all bounded retries.
    #[error("no connection available after {attempts} attempts")]
    Exhausted {
        /// Number of full scan attempts made before giving up.
        attempts: u32,
    },

    /// Shutdown force-closed connections that were still checked out.
    #[error("unsafe shutdown: closed {connections} connection(s) still in use")]
    UnsafeShutdown {
        /// Connections closed while still checked out.
        connections: usize,
    },
}
