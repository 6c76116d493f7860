//! # sqlbroker-pool
//!
//! Self-managed database connection pool: a fixed-capacity slot table with
//! round-robin checkout, a background housekeeping task that detects and
//! recycles broken, aged-out, and leaked connections, and a multi-phase
//! graceful shutdown.
//!
//! The pool is driver-agnostic: anything implementing the
//! [`sqlbroker_backend::Backend`] traits can be pooled.
//!
//! ## Features
//!
//! - Round-robin checkout so a faulty connection never starves the pool
//! - Lazy growth from a configured minimum up to capacity
//! - Periodic liveness probes and forced replacement at max connection age
//! - Leak detection: connections held past the checkout timeout are
//!   reclaimed by housekeeping
//! - Startup retry while the database is still booting
//! - Multi-phase shutdown that reports connections it had to force-close
//! - A [`PoolRegistry`] keeping one pool per distinct target
//!
//! ## Example
//!
//! ```rust,ignore
//! use sqlbroker_pool::{Pool, PoolConfig};
//! use std::time::Duration;
//!
//! let config = PoolConfig::new()
//!     .min_connections(5)
//!     .max_connections(20)
//!     .max_connection_age_days(1.0)
//!     .checkout_timeout_secs(60);
//!
//! let pool = Pool::new(backend, config).await?;
//!
//! let conn = pool.acquire().await?;
//! // Run queries through the connection...
//! drop(conn); // slot returns to the pool
//!
//! println!("utilization: {:.1}%", pool.status().utilization());
//! pool.shutdown(Duration::from_secs(10)).await?;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod error;
mod housekeeping;
pub mod pool;
pub mod registry;
mod slot;

// Configuration
pub use config::PoolConfig;

// Error types
pub use error::PoolError;

// Pool types
pub use pool::{Pool, PoolMetrics, PoolStatus, PooledConnection};

// Registry
pub use registry::PoolRegistry;
