//! # sqlbroker-backend
//!
//! Driver-facing seam for the sqlbroker connection pool.
//!
//! The pool itself never speaks a wire protocol. Everything it needs from a
//! database driver is expressed by two traits: [`Backend`] establishes
//! physical connections for one target, and [`BackendConnection`] is the
//! minimal surface the pool's housekeeping requires from each connection
//! (open check, liveness probe, warning drain, close).
//!
//! Collaborators that consume pooled connections (credential checks, schema
//! queriers) depend only on these traits plus the pool's acquire/release
//! contract.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod connect;
pub mod error;

pub use connect::ConnectSpec;
pub use error::BackendError;

use async_trait::async_trait;

/// A factory for physical connections to one database target.
///
/// One backend instance corresponds to one [`ConnectSpec`]; the pool calls
/// [`connect`](Backend::connect) at startup, when growing toward capacity,
/// and when housekeeping replaces a broken or aged-out connection.
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    /// The connection type this backend produces.
    type Conn: BackendConnection;

    /// Establish one new physical connection.
    async fn connect(&self) -> Result<Self::Conn, BackendError>;
}

/// The slice of a driver connection the pool interacts with.
///
/// The pool shares each connection behind an `Arc`, so every method takes
/// `&self`; implementations are expected to use interior synchronization the
/// same way driver handles already do for their socket state.
#[async_trait]
pub trait BackendConnection: Send + Sync + 'static {
    /// Whether the driver still considers this connection open.
    ///
    /// This must be a cheap, local check (no network round trip); the pool
    /// calls it inside its slot scan.
    fn is_open(&self) -> bool;

    /// Take and clear any accumulated driver warnings.
    ///
    /// Called by housekeeping once per cycle; drained warnings are logged
    /// and dropped.
    fn drain_warnings(&self) -> Vec<String>;

    /// Lightweight liveness probe (e.g. `SELECT 1` or a protocol ping).
    async fn ping(&self) -> Result<(), BackendError>;

    /// Close the physical connection.
    ///
    /// Must be idempotent; the pool may race a close against a holder that
    /// leaked the connection.
    async fn close(&self) -> Result<(), BackendError>;
}
