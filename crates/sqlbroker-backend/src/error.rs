//! Backend error types.

use thiserror::Error;

/// Errors surfaced by a driver backend.
#[derive(Debug, Error)]
pub enum BackendError {
    /// Failed to establish a physical connection.
    #[error("connect failed: {0}")]
    Connect(String),

    /// IO error on an established connection.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection has been closed.
    #[error("connection closed")]
    Closed,

    /// A liveness probe failed.
    #[error("probe failed: {0}")]
    Probe(String),
}
