//! # sqlbroker-testing
//!
//! A scripted in-memory [`Backend`] for exercising the pool without a real
//! database. Tests can make the next N connect attempts fail, poison the
//! liveness probe of any established connection, flip a connection to
//! closed, and inject driver warnings; the backend keeps every connection it
//! ever handed out reachable so assertions can inspect them after the pool
//! has recycled or dropped its own reference.

#![warn(missing_docs)]
#![deny(unsafe_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use sqlbroker_backend::{Backend, BackendConnection, BackendError};

/// Shared state of one scripted connection.
#[derive(Debug)]
pub struct ConnState {
    /// Sequence number of this connection, in connect order (0-based).
    pub id: u64,
    open: AtomicBool,
    fail_ping: AtomicBool,
    closed: AtomicBool,
    warnings: Mutex<Vec<String>>,
}

impl ConnState {
    fn new(id: u64) -> Self {
        Self {
            id,
            open: AtomicBool::new(true),
            fail_ping: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            warnings: Mutex::new(Vec::new()),
        }
    }

    /// Make subsequent liveness probes on this connection fail.
    pub fn poison_ping(&self) {
        self.fail_ping.store(true, Ordering::Release);
    }

    /// Make the connection report itself closed.
    pub fn mark_closed(&self) {
        self.open.store(false, Ordering::Release);
    }

    /// Queue a driver warning for the next drain.
    pub fn push_warning(&self, message: impl Into<String>) {
        self.warnings.lock().push(message.into());
    }

    /// Whether `close` has been called on this connection.
    pub fn was_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Warnings queued but not yet drained.
    pub fn pending_warnings(&self) -> usize {
        self.warnings.lock().len()
    }
}

/// A scripted connection handed to the pool.
#[derive(Debug)]
pub struct TestConn {
    state: Arc<ConnState>,
}

impl TestConn {
    /// Sequence number of this connection.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.state.id
    }
}

#[async_trait]
impl BackendConnection for TestConn {
    fn is_open(&self) -> bool {
        self.state.open.load(Ordering::Acquire) && !self.state.closed.load(Ordering::Acquire)
    }

    fn drain_warnings(&self) -> Vec<String> {
        std::mem::take(&mut *self.state.warnings.lock())
    }

    async fn ping(&self) -> Result<(), BackendError> {
        if self.state.closed.load(Ordering::Acquire) {
            return Err(BackendError::Closed);
        }
        if self.state.fail_ping.load(Ordering::Acquire) {
            return Err(BackendError::Probe("scripted probe failure".into()));
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), BackendError> {
        self.state.closed.store(true, Ordering::Release);
        self.state.open.store(false, Ordering::Release);
        Ok(())
    }
}

/// Scripted backend: records every connection, fails on demand.
///
/// Clones share state, so a test can keep a clone for scripting while the
/// pool owns another.
#[derive(Debug, Clone, Default)]
pub struct TestBackend {
    inner: Arc<BackendState>,
}

#[derive(Debug, Default)]
struct BackendState {
    next_id: AtomicU64,
    fail_next: AtomicUsize,
    conns: Mutex<Vec<Arc<ConnState>>>,
}

impl TestBackend {
    /// Create a backend that connects successfully until told otherwise.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` connect attempts fail.
    pub fn fail_next_connects(&self, n: usize) {
        self.inner.fail_next.store(n, Ordering::Release);
    }

    /// Total connections ever established.
    pub fn total_connects(&self) -> usize {
        self.inner.conns.lock().len()
    }

    /// The `idx`-th connection established, if any.
    pub fn connection(&self, idx: usize) -> Option<Arc<ConnState>> {
        self.inner.conns.lock().get(idx).cloned()
    }

    /// All connections ever established.
    pub fn connections(&self) -> Vec<Arc<ConnState>> {
        self.inner.conns.lock().clone()
    }
}

#[async_trait]
impl Backend for TestBackend {
    type Conn = TestConn;

    async fn connect(&self) -> Result<TestConn, BackendError> {
        let scripted_failure = self
            .inner
            .fail_next
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok();
        if scripted_failure {
            return Err(BackendError::Connect("scripted connect failure".into()));
        }
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let state = Arc::new(ConnState::new(id));
        self.inner.conns.lock().push(Arc::clone(&state));
        Ok(TestConn { state })
    }
}
