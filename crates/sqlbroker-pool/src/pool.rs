//! The pool engine: checkout, return, startup retry, graceful shutdown.

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use sqlbroker_backend::{Backend, BackendConnection, BackendError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::PoolConfig;
use crate::error::PoolError;
use crate::housekeeping;
use crate::slot::{Claimed, SlotTable};

/// Startup makes this many attempts to establish the minimum connection set.
pub const STARTUP_ATTEMPTS: u32 = 20;

/// Backoff between startup attempts (with 20 attempts, roughly a five-minute
/// window for the database to come up).
pub const STARTUP_RETRY_DELAY: Duration = Duration::from_secs(15);

/// A checkout makes this many full scans before reporting exhaustion.
pub const ACQUIRE_ATTEMPTS: u32 = 10;

/// Sleep between scans once the pool is at capacity with nothing free.
pub const ACQUIRE_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Period of the housekeeping sweep.
pub const HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(20);

const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// A self-managed connection pool over a driver [`Backend`].
///
/// Connections are handed out round-robin from a fixed-capacity slot table
/// that grows lazily from `min_connections` up to `max_connections`. A
/// background housekeeping task replaces broken, aged-out, and leaked
/// connections in place; [`shutdown`](Pool::shutdown) performs the
/// multi-phase graceful teardown.
///
/// # Example
///
/// ```rust,ignore
/// use sqlbroker_pool::{Pool, PoolConfig};
///
/// let config = PoolConfig::new()
///     .min_connections(5)
///     .max_connections(20)
///     .checkout_timeout_secs(60);
///
/// let pool = Pool::new(backend, config).await?;
///
/// let conn = pool.acquire().await?;
/// // Use the connection; dropping it returns the slot to the pool.
/// drop(conn);
///
/// pool.shutdown(std::time::Duration::from_secs(10)).await?;
/// ```
pub struct Pool<B: Backend> {
    inner: Arc<PoolInner<B>>,
    stop: watch::Sender<bool>,
    housekeeper: Mutex<Option<JoinHandle<()>>>,
}

pub(crate) struct PoolInner<B: Backend> {
    pub(crate) backend: B,
    pub(crate) config: PoolConfig,
    pub(crate) table: Mutex<SlotTable<B::Conn>>,
    /// Cleared at the start of shutdown; checkouts refuse once false.
    pub(crate) available: AtomicBool,
    /// Source of slot identity tags.
    next_tag: AtomicU64,
    created_at: Instant,
    pub(crate) metrics: Mutex<PoolMetricsInner>,
}

/// Internal metrics tracking.
#[derive(Debug, Default)]
pub(crate) struct PoolMetricsInner {
    pub(crate) connections_created: u64,
    pub(crate) connections_closed: u64,
    pub(crate) checkouts_successful: u64,
    pub(crate) checkouts_failed: u64,
    pub(crate) probes_performed: u64,
    pub(crate) probes_failed: u64,
    pub(crate) recycles: u64,
    pub(crate) releases_ignored: u64,
}

impl<B: Backend> PoolInner<B> {
    pub(crate) fn mint_tag(&self) -> u64 {
        self.next_tag.fetch_add(1, Ordering::Relaxed)
    }

    /// Establish connections until the table holds `target` slots.
    ///
    /// Slots established by earlier attempts are kept; each retry only fills
    /// the remainder.
    async fn fill_to(&self, target: usize) -> Result<(), BackendError> {
        loop {
            if self.table.lock().current_size() >= target {
                return Ok(());
            }
            let conn = self.backend.connect().await?;
            let tag = self.mint_tag();
            let index = {
                let mut table = self.table.lock();
                if table.current_size() >= target {
                    None
                } else {
                    table.install(Some(Arc::new(conn)), tag)
                }
            };
            if let Some(index) = index {
                self.metrics.lock().connections_created += 1;
                tracing::debug!(slot = index, tag, "opened connection");
            }
        }
    }

    /// Provision one slot toward capacity. Returns true when the caller
    /// should rescan immediately instead of backing off.
    async fn grow_one(&self) -> bool {
        if !self.table.lock().has_room() {
            return false;
        }
        match self.backend.connect().await {
            Ok(conn) => {
                let conn = Arc::new(conn);
                let tag = self.mint_tag();
                let index = self.table.lock().install(Some(Arc::clone(&conn)), tag);
                match index {
                    Some(index) => {
                        self.metrics.lock().connections_created += 1;
                        tracing::debug!(slot = index, tag, "pool grown by one connection");
                        true
                    }
                    None => {
                        // A racing caller filled the last slot first; the
                        // rescan may still find its connection free.
                        let _ = conn.close().await;
                        true
                    }
                }
            }
            Err(err) => {
                if self.config.debug_level >= 1 {
                    tracing::warn!(error = %err, "unable to create new connection");
                }
                false
            }
        }
    }

    /// Return a checked-out slot to the pool by identity tag.
    ///
    /// Unknown tags (double release, or a slot recycled out from under a
    /// leaky holder) are a logged no-op. Never fails, never panics: this
    /// runs on cleanup paths.
    pub(crate) fn release(&self, tag: u64) {
        if self.table.lock().release_tag(tag) {
            tracing::trace!(tag, "connection returned to pool");
        } else {
            self.metrics.lock().releases_ignored += 1;
            if self.config.debug_level >= 1 {
                tracing::info!(tag, "release ignored: no in-use slot with this tag");
            }
        }
    }
}

impl<B: Backend> Pool<B> {
    /// Create a pool, establish its minimum connections, and start the
    /// housekeeping task.
    ///
    /// Connection failures at startup (typically the database still booting)
    /// are retried up to [`STARTUP_ATTEMPTS`] times with a
    /// [`STARTUP_RETRY_DELAY`] backoff. Exhausting every attempt is fatal:
    /// no pool is returned.
    pub async fn new(backend: B, config: PoolConfig) -> Result<Self, PoolError> {
        config.validate()?;

        let inner = Arc::new(PoolInner {
            backend,
            table: Mutex::new(SlotTable::new(config.max_connections as usize)),
            available: AtomicBool::new(true),
            next_tag: AtomicU64::new(1),
            created_at: Instant::now(),
            metrics: Mutex::new(PoolMetricsInner::default()),
            config,
        });

        let min = inner.config.min_connections as usize;
        let mut established = false;
        for attempt in 1..=STARTUP_ATTEMPTS {
            match inner.fill_to(min).await {
                Ok(()) => {
                    established = true;
                    break;
                }
                Err(err) => {
                    if inner.config.debug_level >= 1 {
                        tracing::warn!(
                            attempt,
                            max_attempts = STARTUP_ATTEMPTS,
                            error = %err,
                            "failed to create connection set at startup; will retry",
                        );
                    }
                    if attempt < STARTUP_ATTEMPTS {
                        tokio::time::sleep(STARTUP_RETRY_DELAY).await;
                    }
                }
            }
        }
        if !established {
            tracing::error!("all attempts at connecting to database exhausted");
            return Err(PoolError::Startup {
                attempts: STARTUP_ATTEMPTS,
            });
        }

        tracing::info!(
            min = inner.config.min_connections,
            max = inner.config.max_connections,
            checkout_timeout_secs = inner.config.checkout_timeout.as_secs(),
            "connection pool started"
        );

        let (stop, stop_rx) = watch::channel(false);
        let housekeeper = tokio::spawn(housekeeping::run(Arc::clone(&inner), stop_rx));

        Ok(Self {
            inner,
            stop,
            housekeeper: Mutex::new(Some(housekeeper)),
        })
    }

    /// Check out a connection.
    ///
    /// Scans the slot table round-robin; when nothing is free, grows the
    /// pool toward capacity, then backs off [`ACQUIRE_RETRY_DELAY`] between
    /// rescans. Gives up with [`PoolError::Exhausted`] after
    /// [`ACQUIRE_ATTEMPTS`] scans — exhaustion is an expected outcome under
    /// load, not a crash.
    ///
    /// Dropping the returned handle releases the slot; the physical
    /// connection stays open for the next caller.
    pub async fn acquire(&self) -> Result<PooledConnection<B>, PoolError> {
        for attempt in 1..=ACQUIRE_ATTEMPTS {
            if !self.inner.available.load(Ordering::Acquire) {
                if self.inner.config.debug_level >= 1 {
                    tracing::info!("checkout refused: pool is shutting down");
                }
                self.inner.metrics.lock().checkouts_failed += 1;
                return Err(PoolError::Closed);
            }

            let claimed = self.inner.table.lock().claim_free();
            if let Some(claimed) = claimed {
                self.inner.metrics.lock().checkouts_successful += 1;
                if self.inner.config.debug_level >= 3 {
                    tracing::debug!(
                        slot = claimed.index,
                        tag = claimed.tag,
                        "handing out connection"
                    );
                }
                return Ok(PooledConnection::new(claimed, Arc::clone(&self.inner)));
            }

            if self.inner.grow_one().await {
                continue;
            }

            if self.inner.config.debug_level >= 1 {
                tracing::info!(attempt, "connections exhausted; will wait and try again");
            }
            tokio::time::sleep(ACQUIRE_RETRY_DELAY).await;
        }

        self.inner.metrics.lock().checkouts_failed += 1;
        Err(PoolError::Exhausted {
            attempts: ACQUIRE_ATTEMPTS,
        })
    }

    /// Whether the pool still accepts checkouts.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.inner.available.load(Ordering::Acquire)
    }

    /// Current slot counts.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        let table = self.inner.table.lock();
        let (available, in_use) = table.status_counts();
        PoolStatus {
            available: available as u32,
            in_use: in_use as u32,
            total: table.current_size() as u32,
            max: table.capacity() as u32,
        }
    }

    /// Snapshot of pool counters.
    #[must_use]
    pub fn metrics(&self) -> PoolMetrics {
        let inner = self.inner.metrics.lock();
        PoolMetrics {
            connections_created: inner.connections_created,
            connections_closed: inner.connections_closed,
            checkouts_successful: inner.checkouts_successful,
            checkouts_failed: inner.checkouts_failed,
            probes_performed: inner.probes_performed,
            probes_failed: inner.probes_failed,
            recycles: inner.recycles,
            releases_ignored: inner.releases_ignored,
            uptime: self.inner.created_at.elapsed(),
        }
    }

    /// Multi-phase graceful shutdown.
    ///
    /// 1. New checkouts are refused immediately.
    /// 2. The housekeeping task is signalled and awaited up to `wait`.
    /// 3. For the remainder of the same window, in-flight holders may still
    ///    return connections.
    /// 4. Every slot's connection is then force-closed regardless of status.
    /// 5. Connections closed while still checked out are reported as
    ///    [`PoolError::UnsafeShutdown`] with their count; the shutdown
    ///    itself has still completed.
    pub async fn shutdown(&self, wait: Duration) -> Result<(), PoolError> {
        self.inner.available.store(false, Ordering::Release);
        let _ = self.stop.send(true);

        let housekeeper = self.housekeeper.lock().take();
        if let Some(housekeeper) = housekeeper {
            if tokio::time::timeout(wait, housekeeper).await.is_err() {
                tracing::warn!("housekeeping task did not stop within the shutdown window");
            }
        }

        // Give in-flight holders the rest of the window to return their
        // connections before force-closing.
        let deadline = Instant::now() + wait;
        while self.inner.table.lock().in_use_count() > 0 && Instant::now() < deadline {
            tokio::time::sleep(SHUTDOWN_POLL_INTERVAL).await;
        }

        let (conns, still_in_use) = self.inner.table.lock().drain_for_shutdown();
        let closed = conns.len() as u64;
        for conn in conns {
            if conn.close().await.is_err() && self.inner.config.debug_level >= 1 {
                tracing::info!("cannot close connection on shutdown");
            }
        }
        self.inner.metrics.lock().connections_closed += closed;

        if still_in_use > 0 {
            tracing::warn!(
                connections = still_in_use,
                wait_ms = wait.as_millis() as u64,
                "unsafe shutdown: had to close connections still in use"
            );
            return Err(PoolError::UnsafeShutdown {
                connections: still_in_use,
            });
        }
        tracing::info!("connection pool shut down");
        Ok(())
    }
}

impl<B: Backend> Drop for Pool<B> {
    fn drop(&mut self) {
        // Shutdown normally joins the task; abort covers pools dropped
        // without one.
        if let Some(housekeeper) = self.housekeeper.lock().take() {
            housekeeper.abort();
        }
    }
}

/// Slot counts at one instant.
#[derive(Debug, Clone, Copy)]
pub struct PoolStatus {
    /// Free slots holding a live connection.
    pub available: u32,
    /// Slots currently checked out.
    pub in_use: u32,
    /// Provisioned slots.
    pub total: u32,
    /// Pool capacity.
    pub max: u32,
}

impl PoolStatus {
    /// Checked-out share of capacity, as a percentage.
    #[must_use]
    pub fn utilization(&self) -> f64 {
        if self.max == 0 {
            return 0.0;
        }
        (self.in_use as f64 / self.max as f64) * 100.0
    }

    /// Whether every slot is provisioned.
    #[must_use]
    pub fn is_at_capacity(&self) -> bool {
        self.total >= self.max
    }
}

/// Counters collected since pool start.
#[derive(Debug, Clone)]
pub struct PoolMetrics {
    /// Physical connections established.
    pub connections_created: u64,
    /// Physical connections closed.
    pub connections_closed: u64,
    /// Successful checkouts.
    pub checkouts_successful: u64,
    /// Failed checkouts (exhaustion, pool closed).
    pub checkouts_failed: u64,
    /// Liveness probes performed by housekeeping.
    pub probes_performed: u64,
    /// Liveness probes that failed.
    pub probes_failed: u64,
    /// Connections replaced in place by housekeeping.
    pub recycles: u64,
    /// Releases that matched no slot (double release or recycled slot).
    pub releases_ignored: u64,
    /// Time since pool creation.
    pub uptime: Duration,
}

impl PoolMetrics {
    /// Checkout success rate, 0.0 to 1.0.
    #[must_use]
    pub fn checkout_success_rate(&self) -> f64 {
        let total = self.checkouts_successful + self.checkouts_failed;
        if total == 0 {
            return 1.0;
        }
        self.checkouts_successful as f64 / total as f64
    }
}

/// A connection checked out from the pool.
///
/// Dereferences to the backend connection. Dropping the handle returns the
/// slot to the pool — it never closes the physical connection. A handle held
/// past the configured checkout timeout loses its slot to housekeeping, after
/// which its drop is a logged no-op.
pub struct PooledConnection<B: Backend> {
    conn: Arc<B::Conn>,
    tag: u64,
    checked_out_at: Instant,
    pool: Arc<PoolInner<B>>,
}

impl<B: Backend> PooledConnection<B> {
    fn new(claimed: Claimed<B::Conn>, pool: Arc<PoolInner<B>>) -> Self {
        Self {
            conn: claimed.conn,
            tag: claimed.tag,
            checked_out_at: Instant::now(),
            pool,
        }
    }

    /// How long this handle has been checked out.
    #[must_use]
    pub fn held_for(&self) -> Duration {
        self.checked_out_at.elapsed()
    }
}

impl<B: Backend> fmt::Debug for PooledConnection<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("tag", &self.tag)
            .field("held_for", &self.held_for())
            .finish_non_exhaustive()
    }
}

impl<B: Backend> Deref for PooledConnection<B> {
    type Target = B::Conn;

    fn deref(&self) -> &B::Conn {
        &self.conn
    }
}

impl<B: Backend> Drop for PooledConnection<B> {
    fn drop(&mut self) {
        self.pool.release(self.tag);
    }
}
