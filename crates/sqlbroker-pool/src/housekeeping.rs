//! Background housekeeping: the periodic sweep that drains driver warnings
//! and recycles broken, aged-out, and leaked connections.
//!
//! The sweep is the pool's fault tolerance against bad connections and
//! callers that never return what they borrowed. It only ever replaces a
//! slot's physical connection in place — slots are never removed — and a
//! single bad connection can never take the loop down: backend errors are
//! logged and the sweep moves on.

use std::sync::Arc;

use sqlbroker_backend::{Backend, BackendConnection};
use tokio::sync::watch;
use tokio::time::Instant;

use crate::pool::{HOUSEKEEPING_INTERVAL, PoolInner};

/// What the sweep decided for one slot, chosen under the table lock.
enum Action<C> {
    /// Leave the slot alone this cycle.
    Skip,
    /// The slot is claimed; probe its connection off-lock.
    Probe(Arc<C>),
    /// The slot is claimed; replace its connection.
    Recycle(Option<Arc<C>>),
}

/// Run sweeps every [`HOUSEKEEPING_INTERVAL`] until `stop` signals or the
/// pool is dropped.
pub(crate) async fn run<B: Backend>(inner: Arc<PoolInner<B>>, mut stop: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    tracing::debug!("housekeeping task stopping");
                    return;
                }
            }
            _ = tokio::time::sleep(HOUSEKEEPING_INTERVAL) => {
                sweep(&inner).await;
            }
        }
    }
}

/// One pass over every provisioned slot.
pub(crate) async fn sweep<B: Backend>(inner: &PoolInner<B>) {
    let size = inner.table.lock().current_size();
    let debug_level = inner.config.debug_level;

    for index in 0..size {
        // Drain and log driver warnings, best effort.
        let conn = inner.table.lock().connection_at(index);
        if let Some(conn) = conn {
            for warning in conn.drain_warnings() {
                if debug_level >= 2 {
                    tracing::warn!(slot = index, %warning, "driver warning on connection");
                }
            }
        }

        let now = Instant::now();
        let action = classify(inner, index, now);

        match action {
            Action::Skip => {}
            Action::Probe(conn) => {
                inner.metrics.lock().probes_performed += 1;
                let healthy = conn.ping().await.is_ok() && conn.is_open();
                if healthy {
                    inner.table.lock().end_maintenance(index);
                } else {
                    inner.metrics.lock().probes_failed += 1;
                    recycle(inner, index, Some(conn)).await;
                }
            }
            Action::Recycle(old) => recycle(inner, index, old).await,
        }
    }
}

/// Decide a slot's fate under the table lock.
///
/// In-use slots are skipped unless held past the checkout timeout (the leak
/// safety net). Free slots are claimed for maintenance; a slot with no live
/// handle goes straight to re-provisioning, an over-age slot straight to
/// recycling, and everything else gets probed off-lock.
fn classify<B: Backend>(inner: &PoolInner<B>, index: usize, now: Instant) -> Action<B::Conn> {
    let debug_level = inner.config.debug_level;
    let mut table = inner.table.lock();

    if let Some(held) = table.held_duration(index, now) {
        if debug_level >= 3 {
            tracing::debug!(
                slot = index,
                held_ms = held.as_millis() as u64,
                "connection in use"
            );
        }
        if let Some(timeout) = inner.config.leak_timeout() {
            if held > timeout {
                if let Some(old) = table.claim_leaked(index) {
                    if debug_level >= 2 {
                        tracing::warn!(
                            slot = index,
                            held_ms = held.as_millis() as u64,
                            "connection failed to be returned in time; recycling"
                        );
                    }
                    return Action::Recycle(old);
                }
            }
        }
        return Action::Skip;
    }

    let Some(claim) = table.begin_maintenance(index) else {
        // Raced with a checkout; catch this slot next cycle.
        return Action::Skip;
    };

    match claim.conn {
        // Provisioned but connection creation failed earlier; try to repair.
        None => Action::Recycle(None),
        Some(conn) => {
            let age = now.saturating_duration_since(claim.created_at);
            if age > inner.config.effective_max_age() {
                if debug_level >= 2 {
                    tracing::warn!(
                        slot = index,
                        age_secs = age.as_secs(),
                        "connection reached max age; recycling"
                    );
                }
                Action::Recycle(Some(conn))
            } else {
                Action::Probe(conn)
            }
        }
    }
}

/// Replace a claimed slot's connection in place.
///
/// Close failures on the old handle are ignored (it may already be dead).
/// If no replacement can be opened, the slot is left free with no handle so
/// a later pass can repair it once the backend returns.
async fn recycle<B: Backend>(inner: &PoolInner<B>, index: usize, old: Option<Arc<B::Conn>>) {
    let debug_level = inner.config.debug_level;
    if let Some(old) = old {
        if old.close().await.is_err() && debug_level >= 1 {
            tracing::info!(
                slot = index,
                "cannot close connection; may already be closed, recycling anyway"
            );
        }
        inner.metrics.lock().connections_closed += 1;
    }

    match inner.backend.connect().await {
        Ok(conn) => {
            let tag = inner.mint_tag();
            inner.table.lock().replace(index, Some(Arc::new(conn)), tag);
            let mut metrics = inner.metrics.lock();
            metrics.connections_created += 1;
            metrics.recycles += 1;
            if debug_level >= 2 {
                tracing::warn!(slot = index, tag, "recycled connection");
            }
        }
        Err(err) => {
            if debug_level >= 1 {
                tracing::warn!(
                    slot = index,
                    error = %err,
                    "failed to create replacement connection; will retry next cycle"
                );
            }
            let tag = inner.mint_tag();
            inner.table.lock().replace(index, None, tag);
        }
    }
}
