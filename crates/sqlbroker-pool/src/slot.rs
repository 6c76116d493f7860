//! The slot table: fixed-capacity storage for pooled connections.
//!
//! One [`Slot`] record per index instead of the parallel status/time/id
//! arrays this design descends from; every status transition happens while
//! the caller holds the pool's table mutex, so the table itself carries no
//! synchronization.

use std::sync::Arc;
use std::time::Duration;

use sqlbroker_backend::BackendConnection;
use tokio::time::Instant;

/// Checkout state of one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SlotStatus {
    /// Available for checkout.
    Free,
    /// Checked out by exactly one caller.
    InUse,
    /// Claimed by the housekeeping sweep for probing or recycling.
    Maintenance,
}

/// One position in the pool.
///
/// `conn` is `None` when the slot is provisioned but its last connection
/// attempt failed; such slots are skipped by checkout and repaired by the
/// next housekeeping pass.
pub(crate) struct Slot<C> {
    pub(crate) conn: Option<Arc<C>>,
    pub(crate) status: SlotStatus,
    pub(crate) tag: u64,
    pub(crate) checked_out_at: Option<Instant>,
    pub(crate) created_at: Instant,
}

impl<C> Slot<C> {
    fn new(conn: Option<Arc<C>>, tag: u64) -> Self {
        Self {
            conn,
            status: SlotStatus::Free,
            tag,
            checked_out_at: None,
            created_at: Instant::now(),
        }
    }
}

/// A successful checkout claim.
pub(crate) struct Claimed<C> {
    pub(crate) index: usize,
    pub(crate) conn: Arc<C>,
    pub(crate) tag: u64,
}

/// A housekeeping claim on a free slot.
pub(crate) struct MaintenanceClaim<C> {
    pub(crate) conn: Option<Arc<C>>,
    pub(crate) created_at: Instant,
}

/// Ordered sequence of slots with a round-robin cursor.
///
/// The slot vector is the provisioned portion of the pool: its length grows
/// lazily from the configured minimum up to `capacity` and never shrinks.
pub(crate) struct SlotTable<C> {
    capacity: usize,
    slots: Vec<Slot<C>>,
    last_served: usize,
}

impl<C> SlotTable<C> {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity,
            slots: Vec::with_capacity(capacity),
            last_served: 0,
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn current_size(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn has_room(&self) -> bool {
        self.slots.len() < self.capacity
    }

    /// Provision a new slot. Returns its index, or `None` when a racing
    /// caller already filled the capacity.
    pub(crate) fn install(&mut self, conn: Option<Arc<C>>, tag: u64) -> Option<usize> {
        if !self.has_room() {
            return None;
        }
        self.slots.push(Slot::new(conn, tag));
        Some(self.slots.len() - 1)
    }

    /// Replace a slot's physical connection in place, resetting its creation
    /// timestamp and identity tag. The slot comes back `Free`.
    pub(crate) fn replace(&mut self, index: usize, conn: Option<Arc<C>>, tag: u64) {
        if let Some(slot) = self.slots.get_mut(index) {
            *slot = Slot::new(conn, tag);
        }
    }

    /// Free the slot whose identity tag matches. Returns false when no
    /// in-use slot carries the tag (double release, or the slot has since
    /// been recycled under a new tag).
    pub(crate) fn release_tag(&mut self, tag: u64) -> bool {
        for slot in &mut self.slots {
            if slot.status == SlotStatus::InUse && slot.tag == tag {
                slot.status = SlotStatus::Free;
                slot.checked_out_at = None;
                return true;
            }
        }
        false
    }

    /// How long the slot has been checked out, if it is in use.
    pub(crate) fn held_duration(&self, index: usize, now: Instant) -> Option<Duration> {
        let slot = self.slots.get(index)?;
        if slot.status != SlotStatus::InUse {
            return None;
        }
        let checked_out_at = slot.checked_out_at?;
        Some(now.saturating_duration_since(checked_out_at))
    }

    /// Claim an in-use slot for recycling after its holder failed to return
    /// it. The holder's eventual release becomes a no-op against the new tag.
    pub(crate) fn claim_leaked(&mut self, index: usize) -> Option<Option<Arc<C>>> {
        let slot = self.slots.get_mut(index)?;
        if slot.status != SlotStatus::InUse {
            return None;
        }
        slot.status = SlotStatus::Maintenance;
        slot.checked_out_at = None;
        Some(slot.conn.clone())
    }

    /// Take a free slot offline for probing or recycling.
    pub(crate) fn begin_maintenance(&mut self, index: usize) -> Option<MaintenanceClaim<C>> {
        let slot = self.slots.get_mut(index)?;
        if slot.status != SlotStatus::Free {
            return None;
        }
        slot.status = SlotStatus::Maintenance;
        Some(MaintenanceClaim {
            conn: slot.conn.clone(),
            created_at: slot.created_at,
        })
    }

    /// Return a healthy slot from maintenance to the free state unchanged.
    pub(crate) fn end_maintenance(&mut self, index: usize) {
        if let Some(slot) = self.slots.get_mut(index) {
            if slot.status == SlotStatus::Maintenance {
                slot.status = SlotStatus::Free;
            }
        }
    }

    /// The slot's connection, if any, for best-effort inspection.
    pub(crate) fn connection_at(&self, index: usize) -> Option<Arc<C>> {
        self.slots.get(index)?.conn.clone()
    }

    pub(crate) fn in_use_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.status == SlotStatus::InUse)
            .count()
    }

    /// (free-with-live-handle, in-use) counts for status snapshots.
    pub(crate) fn status_counts(&self) -> (usize, usize) {
        let mut free = 0;
        let mut in_use = 0;
        for slot in &self.slots {
            match slot.status {
                SlotStatus::Free if slot.conn.is_some() => free += 1,
                SlotStatus::InUse => in_use += 1,
                _ => {}
            }
        }
        (free, in_use)
    }

    /// Strip every slot of its connection for final shutdown, regardless of
    /// status. Returns the stripped connections and how many were still
    /// checked out.
    pub(crate) fn drain_for_shutdown(&mut self) -> (Vec<Arc<C>>, usize) {
        let mut conns = Vec::new();
        let mut still_in_use = 0;
        for slot in &mut self.slots {
            if slot.status == SlotStatus::InUse {
                still_in_use += 1;
            }
            slot.status = SlotStatus::Free;
            slot.checked_out_at = None;
            if let Some(conn) = slot.conn.take() {
                conns.push(conn);
            }
        }
        (conns, still_in_use)
    }
}

impl<C: BackendConnection> SlotTable<C> {
    /// Round-robin checkout: one full pass over the provisioned slots,
    /// starting just past the last slot handed out and wrapping once.
    ///
    /// Eligible slots are `Free`, hold a live handle, and report themselves
    /// open. The claimed slot is marked `InUse` with a fresh checkout stamp.
    pub(crate) fn claim_free(&mut self) -> Option<Claimed<C>> {
        let size = self.slots.len();
        if size == 0 {
            return None;
        }
        let start = (self.last_served + 1) % size;
        for step in 0..size {
            let index = (start + step) % size;
            let candidate = match &self.slots[index] {
                Slot {
                    status: SlotStatus::Free,
                    conn: Some(conn),
                    ..
                } if conn.is_open() => Some(Arc::clone(conn)),
                _ => None,
            };
            let Some(conn) = candidate else { continue };
            let slot = &mut self.slots[index];
            slot.status = SlotStatus::InUse;
            slot.checked_out_at = Some(Instant::now());
            let tag = slot.tag;
            self.last_served = index;
            return Some(Claimed { index, conn, tag });
        }
        None
    }
}
