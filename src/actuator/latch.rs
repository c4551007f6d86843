//! Emergency-stop latch.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Set by an emergency stop, cleared only explicitly.
///
/// Besides the flag, the latch counts trips. A formula commit records the
/// count when its check phase starts and compares before committing, so a
/// stop that was raised and cleared in between still aborts the commit.
#[derive(Debug, Default)]
pub struct EmergencyLatch {
    active: AtomicBool,
    trips: AtomicU64,
}

impl EmergencyLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Engages the latch. Returns `true` if it was not already engaged.
    pub fn engage(&self) -> bool {
        let was_active = self.active.swap(true, Ordering::SeqCst);
        self.trips.fetch_add(1, Ordering::SeqCst);
        !was_active
    }

    /// Releases the latch. Returns `true` if it was engaged.
    pub fn clear(&self) -> bool {
        self.active.swap(false, Ordering::SeqCst)
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn epoch(&self) -> u64 {
        self.trips.load(Ordering::SeqCst)
    }

    /// Engaged now, or tripped at least once after `epoch` was read.
    pub fn tripped_since(&self, epoch: u64) -> bool {
        self.is_active() || self.epoch() != epoch
    }
}
