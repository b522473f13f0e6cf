//! Per-pipeline busy flag.
//!
//! A trigger that finds the latch held is dropped, not queued. The guard
//! releases the latch when it goes out of scope, including on early return
//! and unwinding. The flag lives in memory only, so a process restart always
//! starts with every latch free.

use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Default)]
pub struct BusyLatch {
    busy: AtomicBool,
}

impl BusyLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the latch, or `None` if a run already holds it.
    pub fn try_acquire(&self) -> Option<LatchGuard<'_>> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| LatchGuard { latch: self })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Holds a [`BusyLatch`] until dropped.
#[derive(Debug)]
pub struct LatchGuard<'a> {
    latch: &'a BusyLatch,
}

impl Drop for LatchGuard<'_> {
    fn drop(&mut self) {
        self.latch.busy.store(false, Ordering::Release);
    }
}
