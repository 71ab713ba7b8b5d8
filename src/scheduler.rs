use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::refresh::RefreshMask;

/// Whether a region currently has a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
}

/// Single-flight update scheduling with coalescing.
///
/// At most one worker owns a region at a time. Requests arriving while it runs
/// set the superseded flag and are folded into one more pass, their refresh
/// masks OR'd together.
#[derive(Debug, Default)]
pub struct UpdateScheduler {
    running: AtomicBool,
    rerun: AtomicBool,
    pending: AtomicU32,
}

impl UpdateScheduler {
    /// Registers a request for the stages in `mask`. Returns `true` if the
    /// caller now owns the region and must start a worker.
    pub fn try_claim(&self, mask: RefreshMask) -> bool {
        self.pending.fetch_or(mask.bits(), Ordering::SeqCst);
        self.rerun.store(true, Ordering::SeqCst);
        self.running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Called by the owning worker right before a pass. Returns the stages
    /// requested since the previous pass.
    pub fn begin_pass(&self) -> RefreshMask {
        self.rerun.store(false, Ordering::SeqCst);
        RefreshMask::from_bits_truncate(self.pending.swap(0, Ordering::SeqCst))
    }

    /// Called by the owning worker after a pass. Returns `true` if another
    /// pass is needed; otherwise ownership has been released.
    pub fn finish_pass(&self) -> bool {
        if self.rerun.load(Ordering::SeqCst) {
            return true;
        }
        self.running.store(false, Ordering::SeqCst);
        // A request that slipped in between the check and the release found
        // the region busy and did not start a worker.
        self.rerun.load(Ordering::SeqCst)
            && self
                .running
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
    }

    /// Gives up ownership without another pass, e.g. when the worker could
    /// not be started.
    pub fn abandon(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn state(&self) -> SchedulerState {
        if self.running.load(Ordering::SeqCst) {
            SchedulerState::Running
        } else {
            SchedulerState::Idle
        }
    }
}
