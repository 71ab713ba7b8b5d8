use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::cache::SharedCaches;
use crate::coordinator::Shared;
use crate::geometry::{CropLayout, CropWindow};
use crate::listener::DetailedCropListener;
use crate::pipeline::{self, PipelineEnv, PipelineState};
use crate::refresh::RefreshMask;
use crate::scheduler::{SchedulerState, UpdateScheduler};
use crate::stages::StageReport;

/// One region of interest over an opened image: a main view, a thumbnail or
/// a detail window. Owns its layout and stage buffers.
pub struct CropRegion {
    id: u64,
    window: Mutex<CropWindow>,
    /// Region lock. Held for a whole pipeline run.
    state: Mutex<PipelineState>,
    scheduler: UpdateScheduler,
    destroyed: AtomicBool,
    shared: Arc<Shared>,
}

impl CropRegion {
    pub(crate) fn new(
        id: u64,
        window: CropWindow,
        listener: Option<Arc<dyn DetailedCropListener>>,
        shared: Arc<Shared>,
    ) -> Self {
        Self {
            id,
            window: Mutex::new(window),
            state: Mutex::new(PipelineState {
                listener,
                ..Default::default()
            }),
            scheduler: UpdateScheduler::default(),
            destroyed: AtomicBool::new(false),
            shared,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn window(&self) -> CropWindow {
        *self.window.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Changes the rectangle and scale used by the next run.
    pub fn set_window(&self, window: CropWindow) {
        *self.window.lock().unwrap_or_else(PoisonError::into_inner) = window;
    }

    /// Moves the region and schedules a refresh.
    pub fn request(self: &Arc<Self>, window: CropWindow) {
        self.set_window(window);
        self.request_update();
    }

    /// Schedules a full refresh without blocking. If a run is already in
    /// flight the request is folded into it.
    pub fn request_update(self: &Arc<Self>) {
        self.request_refresh(RefreshMask::ALL);
    }

    /// Schedules a refresh of the stages in `mask` on the worker pool.
    pub fn request_refresh(self: &Arc<Self>, mask: RefreshMask) {
        if self.is_destroyed() {
            return;
        }
        if !self.scheduler.try_claim(mask) {
            return;
        }
        let region = Arc::clone(self);
        if !self.shared.pool.spawn(move || region.full_update()) {
            tracing::warn!(region = self.id, "worker pool shut down, dropping update");
            self.scheduler.abandon();
        }
    }

    /// Coalesced refresh loop run by the worker that claimed the region.
    /// Holds the global processing lock across all passes. A pass that panics
    /// costs the region its buffers, not its scheduling.
    pub fn full_update(&self) {
        let mut caches = self
            .shared
            .processing
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mut passes = 0;
        loop {
            let mask = self.scheduler.begin_pass();
            if self.is_destroyed() {
                self.scheduler.abandon();
                return;
            }
            let pass = catch_unwind(AssertUnwindSafe(|| self.run_locked(&mut caches, mask)));
            if pass.is_err() {
                tracing::error!(region = self.id, "pipeline pass panicked, dropping region buffers");
                self.recover(&mut caches);
            }
            passes += 1;
            if !self.scheduler.finish_pass() {
                break;
            }
            tracing::debug!(region = self.id, passes, "request arrived mid-run, running again");
        }
    }

    /// Synchronously refreshes the stages in `mask`. Returns `None` once the
    /// region has been destroyed.
    pub fn update(&self, mask: RefreshMask) -> Option<StageReport> {
        let mut caches = self
            .shared
            .processing
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.run_locked(&mut caches, mask)
    }

    fn run_locked(&self, caches: &mut SharedCaches, mask: RefreshMask) -> Option<StageReport> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if self.is_destroyed() {
            return None;
        }
        let window = self.window();
        let snapshot = self.shared.snapshot();
        let env = PipelineEnv {
            region: self.id,
            source: self.shared.source.as_ref(),
            ops: self.shared.ops.as_ref(),
            settings: &self.shared.settings,
            params: &snapshot.params,
            init: &self.shared.init,
            upstream_generation: snapshot.generation,
        };
        Some(pipeline::run(&mut state, window, mask, &env, caches))
    }

    /// Drops whatever a panicked pass left half-written. The next pass
    /// reallocates and runs every stage.
    fn recover(&self, caches: &mut SharedCaches) {
        caches.invalidate();
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .release();
        self.state.clear_poison();
        self.shared.init.clear_poison();
    }

    /// Replaces the listener. Only the region lock is taken.
    pub fn set_listener(&self, listener: Option<Arc<dyn DetailedCropListener>>) {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .listener = listener;
    }

    pub fn layout(&self) -> Option<CropLayout> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .layout
    }

    pub fn last_report(&self) -> StageReport {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last_report
            .clone()
    }

    pub fn allocated_buffers(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .cache
            .allocated()
    }

    pub fn scheduler_state(&self) -> SchedulerState {
        self.scheduler.state()
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Frees every buffer and leaves the coordinator's registry. Waits for an
    /// in-flight run to finish first.
    pub fn destroy(&self) {
        let _caches = self
            .shared
            .processing
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        state.release();
        state.listener = None;
        self.shared.deregister(self);
        tracing::info!(region = self.id, "crop region destroyed");
    }
}
