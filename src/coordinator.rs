use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};

use crate::cache::SharedCaches;
use crate::config::PipelineSettings;
use crate::geometry::{CropWindow, Size};
use crate::listener::DetailedCropListener;
use crate::pipeline::InitState;
use crate::pool::WorkerPool;
use crate::processing::Develop;
use crate::refresh::RefreshMask;
use crate::region::CropRegion;
use crate::source::{ImageSource, MemorySource};
use crate::stages::StageOps;
use crate::state::ProcParams;

/// Parameters together with the upstream generation they belong to. Always
/// replaced as a unit, so a pass never pairs new parameters with a cached
/// intermediate of the old ones.
#[derive(Clone)]
pub(crate) struct ParamsSnapshot {
    pub params: Arc<ProcParams>,
    pub generation: u64,
}

/// Per-image state every region of that image reads through.
pub(crate) struct Shared {
    pub source: Arc<dyn ImageSource>,
    pub ops: Arc<dyn StageOps>,
    pub settings: PipelineSettings,
    params: RwLock<ParamsSnapshot>,
    /// Global processing lock. Held for a whole pipeline run, so at most one
    /// region processes at a time.
    pub processing: Mutex<SharedCaches>,
    /// Minor lock around the decode step.
    pub init: Mutex<InitState>,
    pub regions: Mutex<Vec<Weak<CropRegion>>>,
    pub pool: WorkerPool,
    next_region: AtomicU64,
}

impl Shared {
    pub fn snapshot(&self) -> ParamsSnapshot {
        self.params
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn params(&self) -> Arc<ProcParams> {
        self.snapshot().params
    }

    pub fn deregister(&self, region: &CropRegion) {
        let mut regions = self.regions.lock().unwrap_or_else(PoisonError::into_inner);
        regions.retain(|w| w.strong_count() > 0 && !std::ptr::eq(w.as_ptr(), region));
    }

    fn live_regions(&self) -> Vec<Arc<CropRegion>> {
        let mut regions = self.regions.lock().unwrap_or_else(PoisonError::into_inner);
        regions.retain(|w| w.strong_count() > 0);
        regions.iter().filter_map(Weak::upgrade).collect()
    }
}

/// Owns one opened image and hands out crop regions over it.
pub struct Coordinator {
    shared: Arc<Shared>,
}

impl Coordinator {
    pub fn new(
        source: Arc<dyn ImageSource>,
        ops: Arc<dyn StageOps>,
        settings: PipelineSettings,
        params: ProcParams,
    ) -> anyhow::Result<Self> {
        let pool = WorkerPool::new(settings.worker_threads)?;
        Ok(Self {
            shared: Arc::new(Shared {
                source,
                ops,
                settings,
                params: RwLock::new(ParamsSnapshot {
                    params: Arc::new(params),
                    generation: 0,
                }),
                processing: Mutex::new(SharedCaches::default()),
                init: Mutex::new(InitState::default()),
                regions: Mutex::new(Vec::new()),
                pool,
                next_region: AtomicU64::new(1),
            }),
        })
    }

    /// Opens `path` with the default stage implementation, picking up any
    /// saved edits next to it.
    pub fn open(path: &Path, settings: PipelineSettings) -> anyhow::Result<Self> {
        let source = MemorySource::open(path)?;
        let params = ProcParams::load(path).unwrap_or_default();
        Self::new(Arc::new(source), Arc::new(Develop), settings, params)
    }

    pub fn full_size(&self) -> Size {
        self.shared.source.full_size()
    }

    pub fn params(&self) -> Arc<ProcParams> {
        self.shared.params()
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.shared.settings
    }

    /// Creates a region over `window`. Nothing is processed until the first
    /// request.
    pub fn subscribe(
        &self,
        window: CropWindow,
        listener: Option<Arc<dyn DetailedCropListener>>,
    ) -> Arc<CropRegion> {
        let id = self.shared.next_region.fetch_add(1, Ordering::SeqCst);
        let region = Arc::new(CropRegion::new(id, window, listener, Arc::clone(&self.shared)));
        self.shared
            .regions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::downgrade(&region));
        tracing::info!(region = id, rect = ?window.rect, skip = window.skip, "crop region subscribed");
        region
    }

    pub fn region_count(&self) -> usize {
        self.shared.live_regions().len()
    }

    /// Installs new parameters and schedules every live region to refresh
    /// the stages in `mask`. Returns without waiting for any pass.
    ///
    /// Upstream changes start a new generation, which drops the shared
    /// full-resolution intermediate and noise statistics at the next pass.
    pub fn set_params(&self, params: ProcParams, mask: RefreshMask) {
        {
            let mut current = self
                .shared
                .params
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            if mask.touches_upstream() {
                current.generation += 1;
            }
            current.params = Arc::new(params);
            tracing::debug!(generation = current.generation, mask = ?mask, "parameters changed");
        }
        for region in self.shared.live_regions() {
            region.request_refresh(mask);
        }
    }

    /// Like [`Coordinator::set_params`], deriving the mask from what changed.
    pub fn update_params(&self, params: ProcParams) -> RefreshMask {
        let mask = params.refresh_mask_since(&self.params());
        if !mask.is_empty() {
            self.set_params(params, mask);
        }
        mask
    }
}
