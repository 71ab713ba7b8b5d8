use crate::buffer::{Slot, WorkImage};
use crate::geometry::CropLayout;
use crate::stages::{Flow, NoiseStats};
use crate::state::WorkingProfile;

/// Per-region stage buffers.
///
/// Decode, denoise, spot and HDR buffers cover the source rectangle
/// (`traf` sized); the transform and curve buffers cover the padded
/// rectangle (`crop` sized).
#[derive(Debug, Default)]
pub struct StageCache {
    pub decoded: Slot,
    pub denoised: Slot,
    pub spot: Slot,
    pub hdr: Slot,
    pub transformed: Slot,
    pub curves: [Slot; 3],
    pub hdr_flow: Flow,
    pub curve_flows: [Flow; 3],
    dims: Option<(u32, u32, u32, u32)>,
}

impl StageCache {
    /// Sizes the always-present buffers for `layout`. Returns `true` when any
    /// buffer had to be reallocated, which leaves every stage stale.
    pub fn fit(&mut self, layout: &CropLayout, profile: WorkingProfile) -> bool {
        let dims = (
            layout.traf_w as u32,
            layout.traf_h as u32,
            layout.crop_w as u32,
            layout.crop_h as u32,
        );
        let changed = self.dims != Some(dims);
        if changed {
            // Optional stages reallocate on demand.
            self.denoised.release();
            self.spot.release();
            self.hdr.release();
            self.transformed.release();
            self.hdr_flow = Flow::Continue;
            self.curve_flows = [Flow::Continue; 3];
            self.dims = Some(dims);
        }
        self.decoded.ensure_size(dims.0, dims.1, profile);
        for slot in &mut self.curves {
            slot.ensure_size(dims.2, dims.3, profile);
        }
        changed
    }

    pub fn release_all(&mut self) {
        *self = Self::default();
    }

    /// Number of allocated buffers.
    pub fn allocated(&self) -> usize {
        [
            &self.decoded,
            &self.denoised,
            &self.spot,
            &self.hdr,
            &self.transformed,
        ]
        .into_iter()
        .chain(self.curves.iter())
        .filter(|s| s.is_allocated())
        .count()
    }
}

/// Single-slot cache for the full-resolution HDR intermediate, keyed by the
/// upstream parameter generation it was computed for.
#[derive(Debug, Default)]
pub struct FullResCache {
    entry: Option<(u64, WorkImage, Flow)>,
}

impl FullResCache {
    /// Returns the cached image and the flow its compression reported for
    /// `generation`, computing both on a miss.
    pub fn get_or_compute(
        &mut self,
        generation: u64,
        compute: impl FnOnce() -> (WorkImage, Flow),
    ) -> (&WorkImage, Flow) {
        let hit = matches!(&self.entry, Some((g, _, _)) if *g == generation);
        if hit {
            tracing::debug!(generation, "full-resolution cache hit");
        } else {
            tracing::debug!(generation, "full-resolution cache miss");
            self.entry = None;
        }
        let (_, image, flow) = self.entry.get_or_insert_with(|| {
            let (image, flow) = compute();
            (generation, image, flow)
        });
        (image, *flow)
    }

    pub fn invalidate(&mut self) {
        if self.entry.take().is_some() {
            tracing::debug!("full-resolution cache invalidated");
        }
    }

    pub fn is_filled(&self) -> bool {
        self.entry.is_some()
    }
}

/// State shared by all regions of one image. Only reachable through the
/// coordinator's global processing lock.
#[derive(Debug, Default)]
pub struct SharedCaches {
    pub full_res: FullResCache,
    pub noise: Option<NoiseStats>,
    generation: u64,
}

impl SharedCaches {
    pub fn invalidate(&mut self) {
        self.full_res.invalidate();
        self.noise = None;
    }

    /// Drops everything computed for an upstream generation other than
    /// `generation`.
    pub fn sync(&mut self, generation: u64) {
        if self.generation != generation {
            tracing::debug!(from = self.generation, to = generation, "upstream parameters changed");
            self.invalidate();
            self.generation = generation;
        }
    }
}
