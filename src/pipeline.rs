use std::sync::{Arc, Mutex, PoisonError};

use crate::buffer::{Slot, WorkImage};
use crate::cache::{SharedCaches, StageCache};
use crate::config::PipelineSettings;
use crate::geometry::{CropLayout, CropWindow, Rect, Size, grow_on_grid};
use crate::listener::{DetailedCrop, DetailedCropListener};
use crate::processing::spots;
use crate::refresh::RefreshMask;
use crate::source::{ImageSource, PreviewProps};
use crate::stages::{BufferOrigin, Flow, NoiseStats, Stage, StageOps, StageOutcome, StageReport};
use crate::state::{ProcParams, WhiteBalance, WorkingProfile};

/// Longest edge of the coarse decode used for noise estimation.
const NOISE_SAMPLE_EDGE: i32 = 512;

/// Coordinator state touched by the decode step, guarded by its own small lock.
#[derive(Debug, Default)]
pub struct InitState {
    /// White balance of the most recent decode.
    pub current_wb: WhiteBalance,
}

/// Everything a pipeline run reads but does not own.
pub struct PipelineEnv<'a> {
    pub region: u64,
    pub source: &'a dyn ImageSource,
    pub ops: &'a dyn StageOps,
    pub settings: &'a PipelineSettings,
    pub params: &'a ProcParams,
    pub init: &'a Mutex<InitState>,
    /// Bumped together with `params` whenever upstream parameters change.
    pub upstream_generation: u64,
}

impl PipelineEnv<'_> {
    /// Decodes `props` into `dest` and brings it into the working space.
    fn decode_into(&self, props: &PreviewProps, dest: &mut WorkImage) {
        let mut init = self.init.lock().unwrap_or_else(PoisonError::into_inner);
        init.current_wb = self.params.white_balance;
        self.source
            .get_image(&init.current_wb, props, dest, &self.params.exposure);
        // Film negatives carry their own conversion.
        if self.params.film_negative.enabled {
            self.source
                .film_negative(dest, &self.params.film_negative, &self.params.icm);
        } else {
            self.source
                .convert_color_space(dest, &self.params.icm, &init.current_wb);
        }
    }

    fn noise_stats(&self, shared: &mut SharedCaches) -> NoiseStats {
        if let Some(stats) = shared.noise {
            return stats;
        }
        let full = self.source.full_size();
        let skip = (full.w.max(full.h) + NOISE_SAMPLE_EDGE - 1) / NOISE_SAMPLE_EDGE;
        let props = PreviewProps::new(full.whole(), skip.max(1));
        let (w, h) = self.source.size(&props);
        let mut sample = WorkImage::allocate(w, h, self.params.icm.working);
        self.decode_into(&props, &mut sample);
        let stats = self.ops.estimate_noise(&sample);
        tracing::debug!(sigma = ?stats.sigma, "estimated image noise");
        shared.noise = Some(stats);
        stats
    }
}

/// Per-region pipeline state, guarded by the region lock.
#[derive(Default)]
pub struct PipelineState {
    pub layout: Option<CropLayout>,
    pub cache: StageCache,
    pub listener: Option<Arc<dyn DetailedCropListener>>,
    pub last_report: StageReport,
}

impl PipelineState {
    pub fn release(&mut self) {
        self.cache.release_all();
        self.layout = None;
        self.last_report = StageReport::default();
    }
}

/// Traf-sized buffer currently holding the newest pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Working {
    Decoded,
    Denoised,
    Spot,
    Hdr,
}

fn working_buf(cache: &StageCache, at: Working) -> Option<&WorkImage> {
    match at {
        Working::Decoded => cache.decoded.get(),
        Working::Denoised => cache.denoised.get(),
        Working::Spot => cache.spot.get(),
        Working::Hdr => cache.hdr.get(),
    }
}

/// Runs `stage` into the slot picked by `select`, seeded with a copy of `input`.
fn run_into(
    cache: &mut StageCache,
    select: fn(&mut StageCache) -> &mut Slot,
    input: Option<Working>,
    size: (u32, u32),
    profile: WorkingProfile,
    stage: impl FnOnce(&mut WorkImage, &StageCache),
) {
    let mut slot = std::mem::take(select(cache));
    let buf = slot.ensure_size(size.0, size.1, profile);
    if let Some(src) = input.and_then(|at| working_buf(cache, at)) {
        buf.copy_from(src);
    }
    stage(buf, cache);
    *select(cache) = slot;
}

/// Computes the layout for `window`, refreshes the stages selected by `mask`
/// and delivers the trimmed result to the listener.
pub fn run(
    state: &mut PipelineState,
    window: CropWindow,
    mask: RefreshMask,
    env: &PipelineEnv<'_>,
    shared: &mut SharedCaches,
) -> StageReport {
    shared.sync(env.upstream_generation);
    let params = env.params;
    let full = env.source.full_size();
    let margin = env.ops.overscan(params, full).margin(env.settings);
    let layout = CropLayout::compute(
        window,
        full,
        env.settings.border,
        |r| {
            let source = env.ops.trans_coord(params, full, r);
            // Healing can read from anywhere in the image.
            let reach = params
                .spots
                .active()
                .then(|| spots::source_bounds(&params.spots.entries, source))
                .flatten();
            match reach {
                Some(extra) => grow_on_grid(source, extra, r, window.skip as i32, full),
                None => source,
            }
        },
        margin,
        |r, skip| env.source.size(&PreviewProps::new(r, skip as i32)),
    );
    let profile = params.icm.working;

    let reallocated = state.cache.fit(&layout, profile);
    let moved = state.layout != Some(layout);
    if reallocated {
        tracing::debug!(
            region = env.region,
            crop_w = layout.crop_w,
            crop_h = layout.crop_h,
            traf_w = layout.traf_w,
            traf_h = layout.traf_h,
            "reallocated crop buffers"
        );
    }
    state.layout = Some(layout);
    let mask = if reallocated || moved {
        RefreshMask::ALL
    } else {
        mask
    };

    let skip = layout.skip;
    let traf = (layout.traf_w as u32, layout.traf_h as u32);
    let crop = (layout.crop_w as u32, layout.crop_h as u32);
    let src_origin = BufferOrigin::of(layout.source, skip);
    let crop_origin = BufferOrigin::of(layout.padded, skip);
    let cache = &mut state.cache;
    let mut report = StageReport::default();
    let mut dirty = false;

    // Decode.
    if mask.contains(RefreshMask::INIT) {
        dirty = true;
        let props = PreviewProps::new(layout.source, skip);
        let decoded = cache.decoded.ensure_size(traf.0, traf.1, profile);
        env.decode_into(&props, decoded);
        report.record(Stage::Decode, StageOutcome::Ran);
    } else {
        report.record(Stage::Decode, StageOutcome::Cached);
    }
    let mut at = Working::Decoded;

    // Linear denoise.
    let denoise_on = params.denoise.enabled && (skip == 1 || env.settings.denoise_zoomed_out);
    if dirty
        || mask.contains(RefreshMask::LINDENOISE)
        || (denoise_on && !cache.denoised.is_allocated())
    {
        dirty = true;
        if denoise_on {
            let noise = env.noise_stats(shared);
            run_into(cache, |c| &mut c.denoised, Some(at), traf, profile, |buf, _| {
                env.ops.denoise(buf, &params.denoise, &noise, skip);
            });
            at = Working::Denoised;
            report.record(Stage::Denoise, StageOutcome::Ran);
        } else {
            cache.denoised.release();
            report.record(Stage::Denoise, StageOutcome::Unused);
        }
    } else if cache.denoised.is_allocated() {
        at = Working::Denoised;
        report.record(Stage::Denoise, StageOutcome::Cached);
    } else {
        report.record(Stage::Denoise, StageOutcome::Unused);
    }

    // Spot removal.
    let spots_on = params.spots.active();
    if dirty || mask.contains(RefreshMask::SPOT) || (spots_on && !cache.spot.is_allocated()) {
        dirty = true;
        if spots_on {
            run_into(cache, |c| &mut c.spot, Some(at), traf, profile, |buf, _| {
                env.ops.remove_spots(buf, &params.spots.entries, src_origin);
            });
            at = Working::Spot;
            report.record(Stage::Spot, StageOutcome::Ran);
        } else {
            cache.spot.release();
            report.record(Stage::Spot, StageOutcome::Unused);
        }
    } else if spots_on {
        at = Working::Spot;
        report.record(Stage::Spot, StageOutcome::Cached);
    } else {
        report.record(Stage::Spot, StageOutcome::Unused);
    }

    // Dynamic range compression, which needs the whole image.
    let hdr_on = params.hdr_active();
    if dirty || mask.contains(RefreshMask::HDR) || (hdr_on && !cache.hdr.is_allocated()) {
        dirty = true;
        if hdr_on {
            let flow = compress_region(cache, at, &layout, full, traf, env, shared);
            cache.hdr_flow = flow;
            at = Working::Hdr;
            report.record(Stage::Hdr, StageOutcome::Ran);
        } else {
            cache.hdr.release();
            cache.hdr_flow = Flow::Continue;
            report.record(Stage::Hdr, StageOutcome::Unused);
        }
    } else if hdr_on {
        at = Working::Hdr;
        report.record(Stage::Hdr, StageOutcome::Cached);
    } else {
        report.record(Stage::Hdr, StageOutcome::Unused);
    }

    // Geometric transform into the padded rectangle.
    let needs_transform = env.ops.needs_transform(params);
    let reshaped = needs_transform || traf != crop || layout.source != layout.padded;
    if dirty || mask.contains(RefreshMask::TRANSFORM) {
        dirty = true;
        if reshaped {
            run_into(cache, |c| &mut c.transformed, None, crop, profile, |dst, cache| {
                let Some(src) = working_buf(cache, at) else {
                    return;
                };
                if needs_transform {
                    env.ops
                        .transform(src, src_origin, dst, crop_origin, params, full);
                } else {
                    dst.copy_region_from(
                        src,
                        ((layout.padded.x - layout.source.x) / skip) as u32,
                        ((layout.padded.y - layout.source.y) / skip) as u32,
                    );
                }
            });
            report.record(Stage::Transform, StageOutcome::Ran);
        } else {
            cache.transformed.release();
            report.record(Stage::Transform, StageOutcome::Unused);
        }
    } else if cache.transformed.is_allocated() {
        report.record(Stage::Transform, StageOutcome::Cached);
    } else {
        report.record(Stage::Transform, StageOutcome::Unused);
    }

    // Curve stages, each reading the previous one.
    const CURVE_STAGES: [(Stage, RefreshMask); 3] = [
        (Stage::RgbCurve, RefreshMask::RGBCURVE),
        (Stage::LumaCurve, RefreshMask::LUMACURVE),
        (
            Stage::Color,
            RefreshMask::LUMINANCE.union(RefreshMask::COLOR),
        ),
    ];
    let mut stop = cache.hdr_flow.is_stop();
    for (i, (stage, bits)) in CURVE_STAGES.into_iter().enumerate() {
        if dirty || mask.intersects(bits) {
            dirty = true;
            let mut slot = std::mem::take(&mut cache.curves[i]);
            let buf = slot.ensure_size(crop.0, crop.1, profile);
            let input = match i {
                0 if cache.transformed.is_allocated() => cache.transformed.get(),
                0 => working_buf(cache, at),
                n => cache.curves[n - 1].get(),
            };
            if let Some(input) = input {
                buf.copy_from(input);
            }
            if stop {
                cache.curve_flows[i] = Flow::Stop;
                report.record(stage, StageOutcome::Propagated);
            } else {
                cache.curve_flows[i] = match stage {
                    Stage::RgbCurve => env.ops.rgb_curve(buf, params),
                    Stage::LumaCurve => env.ops.luma_curve(buf, params),
                    _ => env.ops.color(buf, params),
                };
                report.record(stage, StageOutcome::Ran);
            }
            cache.curves[i] = slot;
        } else {
            report.record(stage, StageOutcome::Cached);
        }
        stop = stop || cache.curve_flows[i].is_stop();
    }

    tracing::debug!(region = env.region, report = %report, "pipeline pass");
    deliver(state, window, &layout, env);
    state.last_report = report.clone();
    report
}

/// HDR stage body. Produces the compressed working rectangle in the HDR slot.
fn compress_region(
    cache: &mut StageCache,
    at: Working,
    layout: &CropLayout,
    full: Size,
    traf: (u32, u32),
    env: &PipelineEnv<'_>,
    shared: &mut SharedCaches,
) -> Flow {
    let params = env.params;
    let profile = params.icm.working;
    let skip = layout.skip;
    let mut flow = Flow::Continue;

    if layout.source.covers(full) {
        run_into(cache, |c| &mut c.hdr, Some(at), traf, profile, |buf, _| {
            flow = env.ops.compress_dynamic_range(buf, params);
        });
        return flow;
    }

    if skip == 1 && at == Working::Decoded {
        // Nothing upstream modified the decode, so every region can share one
        // compressed full-resolution image.
        let (whole, cached_flow) = shared.full_res.get_or_compute(env.upstream_generation, || {
            let props = PreviewProps::new(full.whole(), 1);
            let mut whole = WorkImage::allocate(full.w as u32, full.h as u32, profile);
            env.decode_into(&props, &mut whole);
            let flow = env.ops.compress_dynamic_range(&mut whole, params);
            (whole, flow)
        });
        let (x, y) = (layout.source.x as u32, layout.source.y as u32);
        let buf = cache.hdr.ensure_size(traf.0, traf.1, profile);
        buf.copy_region_from(whole, x, y);
        return cached_flow;
    }

    // Decode the whole image on the same sampling grid as the region, then
    // put the already processed pixels back in place.
    let ox = layout.source.x % skip;
    let oy = layout.source.y % skip;
    let props = PreviewProps::new(Rect::new(ox, oy, full.w - ox, full.h - oy), skip);
    let (w, h) = env.source.size(&props);
    let mut whole = WorkImage::allocate(w, h, profile);
    env.decode_into(&props, &mut whole);
    let (ix, iy) = (
        (layout.source.x / skip) as u32,
        (layout.source.y / skip) as u32,
    );
    if let Some(processed) = working_buf(cache, at) {
        processed.paste_into(&mut whole, ix, iy);
    }
    flow = env.ops.compress_dynamic_range(&mut whole, params);
    let buf = cache.hdr.ensure_size(traf.0, traf.1, profile);
    buf.copy_region_from(&whole, ix, iy);
    flow
}

/// Converts the last curve buffer, trims it to the requested rectangle and
/// hands it to the listener.
fn deliver(state: &PipelineState, window: CropWindow, layout: &CropLayout, env: &PipelineEnv<'_>) {
    let Some(listener) = &state.listener else {
        return;
    };
    let Some(last) = state.cache.curves[2].get() else {
        return;
    };
    let icm = env.params.icm;
    let (w, h) = layout.final_size();
    let (x, y) = (layout.left_border as u32, layout.upper_border as u32);
    let trim = |img: crate::buffer::Image8| {
        image::imageops::crop_imm(&img, x, y, w as u32, h as u32).to_image()
    };

    let display = trim(env.ops.to_display(last, &icm));
    let analysis = listener
        .wants_analysis()
        .then(|| trim(env.ops.to_output(last, &icm)));
    listener.set_detailed_crop(DetailedCrop {
        region: env.region,
        display,
        analysis,
        icm,
        window,
        rect: layout.requested,
    });
}
