//! Fixtures shared by the pipeline, region and coordinator tests.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use image::Rgb;

use crate::buffer::{Image8, WorkImage};
use crate::geometry::{Rect, Size};
use crate::listener::{DetailedCrop, DetailedCropListener};
use crate::region::CropRegion;
use crate::scheduler::SchedulerState;
use crate::source::{ImageSource, PreviewProps};
use crate::stages::{BufferOrigin, Flow, NoiseStats, Overscan, StageOps};
use crate::state::{
    ColorManagement, DenoiseParams, ExposureParams, FilmNegative, ProcParams, Spot, WhiteBalance,
};

pub const WAIT: Duration = Duration::from_secs(10);

/// Waits until no worker owns `region`.
pub fn wait_idle(region: &CropRegion) -> bool {
    let deadline = Instant::now() + WAIT;
    while region.scheduler_state() != SchedulerState::Idle {
        if Instant::now() > deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    true
}

/// Procedural image whose pixel at `(x, y)` is `[x, y, 1.0]`.
#[derive(Debug, Default)]
pub struct CoordSource {
    pub w: u32,
    pub h: u32,
    pub decodes: AtomicUsize,
    pub conversions: AtomicUsize,
    pub negatives: AtomicUsize,
}

impl CoordSource {
    pub fn new(w: u32, h: u32) -> Self {
        Self {
            w,
            h,
            ..Default::default()
        }
    }
}

impl ImageSource for CoordSource {
    fn full_size(&self) -> Size {
        Size::new(self.w as i32, self.h as i32)
    }

    fn get_image(
        &self,
        _wb: &WhiteBalance,
        props: &PreviewProps,
        dest: &mut WorkImage,
        _exposure: &ExposureParams,
    ) {
        self.decodes.fetch_add(1, Ordering::SeqCst);
        let skip = props.skip as u32;
        let (x0, y0) = (props.x.max(0) as u32, props.y.max(0) as u32);
        for (bx, by, p) in dest.pixels.enumerate_pixels_mut() {
            let x = (x0 + bx * skip).min(self.w - 1);
            let y = (y0 + by * skip).min(self.h - 1);
            *p = Rgb([x as f32, y as f32, 1.0]);
        }
    }

    fn convert_color_space(&self, buf: &mut WorkImage, icm: &ColorManagement, _wb: &WhiteBalance) {
        self.conversions.fetch_add(1, Ordering::SeqCst);
        buf.profile = icm.working;
    }

    fn film_negative(&self, buf: &mut WorkImage, _params: &FilmNegative, icm: &ColorManagement) {
        self.negatives.fetch_add(1, Ordering::SeqCst);
        buf.profile = icm.working;
    }
}

/// Reads back the full-image coordinate encoded by [`FakeOps::to_display`].
pub fn decode_coord(img: &Image8, x: u32, y: u32) -> (u32, u32) {
    let [r, g, b] = img.get_pixel(x, y).0;
    (
        r as u32 | ((b as u32 & 0x0f) << 8),
        g as u32 | ((b as u32 >> 4) << 8),
    )
}

/// Blocks a stage until released, so tests can hold a pipeline run in flight.
#[derive(Default)]
pub struct Gate {
    state: Mutex<(bool, usize)>,
    cv: Condvar,
}

impl Gate {
    fn pass(&self) {
        let mut s = self.state.lock().unwrap();
        s.1 += 1;
        self.cv.notify_all();
        while !s.0 {
            s = self.cv.wait(s).unwrap();
        }
    }

    /// Waits until `n` runs have reached the gate.
    pub fn wait_entered(&self, n: usize) -> bool {
        let deadline = Instant::now() + WAIT;
        let mut s = self.state.lock().unwrap();
        while s.1 < n {
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                return false;
            }
            s = self.cv.wait_timeout(s, left).unwrap().0;
        }
        true
    }

    pub fn entered(&self) -> usize {
        self.state.lock().unwrap().1
    }

    pub fn open(&self) {
        self.state.lock().unwrap().0 = true;
        self.cv.notify_all();
    }
}

#[derive(Debug, Default)]
pub struct OpCounts {
    pub noise_estimates: AtomicUsize,
    pub denoise: AtomicUsize,
    pub spots: AtomicUsize,
    pub compress: AtomicUsize,
    pub transform: AtomicUsize,
    pub rgb: AtomicUsize,
    pub luma: AtomicUsize,
    pub color: AtomicUsize,
    pub display: AtomicUsize,
    pub output: AtomicUsize,
}

/// Identity stages that count their calls.
///
/// `to_display` encodes the full-image coordinate carried in the red and
/// green channels; `to_output` exposes the blue channel, which the dynamic
/// range stage overwrites with a marker derived from the whole buffer.
#[derive(Default)]
pub struct FakeOps {
    pub counts: OpCounts,
    pub stop_after_rgb: AtomicBool,
    /// Horizontal offset, in full-image pixels, applied by `transform`.
    pub transform_shift: AtomicI32,
    pub gate: Option<Arc<Gate>>,
}

impl FakeOps {
    pub fn gated(gate: Arc<Gate>) -> Self {
        Self {
            gate: Some(gate),
            ..Default::default()
        }
    }

    fn marker(mean_x: f64, amount: f32) -> f32 {
        (mean_x * 0.1 + amount as f64 * 100.0).round() as f32
    }

    /// Marker a compression of the whole `w × h` image at skip 1 produces.
    pub fn compressed_marker(w: u32, _h: u32, amount: f32) -> u8 {
        Self::marker((w - 1) as f64 / 2.0, amount) as u8
    }
}

impl StageOps for FakeOps {
    fn needs_transform(&self, params: &ProcParams) -> bool {
        params.geometry.active()
    }

    fn overscan(&self, _params: &ProcParams, _full: Size) -> Overscan {
        Overscan::None
    }

    fn trans_coord(&self, _params: &ProcParams, _full: Size, rect: Rect) -> Rect {
        rect
    }

    fn estimate_noise(&self, _image: &WorkImage) -> NoiseStats {
        self.counts.noise_estimates.fetch_add(1, Ordering::SeqCst);
        NoiseStats::default()
    }

    fn denoise(&self, _buf: &mut WorkImage, _params: &DenoiseParams, _noise: &NoiseStats, _skip: i32) {
        self.counts.denoise.fetch_add(1, Ordering::SeqCst);
    }

    fn remove_spots(&self, buf: &mut WorkImage, spots: &[Spot], origin: BufferOrigin) {
        self.counts.spots.fetch_add(1, Ordering::SeqCst);
        crate::processing::spots::apply(buf, spots, origin);
    }

    fn compress_dynamic_range(&self, buf: &mut WorkImage, params: &ProcParams) -> Flow {
        self.counts.compress.fetch_add(1, Ordering::SeqCst);
        let n = (buf.width() * buf.height()) as f64;
        let mean_x = buf.pixels.pixels().map(|p| p[0] as f64).sum::<f64>() / n;
        let marker = Self::marker(mean_x, params.tone_compression.amount);
        for p in buf.pixels.pixels_mut() {
            p[2] = marker;
        }
        Flow::Continue
    }

    fn transform(
        &self,
        src: &WorkImage,
        src_origin: BufferOrigin,
        dst: &mut WorkImage,
        dst_origin: BufferOrigin,
        _params: &ProcParams,
        _full: Size,
    ) {
        self.counts.transform.fetch_add(1, Ordering::SeqCst);
        let shift = self.transform_shift.load(Ordering::SeqCst) as f32;
        let (sw, sh) = src.dimensions();
        for (bx, by, p) in dst.pixels.enumerate_pixels_mut() {
            let (fx, fy) = dst_origin.to_full(bx as f32, by as f32);
            let (sx, sy) = src_origin.to_buffer(fx + shift, fy);
            let sx = (sx.round().max(0.0) as u32).min(sw - 1);
            let sy = (sy.round().max(0.0) as u32).min(sh - 1);
            *p = *src.pixels.get_pixel(sx, sy);
        }
    }

    fn rgb_curve(&self, _buf: &mut WorkImage, _params: &ProcParams) -> Flow {
        self.counts.rgb.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.pass();
        }
        if self.stop_after_rgb.load(Ordering::SeqCst) {
            Flow::Stop
        } else {
            Flow::Continue
        }
    }

    fn luma_curve(&self, _buf: &mut WorkImage, _params: &ProcParams) -> Flow {
        self.counts.luma.fetch_add(1, Ordering::SeqCst);
        Flow::Continue
    }

    fn color(&self, _buf: &mut WorkImage, _params: &ProcParams) -> Flow {
        self.counts.color.fetch_add(1, Ordering::SeqCst);
        Flow::Continue
    }

    fn to_display(&self, buf: &WorkImage, _icm: &ColorManagement) -> Image8 {
        self.counts.display.fetch_add(1, Ordering::SeqCst);
        let mut out = Image8::new(buf.width(), buf.height());
        for (x, y, p) in out.enumerate_pixels_mut() {
            let src = buf.pixel(x, y);
            let fx = src[0].round() as u32;
            let fy = src[1].round() as u32;
            *p = Rgb([
                (fx & 0xff) as u8,
                (fy & 0xff) as u8,
                (((fx >> 8) & 0x0f) | (((fy >> 8) & 0x0f) << 4)) as u8,
            ]);
        }
        out
    }

    fn to_output(&self, buf: &WorkImage, _icm: &ColorManagement) -> Image8 {
        self.counts.output.fetch_add(1, Ordering::SeqCst);
        let mut out = Image8::new(buf.width(), buf.height());
        for (x, y, p) in out.enumerate_pixels_mut() {
            let v = buf.pixel(x, y)[2].round().clamp(0.0, 255.0) as u8;
            *p = Rgb([v, v, v]);
        }
        out
    }
}

/// Listener keeping every delivered crop.
#[derive(Default)]
pub struct RecordingListener {
    crops: Mutex<Vec<DetailedCrop>>,
    cv: Condvar,
    analysis: bool,
}

impl RecordingListener {
    pub fn with_analysis() -> Self {
        Self {
            analysis: true,
            ..Default::default()
        }
    }

    pub fn count(&self) -> usize {
        self.crops.lock().unwrap().len()
    }

    pub fn crops(&self) -> Vec<DetailedCrop> {
        self.crops.lock().unwrap().clone()
    }

    pub fn last(&self) -> Option<DetailedCrop> {
        self.crops.lock().unwrap().last().cloned()
    }

    /// Waits until at least `n` crops were delivered.
    pub fn wait_for(&self, n: usize) -> bool {
        let deadline = Instant::now() + WAIT;
        let mut crops = self.crops.lock().unwrap();
        while crops.len() < n {
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                return false;
            }
            crops = self.cv.wait_timeout(crops, left).unwrap().0;
        }
        true
    }
}

impl DetailedCropListener for RecordingListener {
    fn set_detailed_crop(&self, crop: DetailedCrop) {
        self.crops.lock().unwrap().push(crop);
        self.cv.notify_all();
    }

    fn wants_analysis(&self) -> bool {
        self.analysis
    }
}
