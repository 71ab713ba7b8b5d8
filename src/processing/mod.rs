//! Default stage operations.

pub mod color;
pub mod denoise;
pub mod hdr;
pub mod output;
pub mod spots;
pub mod tone;
pub mod transform;

use crate::buffer::{Image8, WorkImage};
use crate::geometry::{Rect, Size};
use crate::stages::{BufferOrigin, Flow, NoiseStats, Overscan, StageOps};
use crate::state::{ColorManagement, DenoiseParams, ProcParams, Spot};

use self::transform::GeometryModel;

/// Develops a crop with the built-in processing operations.
#[derive(Debug, Default, Clone, Copy)]
pub struct Develop;

impl StageOps for Develop {
    fn needs_transform(&self, params: &ProcParams) -> bool {
        params.geometry.active()
    }

    fn overscan(&self, params: &ProcParams, full: Size) -> Overscan {
        let g = &params.geometry;
        if g.keystone.active() {
            // Twice the largest corner shift covers pixels pulled in from either side.
            let model = GeometryModel::new(g, full);
            Overscan::Perspective(model.max_corner_shift(full) * 2.0)
        } else if g.distortion != 0.0 {
            Overscan::Distortion
        } else {
            Overscan::None
        }
    }

    fn trans_coord(&self, params: &ProcParams, full: Size, rect: Rect) -> Rect {
        if !params.geometry.active() {
            return rect;
        }
        GeometryModel::new(&params.geometry, full).source_rect(rect, full)
    }

    fn estimate_noise(&self, image: &WorkImage) -> NoiseStats {
        denoise::estimate(image)
    }

    fn denoise(&self, buf: &mut WorkImage, params: &DenoiseParams, noise: &NoiseStats, skip: i32) {
        denoise::apply(buf, params, noise, skip);
    }

    fn remove_spots(&self, buf: &mut WorkImage, spots: &[Spot], origin: BufferOrigin) {
        spots::apply(buf, spots, origin);
    }

    fn compress_dynamic_range(&self, buf: &mut WorkImage, params: &ProcParams) -> Flow {
        if params.dehaze.enabled {
            hdr::dehaze(buf, &params.dehaze);
        }
        if params.tone_compression.enabled {
            hdr::compress(buf, &params.tone_compression);
        }
        Flow::Continue
    }

    fn transform(
        &self,
        src: &WorkImage,
        src_origin: BufferOrigin,
        dst: &mut WorkImage,
        dst_origin: BufferOrigin,
        params: &ProcParams,
        full: Size,
    ) {
        let model = GeometryModel::new(&params.geometry, full);
        transform::apply(src, src_origin, dst, dst_origin, &model);
    }

    fn rgb_curve(&self, buf: &mut WorkImage, params: &ProcParams) -> Flow {
        tone::apply_contrast(buf, params.rgb_curve.contrast);
        Flow::Continue
    }

    fn luma_curve(&self, buf: &mut WorkImage, params: &ProcParams) -> Flow {
        tone::apply_luma(buf, &params.luma_curve);
        Flow::Continue
    }

    fn color(&self, buf: &mut WorkImage, params: &ProcParams) -> Flow {
        color::apply_global(buf, &params.color);
        color::apply_selective(buf, &params.color);
        Flow::Continue
    }

    fn to_display(&self, buf: &WorkImage, _icm: &ColorManagement) -> Image8 {
        output::to_display(buf)
    }

    fn to_output(&self, buf: &WorkImage, icm: &ColorManagement) -> Image8 {
        output::to_output(buf, icm)
    }
}
