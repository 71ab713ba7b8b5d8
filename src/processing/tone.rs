use rayon::prelude::*;

use crate::buffer::WorkImage;
use crate::state::LumaCurve;

/// Linear-light middle grey, the contrast pivot.
const MID_GREY: f32 = 0.18;

/// Contrast around middle grey. `contrast` is -1.0 to 1.0.
pub fn apply_contrast(buf: &mut WorkImage, contrast: f32) {
    if contrast.abs() < 0.001 {
        return;
    }
    let gamma = 1.0 + contrast.clamp(-1.0, 1.0) * 0.8;
    buf.pixels.par_chunks_mut(3).for_each(|px| {
        for v in px.iter_mut() {
            *v = if *v > 0.0 {
                MID_GREY * (*v / MID_GREY).powf(gamma)
            } else {
                0.0
            };
        }
    });
}

/// Highlights and shadows recovery on luminance, hue preserving.
pub fn apply_luma(buf: &mut WorkImage, curve: &LumaCurve) {
    let highlights = curve.highlights.clamp(-1.0, 1.0);
    let shadows = curve.shadows.clamp(-1.0, 1.0);
    if highlights.abs() < 0.001 && shadows.abs() < 0.001 {
        return;
    }

    buf.pixels.par_chunks_mut(3).for_each(|px| {
        let luma = 0.2126 * px[0] + 0.7152 * px[1] + 0.0722 * px[2];
        if luma <= 1e-5 {
            return;
        }
        // Weights are defined on a perceptual scale.
        let mut target = luma.min(1.0).powf(1.0 / 2.2);

        if shadows.abs() > 0.001 {
            let w = 1.0 - smoothstep(0.0, 0.5, target);
            if shadows >= 0.0 {
                target += (1.0 - target) * shadows * w;
            } else {
                target *= 1.0 + shadows * w;
            }
        }

        if highlights.abs() > 0.001 {
            let w = smoothstep(0.5, 1.0, target);
            if highlights >= 0.0 {
                target += (1.0 - target) * highlights * w;
            } else {
                target *= 1.0 + highlights * w * 0.5;
            }
        }

        let linear = target.powf(2.2) * luma.max(1.0);
        let scale = linear / luma;
        for v in px.iter_mut() {
            *v *= scale;
        }
    });
}

pub(crate) fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}
