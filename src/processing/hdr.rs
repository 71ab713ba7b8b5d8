use rayon::prelude::*;

use crate::buffer::WorkImage;
use crate::state::{Dehaze, ToneCompression};

/// Key the log-average luminance is mapped to.
const KEY: f32 = 0.18;
const MIN_TRANSMISSION: f32 = 0.1;

fn luminance(px: &[f32]) -> f32 {
    0.2126 * px[0] + 0.7152 * px[1] + 0.0722 * px[2]
}

/// Global log-average compression. Depends on statistics of the whole buffer.
pub fn compress(buf: &mut WorkImage, params: &ToneCompression) {
    let amount = params.amount.clamp(0.0, 1.0);
    if amount <= 0.0 {
        return;
    }
    let count = (buf.pixels.len() / 3).max(1) as f64;
    let log_sum: f64 = buf
        .pixels
        .par_chunks(3)
        .map(|px| (1e-4 + luminance(px).max(0.0) as f64).ln())
        .sum();
    let log_avg = (log_sum / count).exp() as f32;

    buf.pixels.par_chunks_mut(3).for_each(|px| {
        let l = luminance(px);
        if l <= 1e-6 {
            return;
        }
        let s = l * KEY / log_avg;
        // Scaled so the log-average itself maps to itself.
        let mapped = s / (1.0 + s) * (1.0 + KEY) * log_avg / KEY;
        let target = l + (mapped - l) * amount;
        let scale = target / l;
        for v in px.iter_mut() {
            *v *= scale;
        }
    });
}

/// Dark-channel dehaze with a single airlight estimated over the whole buffer.
pub fn dehaze(buf: &mut WorkImage, params: &Dehaze) {
    let strength = params.strength.clamp(0.0, 1.0);
    if strength <= 0.0 {
        return;
    }
    let airlight = buf
        .pixels
        .par_chunks(3)
        .map(|px| px[0].min(px[1]).min(px[2]))
        .reduce(|| 0.0, f32::max)
        .max(0.05);

    buf.pixels.par_chunks_mut(3).for_each(|px| {
        let dark = px[0].min(px[1]).min(px[2]).max(0.0);
        let t = (1.0 - 0.95 * strength * dark / airlight).max(MIN_TRANSMISSION);
        for v in px.iter_mut() {
            *v = ((*v - airlight) / t + airlight).max(0.0);
        }
    });
}
