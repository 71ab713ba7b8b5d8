use rayon::prelude::*;

use crate::buffer::WorkImage;
use crate::state::ColorParams;

/// Hue band centers in degrees: red, orange, yellow, green, cyan, blue,
/// purple, pink.
const BAND_CENTERS: [f32; 8] = [0.0, 30.0, 60.0, 120.0, 180.0, 240.0, 285.0, 330.0];
const BAND_HALF_WIDTH: f32 = 30.0;

/// Pixel in HSL with the hue in degrees and the other two in `0..=1`.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Hsl {
    hue: f32,
    sat: f32,
    light: f32,
}

impl Hsl {
    fn from_rgb([r, g, b]: [f32; 3]) -> Self {
        let hi = r.max(g).max(b);
        let lo = r.min(g).min(b);
        let light = (hi + lo) * 0.5;
        let chroma = hi - lo;
        if chroma <= 1e-6 {
            return Self {
                hue: 0.0,
                sat: 0.0,
                light,
            };
        }
        let sector = if hi == r {
            (g - b) / chroma
        } else if hi == g {
            (b - r) / chroma + 2.0
        } else {
            (r - g) / chroma + 4.0
        };
        Self {
            hue: wrap_degrees(sector * 60.0),
            sat: (chroma / (1.0 - (2.0 * light - 1.0).abs())).clamp(0.0, 1.0),
            light: light.clamp(0.0, 1.0),
        }
    }

    fn to_rgb(self) -> [f32; 3] {
        let chroma = (1.0 - (2.0 * self.light - 1.0).abs()) * self.sat;
        let sector = wrap_degrees(self.hue) / 60.0;
        let x = chroma * (1.0 - (sector % 2.0 - 1.0).abs());
        let (r, g, b) = match sector as u32 {
            0 => (chroma, x, 0.0),
            1 => (x, chroma, 0.0),
            2 => (0.0, chroma, x),
            3 => (0.0, x, chroma),
            4 => (x, 0.0, chroma),
            _ => (chroma, 0.0, x),
        };
        let m = self.light - chroma * 0.5;
        [r + m, g + m, b + m].map(|v| v.clamp(0.0, 1.0))
    }
}

fn wrap_degrees(h: f32) -> f32 {
    let w = h.rem_euclid(360.0);
    if w >= 360.0 { 0.0 } else { w }
}

/// Weight of `hue` inside the band around `center`, falling off linearly.
fn band_weight(hue: f32, center: f32) -> f32 {
    let diff = (hue - center).abs();
    let dist = diff.min(360.0 - diff);
    (1.0 - dist / BAND_HALF_WIDTH).max(0.0)
}

/// Global saturation and hue shift.
pub fn apply_global(buf: &mut WorkImage, params: &ColorParams) {
    let sat = params.saturation.clamp(-1.0, 1.0);
    let shift = params.hue_shift;
    if sat.abs() < 0.001 && shift.abs() < 0.0036 {
        return;
    }
    map_hsl(buf, |c| Hsl {
        hue: wrap_degrees(c.hue + shift),
        sat: (c.sat * (1.0 + sat)).clamp(0.0, 1.0),
        light: c.light,
    });
}

/// Selective color by hue band.
pub fn apply_selective(buf: &mut WorkImage, params: &ColorParams) {
    let bands: Vec<_> = BAND_CENTERS
        .into_iter()
        .zip(params.selective_color)
        .filter(|(_, a)| a.hue.abs() > 0.001 || a.saturation.abs() > 0.001 || a.lightness.abs() > 0.001)
        .collect();
    if bands.is_empty() {
        return;
    }
    map_hsl(buf, |mut c| {
        for (center, adj) in &bands {
            let w = band_weight(c.hue, *center);
            if w > 0.0 {
                c.hue = wrap_degrees(c.hue + adj.hue * w);
                c.sat = (c.sat * (1.0 + adj.saturation * w)).clamp(0.0, 1.0);
                c.light = (c.light + adj.lightness * w).clamp(0.0, 1.0);
            }
        }
        c
    });
}

/// Applies `f` to every pixel in HSL. Linear values above 1.0 are scaled into
/// range around the call.
fn map_hsl(buf: &mut WorkImage, f: impl Fn(Hsl) -> Hsl + Send + Sync) {
    buf.pixels.par_chunks_mut(3).for_each(|px| {
        let peak = px[0].max(px[1]).max(px[2]).max(1.0);
        let rgb = [px[0], px[1], px[2]].map(|v| v.max(0.0) / peak);
        let out = f(Hsl::from_rgb(rgb)).to_rgb();
        for (dst, v) in px.iter_mut().zip(out) {
            *dst = v * peak;
        }
    });
}
