use image::RgbImage;
use rayon::prelude::*;

use crate::buffer::{Image8, WorkImage};
use crate::state::{ColorManagement, OutputProfile, WorkingProfile};

/// Linear sRGB primaries to linear Rec.2020 primaries.
pub const SRGB_TO_REC2020: [[f32; 3]; 3] = [
    [0.6274, 0.3293, 0.0433],
    [0.0691, 0.9195, 0.0114],
    [0.0164, 0.0880, 0.8956],
];

/// Linear Rec.2020 primaries to linear sRGB primaries.
pub const REC2020_TO_SRGB: [[f32; 3]; 3] = [
    [1.6605, -0.5876, -0.0728],
    [-0.1246, 1.1329, -0.0083],
    [-0.0182, -0.1006, 1.1187],
];

pub fn apply_matrix(m: &[[f32; 3]; 3], v: [f32; 3]) -> [f32; 3] {
    [
        m[0][0] * v[0] + m[0][1] * v[1] + m[0][2] * v[2],
        m[1][0] * v[0] + m[1][1] * v[1] + m[1][2] * v[2],
        m[2][0] * v[0] + m[2][1] * v[1] + m[2][2] * v[2],
    ]
}

pub fn srgb_to_linear(v: f32) -> f32 {
    if v <= 0.04045 {
        v / 12.92
    } else {
        ((v + 0.055) / 1.055).powf(2.4)
    }
}

pub fn linear_to_srgb(v: f32) -> f32 {
    let v = v.clamp(0.0, 1.0);
    if v <= 0.003_130_8 {
        v * 12.92
    } else {
        1.055 * v.powf(1.0 / 2.4) - 0.055
    }
}

fn to_u8(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

fn convert(buf: &WorkImage, encode: fn(f32) -> f32) -> Image8 {
    let (w, h) = buf.dimensions();
    let matrix = match buf.profile {
        WorkingProfile::Srgb => None,
        WorkingProfile::Rec2020 => Some(REC2020_TO_SRGB),
    };
    let mut out = RgbImage::new(w, h);
    out.par_chunks_mut(3)
        .zip(buf.pixels.par_chunks(3))
        .for_each(|(dst, src)| {
            let mut v = [src[0], src[1], src[2]];
            if let Some(m) = &matrix {
                v = apply_matrix(m, v);
            }
            for c in 0..3 {
                dst[c] = to_u8(encode(v[c]));
            }
        });
    out
}

/// Monitor display conversion: sRGB encoded.
pub fn to_display(buf: &WorkImage) -> Image8 {
    convert(buf, linear_to_srgb)
}

/// Output conversion for analysis, following the configured output profile.
pub fn to_output(buf: &WorkImage, icm: &ColorManagement) -> Image8 {
    match icm.output {
        OutputProfile::Srgb => convert(buf, linear_to_srgb),
        OutputProfile::Linear => convert(buf, |v| v),
    }
}
