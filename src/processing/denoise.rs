use imageproc::filter::gaussian_blur_f32;
use rayon::prelude::*;

use crate::buffer::WorkImage;
use crate::stages::NoiseStats;
use crate::state::DenoiseParams;

/// MAD to standard deviation for Gaussian noise, including the sqrt(2) of
/// differencing neighbours.
const MAD_TO_SIGMA: f32 = 1.0 / (0.6745 * std::f32::consts::SQRT_2);

/// Estimates per-channel noise from the median absolute difference between
/// horizontal neighbours.
pub fn estimate(image: &WorkImage) -> NoiseStats {
    let (w, h) = image.dimensions();
    if w < 2 {
        return NoiseStats::default();
    }
    let row_len = w as usize * 3;
    let mut diffs: [Vec<f32>; 3] = Default::default();
    for row in image.pixels.chunks(row_len).take(h as usize) {
        for pair in row.chunks(3).collect::<Vec<_>>().windows(2) {
            for c in 0..3 {
                diffs[c].push((pair[1][c] - pair[0][c]).abs());
            }
        }
    }
    let mut sigma = [0.0; 3];
    for (c, d) in diffs.iter_mut().enumerate() {
        sigma[c] = median(d) * MAD_TO_SIGMA;
    }
    NoiseStats { sigma }
}

fn median(values: &mut [f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let mid = values.len() / 2;
    let (_, m, _) = values.select_nth_unstable_by(mid, f32::total_cmp);
    *m
}

/// Noise-gated smoothing: each pixel moves towards its blurred value by how
/// well the difference is explained by noise, so edges survive.
pub fn apply(buf: &mut WorkImage, params: &DenoiseParams, noise: &NoiseStats, skip: i32) {
    let strength = params.strength.clamp(0.0, 1.0);
    if strength <= 0.0 {
        return;
    }
    // Neighbours in a scaled buffer are further apart in the image.
    let sigma_px = (1.5 / skip.max(1) as f32).max(0.5);
    let blurred = gaussian_blur_f32(&buf.pixels, sigma_px);
    let threshold = noise.sigma.map(|s| (s * 3.0 * (0.5 + strength)).max(1e-6));

    buf.pixels
        .par_chunks_mut(3)
        .zip(blurred.par_chunks(3))
        .for_each(|(px, smooth)| {
            for c in 0..3 {
                let diff = smooth[c] - px[c];
                let gate = (-(diff * diff) / (2.0 * threshold[c] * threshold[c])).exp();
                px[c] += diff * gate * strength;
            }
        });
}

#[cfg(test)]
mod tests {
    use image::Rgb;

    use crate::buffer::WorkImage;
    use crate::stages::NoiseStats;
    use crate::state::{DenoiseParams, WorkingProfile};

    use super::{apply, estimate};

    /// Flat grey with a deterministic +-amp checker of noise.
    fn noisy(w: u32, h: u32, amp: f32) -> WorkImage {
        let mut img = WorkImage::allocate(w, h, WorkingProfile::Srgb);
        for (x, y, p) in img.pixels.enumerate_pixels_mut() {
            let n = if (x * 7 + y * 13) % 3 == 0 { amp } else { -amp };
            *p = Rgb([0.5 + n, 0.5 + n, 0.5 + n]);
        }
        img
    }

    fn spread(img: &WorkImage) -> f32 {
        let vals: Vec<f32> = img.pixels.pixels().map(|p| p[0]).collect();
        let max = vals.iter().cloned().fold(f32::MIN, f32::max);
        let min = vals.iter().cloned().fold(f32::MAX, f32::min);
        max - min
    }

    #[test]
    fn flat_image_has_no_noise() {
        let img = WorkImage::allocate(16, 16, WorkingProfile::Srgb);
        assert_eq!(estimate(&img).sigma, [0.0; 3]);
    }

    #[test]
    fn estimate_grows_with_noise() {
        let low = estimate(&noisy(32, 32, 0.01)).sigma[0];
        let high = estimate(&noisy(32, 32, 0.05)).sigma[0];
        assert!(high > low && low > 0.0);
    }

    #[test]
    fn denoise_reduces_noise() {
        let mut img = noisy(32, 32, 0.02);
        let stats = estimate(&img);
        let before = spread(&img);
        apply(&mut img, &DenoiseParams { enabled: true, strength: 1.0 }, &stats, 1);
        assert!(spread(&img) < before);
    }

    #[test]
    fn strong_edges_survive() {
        let mut img = WorkImage::allocate(16, 4, WorkingProfile::Srgb);
        for (x, _, p) in img.pixels.enumerate_pixels_mut() {
            let v = if x < 8 { 0.05 } else { 0.95 };
            *p = Rgb([v, v, v]);
        }
        let stats = NoiseStats { sigma: [0.005; 3] };
        apply(&mut img, &DenoiseParams { enabled: true, strength: 1.0 }, &stats, 1);
        assert!(img.pixel(7, 1)[0] < 0.1);
        assert!(img.pixel(8, 1)[0] > 0.9);
    }
}
