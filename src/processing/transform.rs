use image::Rgb;
use imageproc::geometric_transformations::{Interpolation, warp_into_with};

use crate::buffer::WorkImage;
use crate::geometry::{Rect, Size, clamp_rect};
use crate::stages::BufferOrigin;
use crate::state::{GeometryParams, Keystone};

/// Samples taken along each edge of a rectangle when mapping it through the model.
const EDGE_SAMPLES: i32 = 16;
/// Source coordinates are bounded to this before conversion to pixels.
const SOURCE_LIMIT: f64 = 1.0e8;

/// Output-to-source mapping for straighten, keystone and lens distortion,
/// in full-image coordinates.
#[derive(Debug, Clone, Copy)]
pub struct GeometryModel {
    cx: f64,
    cy: f64,
    cos: f64,
    sin: f64,
    homography: Option<[f64; 9]>,
    distortion: f64,
    /// Half diagonal, the radius normalising the distortion polynomial.
    radius: f64,
}

impl GeometryModel {
    pub fn new(params: &GeometryParams, full: Size) -> Self {
        let (w, h) = (full.w as f64, full.h as f64);
        let angle = (params.rotation_deg as f64).to_radians();
        Self {
            cx: w / 2.0,
            cy: h / 2.0,
            cos: angle.cos(),
            sin: angle.sin(),
            homography: keystone_homography(&params.keystone, w, h),
            distortion: params.distortion as f64,
            radius: (w * w + h * h).sqrt() / 2.0,
        }
    }

    /// Source position sampled for output position `(x, y)`.
    pub fn map(&self, x: f64, y: f64) -> (f64, f64) {
        // Straighten: rotate the output grid about the image center.
        let (dx, dy) = (x - self.cx, y - self.cy);
        let mut px = self.cx + dx * self.cos - dy * self.sin;
        let mut py = self.cy + dx * self.sin + dy * self.cos;

        if let Some(m) = &self.homography {
            let d = m[6] * px + m[7] * py + m[8];
            if d.abs() > 1e-12 {
                let nx = (m[0] * px + m[1] * py + m[2]) / d;
                let ny = (m[3] * px + m[4] * py + m[5]) / d;
                px = nx;
                py = ny;
            }
        }

        if self.distortion != 0.0 {
            let (dx, dy) = (px - self.cx, py - self.cy);
            let r2 = (dx * dx + dy * dy) / (self.radius * self.radius);
            let scale = 1.0 + self.distortion * r2;
            px = self.cx + dx * scale;
            py = self.cy + dy * scale;
        }

        (px, py)
    }

    /// Bounding box of the source positions read while producing `rect`.
    pub fn source_rect(&self, rect: Rect, full: Size) -> Rect {
        let (x1, y1) = (rect.x as f64, rect.y as f64);
        let (x2, y2) = ((rect.x + rect.w) as f64, (rect.y + rect.h) as f64);
        let mut min = (f64::MAX, f64::MAX);
        let mut max = (f64::MIN, f64::MIN);
        let mut visit = |x: f64, y: f64| {
            let (sx, sy) = self.map(x, y);
            min = (min.0.min(sx), min.1.min(sy));
            max = (max.0.max(sx), max.1.max(sy));
        };
        for i in 0..=EDGE_SAMPLES {
            let t = i as f64 / EDGE_SAMPLES as f64;
            let x = x1 + (x2 - x1) * t;
            let y = y1 + (y2 - y1) * t;
            visit(x, y1);
            visit(x, y2);
            visit(x1, y);
            visit(x2, y);
        }
        // Two pixels for the bilinear footprint. Strong distortion can throw
        // samples far outside the image, so bound them before going integral.
        let limit = |v: f64| v.clamp(-SOURCE_LIMIT, SOURCE_LIMIT) as i32;
        let x = limit(min.0.floor() - 2.0);
        let y = limit(min.1.floor() - 2.0);
        let r = Rect::new(
            x,
            y,
            limit(max.0.ceil() + 2.0) - x,
            limit(max.1.ceil() + 2.0) - y,
        );
        clamp_rect(r, full)
    }

    /// Largest distance any image corner moves, as a fraction of the larger image side.
    pub fn max_corner_shift(&self, full: Size) -> f64 {
        let (w, h) = (full.w as f64, full.h as f64);
        [(0.0, 0.0), (w, 0.0), (w, h), (0.0, h)]
            .into_iter()
            .map(|(x, y)| {
                let (sx, sy) = self.map(x, y);
                ((sx - x).powi(2) + (sy - y).powi(2)).sqrt()
            })
            .fold(0.0, f64::max)
            / w.max(h).max(1.0)
    }
}

/// Output-to-source homography for a keystone correction.
///
/// `vertical` pulls the top corners inward (positive) or the bottom corners
/// (negative); `horizontal` does the same for the left and right edges. Both
/// are fractions of the image size.
pub fn keystone_homography(keystone: &Keystone, w: f64, h: f64) -> Option<[f64; 9]> {
    if !keystone.active() {
        return None;
    }
    let v = keystone.vertical as f64;
    let hz = keystone.horizontal as f64;

    // Corners: TL, TR, BR, BL.
    let src: [(f64, f64); 4] = [(0.0, 0.0), (w, 0.0), (w, h), (0.0, h)];
    let dst: [(f64, f64); 4] = [
        (v.max(0.0) * w, hz.max(0.0) * h),
        (w - v.max(0.0) * w, (-hz).max(0.0) * h),
        (w - (-v).max(0.0) * w, h - (-hz).max(0.0) * h),
        ((-v).max(0.0) * w, h - hz.max(0.0) * h),
    ];
    // Sampling needs output corners mapped back to input corners.
    compute_homography(&dst, &src)
}

/// Solves the homography taking each `from` point to the matching `to` point.
pub fn compute_homography(from: &[(f64, f64); 4], to: &[(f64, f64); 4]) -> Option<[f64; 9]> {
    // 8x8 system with h8 = 1:
    //   tx = (h0*fx + h1*fy + h2) / (h6*fx + h7*fy + 1)
    //   ty = (h3*fx + h4*fy + h5) / (h6*fx + h7*fy + 1)
    let mut a = [[0.0_f64; 8]; 8];
    let mut b = [0.0_f64; 8];

    for i in 0..4 {
        let (fx, fy) = from[i];
        let (tx, ty) = to[i];
        a[i * 2] = [fx, fy, 1.0, 0.0, 0.0, 0.0, -fx * tx, -fy * tx];
        b[i * 2] = tx;
        a[i * 2 + 1] = [0.0, 0.0, 0.0, fx, fy, 1.0, -fx * ty, -fy * ty];
        b[i * 2 + 1] = ty;
    }

    // Gauss-Jordan with partial pivoting.
    for col in 0..8 {
        let mut max_row = col;
        let mut max_val = a[col][col].abs();
        for (row, coeffs) in a.iter().enumerate().skip(col + 1) {
            if coeffs[col].abs() > max_val {
                max_val = coeffs[col].abs();
                max_row = row;
            }
        }
        if max_val < 1e-12 {
            return None;
        }
        if max_row != col {
            a.swap(col, max_row);
            b.swap(col, max_row);
        }
        let pivot = a[col][col];
        for j in col..8 {
            a[col][j] /= pivot;
        }
        b[col] /= pivot;
        for row in 0..8 {
            if row == col {
                continue;
            }
            let factor = a[row][col];
            for j in col..8 {
                a[row][j] -= factor * a[col][j];
            }
            b[row] -= factor * b[col];
        }
    }

    Some([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7], 1.0])
}

/// Resamples `src` into `dst` through the geometry model.
pub fn apply(
    src: &WorkImage,
    src_origin: BufferOrigin,
    dst: &mut WorkImage,
    dst_origin: BufferOrigin,
    model: &GeometryModel,
) {
    let mapping = |bx: f32, by: f32| {
        let (fx, fy) = dst_origin.to_full(bx, by);
        let (sx, sy) = model.map(fx as f64, fy as f64);
        src_origin.to_buffer(sx as f32, sy as f32)
    };
    warp_into_with(
        &src.pixels,
        mapping,
        Interpolation::Bilinear,
        Rgb([0.0, 0.0, 0.0]),
        &mut dst.pixels,
    );
    dst.profile = src.profile;
}

#[cfg(test)]
mod tests {
    use super::{GeometryModel, compute_homography, keystone_homography};
    use crate::geometry::{Rect, Size};
    use crate::state::{GeometryParams, Keystone};

    fn approx(a: (f64, f64), b: (f64, f64)) -> bool {
        (a.0 - b.0).abs() < 1e-4 && (a.1 - b.1).abs() < 1e-4
    }

    #[test]
    fn identity_model_is_identity() {
        let m = GeometryModel::new(&GeometryParams::default(), Size::new(400, 300));
        assert!(approx(m.map(12.5, 250.0), (12.5, 250.0)));
        let r = Rect::new(50, 60, 100, 80);
        let s = m.source_rect(r, Size::new(400, 300));
        assert_eq!(s, Rect::new(48, 58, 104, 84));
    }

    #[test]
    fn homography_maps_control_points() {
        let from = [(0.0, 0.0), (10.0, 0.0), (10.0, 10.0), (0.0, 10.0)];
        let to = [(1.0, 2.0), (9.0, 1.0), (11.0, 12.0), (-1.0, 9.0)];
        let m = compute_homography(&from, &to).unwrap();
        for (f, t) in from.iter().zip(to.iter()) {
            let d = m[6] * f.0 + m[7] * f.1 + m[8];
            let x = (m[0] * f.0 + m[1] * f.1 + m[2]) / d;
            let y = (m[3] * f.0 + m[4] * f.1 + m[5]) / d;
            assert!(approx((x, y), *t));
        }
    }

    #[test]
    fn degenerate_points_have_no_homography() {
        let p = [(0.0, 0.0); 4];
        assert!(compute_homography(&p, &p).is_none());
    }

    #[test]
    fn inactive_keystone_has_no_homography() {
        assert!(keystone_homography(&Keystone::default(), 100.0, 100.0).is_none());
    }

    #[test]
    fn rotation_grows_source_rect() {
        let full = Size::new(1000, 1000);
        let params = GeometryParams {
            rotation_deg: 10.0,
            ..Default::default()
        };
        let m = GeometryModel::new(&params, full);
        let r = Rect::new(400, 400, 200, 200);
        let s = m.source_rect(r, full);
        assert!(s.x < 398 && s.y < 398);
        assert!(s.right() > 601 && s.bottom() > 601);
    }

    #[test]
    fn extreme_distortion_saturates_to_full_image() {
        let full = Size::new(600, 400);
        let params = GeometryParams {
            distortion: 1.0e12,
            ..Default::default()
        };
        let m = GeometryModel::new(&params, full);
        let s = m.source_rect(Rect::new(100, 100, 400, 200), full);
        assert_eq!((s.x, s.y), (0, 0));
        assert!(s.w > 0 && s.h > 0);
        assert!(s.right() <= full.w && s.bottom() <= full.h);
    }

    #[test]
    fn keystone_moves_corners() {
        let full = Size::new(1000, 500);
        let params = GeometryParams {
            keystone: Keystone {
                vertical: 0.1,
                horizontal: 0.0,
            },
            ..Default::default()
        };
        let m = GeometryModel::new(&params, full);
        // The pulled-in top-left corner samples the source top-left.
        assert!(approx(m.map(100.0, 0.0), (0.0, 0.0)));
        assert!(m.max_corner_shift(full) > 0.05);
    }
}
