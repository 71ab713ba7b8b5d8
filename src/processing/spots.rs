use crate::buffer::WorkImage;
use crate::geometry::Rect;
use crate::stages::BufferOrigin;
use crate::state::Spot;

/// Bounding box of the pixels read to heal the spots whose target touches
/// `area`.
pub fn source_bounds(spots: &[Spot], area: Rect) -> Option<Rect> {
    spots
        .iter()
        .filter(|s| s.radius > 0.0 && circle_bounds(s.x, s.y, s.radius).intersects(&area))
        .map(|s| circle_bounds(s.source_x, s.source_y, s.radius))
        .reduce(|a, b| a.union(&b))
}

/// Pixels a circle can touch, plus one for rounding.
fn circle_bounds(cx: f32, cy: f32, r: f32) -> Rect {
    Rect::from_corners(
        (cx - r).floor() as i32 - 1,
        (cy - r).floor() as i32 - 1,
        (cx + r).ceil() as i32 + 1,
        (cy + r).ceil() as i32 + 1,
    )
}

/// Clone-heals every spot, reading from a snapshot so overlapping spots do
/// not feed on each other's output.
pub fn apply(buf: &mut WorkImage, spots: &[Spot], origin: BufferOrigin) {
    if spots.is_empty() {
        return;
    }
    let snapshot = buf.pixels.clone();
    let (w, h) = buf.dimensions();
    let skip = origin.skip as f32;

    for spot in spots {
        if spot.radius <= 0.0 {
            continue;
        }
        let (cx, cy) = origin.to_buffer(spot.x, spot.y);
        let r = spot.radius / skip;
        let inner = r * (1.0 - spot.feather.clamp(0.0, 1.0));
        let (off_x, off_y) = (
            (spot.source_x - spot.x) / skip,
            (spot.source_y - spot.y) / skip,
        );

        let x0 = (cx - r).floor().max(0.0) as u32;
        let y0 = (cy - r).floor().max(0.0) as u32;
        let x1 = ((cx + r).ceil().max(0.0) as u32).min(w);
        let y1 = ((cy + r).ceil().max(0.0) as u32).min(h);

        for y in y0..y1 {
            for x in x0..x1 {
                let d = ((x as f32 - cx).powi(2) + (y as f32 - cy).powi(2)).sqrt();
                if d >= r {
                    continue;
                }
                let alpha = if d <= inner {
                    1.0
                } else {
                    1.0 - (d - inner) / (r - inner)
                };
                let sx = (x as f32 + off_x).round();
                let sy = (y as f32 + off_y).round();
                if sx < 0.0 || sy < 0.0 || sx >= w as f32 || sy >= h as f32 {
                    continue;
                }
                let src = snapshot.get_pixel(sx as u32, sy as u32).0;
                let dst = buf.pixels.get_pixel_mut(x, y);
                if alpha >= 1.0 {
                    dst.0 = src;
                    continue;
                }
                for c in 0..3 {
                    dst[c] += (src[c] - dst[c]) * alpha;
                }
            }
        }
    }
}
