use serde::{Deserialize, Serialize};

/// Border, in output pixels, added around every requested rectangle.
pub const DEFAULT_BORDER: u32 = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
/// Axis-aligned rectangle in full-image pixel coordinates.
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
}

impl Rect {
    pub const fn new(x: i32, y: i32, w: i32, h: i32) -> Self {
        Self { x, y, w, h }
    }

    /// Builds a rectangle from inclusive corner coordinates.
    pub const fn from_corners(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self {
            x: x1,
            y: y1,
            w: x2 - x1 + 1,
            h: y2 - y1 + 1,
        }
    }

    /// Inclusive right edge.
    pub const fn right(&self) -> i32 {
        self.x + self.w - 1
    }

    /// Inclusive bottom edge.
    pub const fn bottom(&self) -> i32 {
        self.y + self.h - 1
    }

    pub fn covers(&self, full: Size) -> bool {
        self.x <= 0 && self.y <= 0 && self.x + self.w >= full.w && self.y + self.h >= full.h
    }

    pub fn intersects(&self, other: &Rect) -> bool {
        self.x <= other.right()
            && other.x <= self.right()
            && self.y <= other.bottom()
            && other.y <= self.bottom()
    }

    /// Smallest rectangle holding both.
    pub fn union(&self, other: &Rect) -> Rect {
        Rect::from_corners(
            self.x.min(other.x),
            self.y.min(other.y),
            self.right().max(other.right()),
            self.bottom().max(other.bottom()),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Size {
    pub w: i32,
    pub h: i32,
}

impl Size {
    pub const fn new(w: i32, h: i32) -> Self {
        Self { w, h }
    }

    pub fn whole(&self) -> Rect {
        Rect::new(0, 0, self.w, self.h)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
/// A requested view: rectangle in full-image pixels plus the downscale factor.
pub struct CropWindow {
    pub rect: Rect,
    pub skip: u32,
}

impl CropWindow {
    pub fn new(rect: Rect, skip: u32) -> Self {
        Self {
            rect,
            skip: skip.max(1),
        }
    }
}

/// Number of pixels kept when sampling `a` pixels with step `skip`.
pub fn skips(a: i32, skip: i32) -> i32 {
    a / skip + i32::from(a % skip > 0)
}

/// Sizing decisions for one region at one request.
///
/// All rectangles are in full-image pixels, all dimensions named `*_w`/`*_h`
/// are in scaled (skip) pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropLayout {
    /// The requested rectangle after clamping to the image.
    pub requested: Rect,
    pub skip: i32,
    /// Requested rectangle plus border, clamped to the image.
    pub padded: Rect,
    /// Region that has to be decoded to produce `padded`.
    pub source: Rect,
    pub left_border: i32,
    pub upper_border: i32,
    pub crop_w: i32,
    pub crop_h: i32,
    pub traf_w: i32,
    pub traf_h: i32,
}

impl CropLayout {
    /// Computes the padded and source rectangles for `window`.
    ///
    /// `trans_coord` maps the padded rectangle to the source rectangle the
    /// geometric corrections read from. `margin` is the over-fetch fraction of
    /// the full image size required by the active correction, if any.
    /// `source_size` reports the decoded dimensions of a source rectangle.
    pub fn compute(
        window: CropWindow,
        full: Size,
        border: u32,
        trans_coord: impl FnOnce(Rect) -> Rect,
        margin: Option<f64>,
        source_size: impl FnOnce(Rect, u32) -> (u32, u32),
    ) -> Self {
        let skip = window.skip.max(1) as i32;
        let max_x = (full.w - 1).max(0);
        let max_y = (full.h - 1).max(0);
        let rq = window.rect;

        let rqx1 = rq.x.clamp(0, max_x);
        let rqy1 = rq.y.clamp(0, max_y);
        let rqx2 = (rqx1 + rq.w.max(1) - 1).clamp(0, max_x);
        let rqy2 = (rqy1 + rq.h.max(1) - 1).clamp(0, max_y);
        let requested = Rect::from_corners(rqx1, rqy1, rqx2, rqy2);

        // Whole skip steps only, so the requested origin stays on the sampling grid.
        let border = border as i32;
        let bx1 = rqx1 - skip * border.min(rqx1 / skip);
        let by1 = rqy1 - skip * border.min(rqy1 / skip);
        let bx2 = (rqx2 + skip * border).clamp(0, max_x);
        let by2 = (rqy2 + skip * border).clamp(0, max_y);
        let padded = Rect::from_corners(bx1, by1, bx2, by2);

        let mut source = clamp_rect(trans_coord(padded), full);
        if let Some(fraction) = margin {
            source = expand_by_fraction(source, full, fraction);
        }

        let (traf_w, traf_h) = source_size(source, skip as u32);

        Self {
            requested,
            skip,
            padded,
            source,
            left_border: (rqx1 - bx1) / skip,
            upper_border: (rqy1 - by1) / skip,
            crop_w: skips(padded.w, skip),
            crop_h: skips(padded.h, skip),
            traf_w: traf_w as i32,
            traf_h: traf_h as i32,
        }
    }

    /// Dimensions of the delivered buffer, in scaled pixels.
    pub fn final_size(&self) -> (i32, i32) {
        let w = skips(self.requested.w, self.skip).min(self.crop_w - self.left_border);
        let h = skips(self.requested.h, self.skip).min(self.crop_h - self.upper_border);
        (w.max(1), h.max(1))
    }
}

/// Clamps a rectangle to the image, keeping at least one pixel.
pub fn clamp_rect(r: Rect, full: Size) -> Rect {
    let max_x = (full.w - 1).max(0);
    let max_y = (full.h - 1).max(0);
    let x1 = r.x.clamp(0, max_x);
    let y1 = r.y.clamp(0, max_y);
    let x2 = r.right().clamp(x1, max_x);
    let y2 = r.bottom().clamp(y1, max_y);
    Rect::from_corners(x1, y1, x2, y2)
}

/// Grows `source` to take in `extra`, clamped to the image. New left and top
/// edges land on the sampling grid of `anchor` so buffers taken at `skip`
/// stay pixel-aligned with it.
pub fn grow_on_grid(source: Rect, extra: Rect, anchor: Rect, skip: i32, full: Size) -> Rect {
    let skip = skip.max(1);
    let extra = clamp_rect(extra, full);
    let snap = |anchor: i32, current: i32, want: i32| {
        if want >= current {
            return current;
        }
        let mut at = anchor - skip * (anchor - want + skip - 1).div_euclid(skip);
        if at < 0 {
            at += skip * ((skip - 1 - at) / skip);
        }
        current.min(at)
    };
    let x1 = snap(anchor.x, source.x, extra.x);
    let y1 = snap(anchor.y, source.y, extra.y);
    let x2 = source.right().max(extra.right());
    let y2 = source.bottom().max(extra.bottom());
    clamp_rect(Rect::from_corners(x1, y1, x2, y2), full)
}

/// Grows `r` by `fraction` of the full image size, split over both sides of
/// each axis. A side that hits the image edge pushes its excess to the other
/// side.
pub fn expand_by_fraction(r: Rect, full: Size, fraction: f64) -> Rect {
    let dw = (full.w as f64 * fraction / 2.0) as i32;
    let dh = (full.h as f64 * fraction / 2.0) as i32;

    let (mut x1, mut x2) = (r.x - dw, r.x + r.w + dw);
    let (mut y1, mut y2) = (r.y - dh, r.y + r.h + dh);
    if x1 < 0 {
        x2 += -x1;
        x1 = 0;
    }
    if x2 > full.w {
        x1 -= x2 - full.w;
        x2 = full.w;
    }
    if y1 < 0 {
        y2 += -y1;
        y1 = 0;
    }
    if y2 > full.h {
        y1 -= y2 - full.h;
        y2 = full.h;
    }
    let x = x1.max(0);
    let y = y1.max(0);
    Rect::new(x, y, (x2 - x1).min(full.w - x), (y2 - y1).min(full.h - y))
}

#[cfg(test)]
mod tests {
    use super::{
        CropLayout, CropWindow, Rect, Size, clamp_rect, expand_by_fraction, grow_on_grid, skips,
    };

    fn layout(window: CropWindow, full: Size, border: u32, margin: Option<f64>) -> CropLayout {
        CropLayout::compute(
            window,
            full,
            border,
            |r| r,
            margin,
            |r, skip| (skips(r.w, skip as i32) as u32, skips(r.h, skip as i32) as u32),
        )
    }

    #[test]
    fn skips_rounds_up() {
        assert_eq!(skips(264, 1), 264);
        assert_eq!(skips(10, 3), 4);
        assert_eq!(skips(9, 3), 3);
        assert_eq!(skips(0, 4), 0);
    }

    #[test]
    fn interior_request_gets_full_border() {
        let l = layout(
            CropWindow::new(Rect::new(100, 100, 200, 200), 1),
            Size::new(4000, 3000),
            32,
            None,
        );
        assert_eq!(l.padded, Rect::new(68, 68, 264, 264));
        assert_eq!(l.source, Rect::new(68, 68, 264, 264));
        assert_eq!((l.traf_w, l.traf_h), (264, 264));
        assert_eq!((l.crop_w, l.crop_h), (264, 264));
        assert_eq!((l.left_border, l.upper_border), (32, 32));
        assert_eq!(l.final_size(), (200, 200));
    }

    #[test]
    fn border_is_clipped_at_image_edges() {
        let l = layout(
            CropWindow::new(Rect::new(10, 3980, 50, 100), 1),
            Size::new(100, 4000),
            32,
            None,
        );
        assert_eq!(l.padded.x, 0);
        assert_eq!(l.left_border, 10);
        assert_eq!(l.requested, Rect::new(10, 3980, 50, 20));
        assert_eq!(l.padded.bottom(), 3999);
        assert_eq!(l.final_size(), (50, 20));
    }

    #[test]
    fn negative_request_clamps_to_origin() {
        let l = layout(
            CropWindow::new(Rect::new(-50, -20, 0, -5), 1),
            Size::new(64, 64),
            4,
            None,
        );
        assert_eq!(l.requested, Rect::new(0, 0, 1, 1));
        assert_eq!(l.padded, Rect::new(0, 0, 5, 5));
        assert_eq!(l.final_size(), (1, 1));
    }

    #[test]
    fn scaled_padding_keeps_requested_origin_on_grid() {
        let l = layout(
            CropWindow::new(Rect::new(7, 40, 30, 30), 3),
            Size::new(200, 200),
            8,
            None,
        );
        // 7 / 3 = 2 whole steps available on the left.
        assert_eq!(l.padded.x, 1);
        assert_eq!(l.left_border, 2);
        assert_eq!(l.padded.x + l.left_border * 3, 7);
        assert_eq!(l.padded.y + l.upper_border * 3, 40);
        assert_eq!(l.crop_w, skips(l.padded.w, 3));
        assert_eq!(l.final_size(), (10, 10));
    }

    #[test]
    fn margin_expands_source_but_not_padding() {
        let l = layout(
            CropWindow::new(Rect::new(1000, 1000, 200, 200), 1),
            Size::new(4000, 3000),
            32,
            Some(0.15),
        );
        assert_eq!(l.padded, Rect::new(968, 968, 264, 264));
        assert_eq!(l.source, Rect::new(668, 743, 864, 714));
        assert_eq!((l.crop_w, l.crop_h), (264, 264));
        assert_eq!((l.traf_w, l.traf_h), (864, 714));
    }

    #[test]
    fn margin_shifts_away_from_edges() {
        let full = Size::new(1000, 1000);
        let r = expand_by_fraction(Rect::new(0, 900, 100, 100), full, 0.2);
        assert_eq!(r.x, 0);
        assert_eq!(r.w, 300);
        assert_eq!(r.y + r.h, 1000);
        assert_eq!(r.h, 300);
    }

    #[test]
    fn clamp_rect_keeps_one_pixel() {
        let r = clamp_rect(Rect::new(500, 500, 10, 10), Size::new(100, 80));
        assert_eq!(r, Rect::new(99, 79, 1, 1));
    }

    #[test]
    fn grow_on_grid_keeps_sampling_phase() {
        let full = Size::new(400, 300);
        let source = Rect::new(136, 36, 150, 100);
        let r = grow_on_grid(source, Rect::new(35, 115, 11, 11), source, 2, full);
        assert_eq!(r, Rect::new(34, 36, 252, 100));
        assert_eq!((source.x - r.x) % 2, 0);

        // Near the edge the grid point at or past zero wins.
        let source = Rect::new(3, 3, 20, 20);
        let r = grow_on_grid(source, Rect::new(-4, 10, 5, 5), source, 2, full);
        assert_eq!((r.x, r.y), (1, 3));

        // Already inside: unchanged.
        let r = grow_on_grid(source, Rect::new(5, 5, 4, 4), source, 2, full);
        assert_eq!(r, source);
    }

    #[test]
    fn rect_union_and_intersection() {
        let a = Rect::new(0, 0, 10, 10);
        let b = Rect::new(20, 5, 5, 5);
        assert!(!a.intersects(&b));
        assert!(a.intersects(&Rect::new(9, 9, 3, 3)));
        assert_eq!(a.union(&b), Rect::new(0, 0, 25, 10));
    }
}
