use crate::geometry::{CropWindow, Rect, Size, clamp_rect};

/// Zoom factors offered by the view, as fractions of 100%.
pub const ZOOM_STEPS: [f64; 10] = [0.1, 0.125, 1.0 / 6.0, 0.25, 1.0 / 3.0, 0.5, 1.0, 2.0, 4.0, 8.0];

/// What a window shows of the image: zoom, center in full-image pixels and
/// window size in screen pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub zoom: f64,
    pub center: (f64, f64),
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    /// Largest zoom, at most 100%, that shows all of `full` in the window.
    pub fn fit(full: Size, width: u32, height: u32) -> Self {
        let zoom = if full.w <= 0 || full.h <= 0 {
            1.0
        } else {
            (width as f64 / full.w as f64)
                .min(height as f64 / full.h as f64)
                .min(1.0)
        };
        Self {
            zoom: zoom.max(f64::EPSILON),
            center: (full.w as f64 / 2.0, full.h as f64 / 2.0),
            width,
            height,
        }
    }

    /// Sampling step for the current zoom. Zooming in never skips.
    pub fn skip(&self) -> u32 {
        if self.zoom >= 1.0 {
            1
        } else {
            ((1.0 / self.zoom).floor() as u32).max(1)
        }
    }

    /// Full-image rectangle visible in the window, clamped to the image.
    pub fn visible(&self, full: Size) -> Rect {
        let w = (self.width as f64 / self.zoom).ceil();
        let h = (self.height as f64 / self.zoom).ceil();
        let x = (self.center.0 - w / 2.0).floor();
        let y = (self.center.1 - h / 2.0).floor();
        clamp_rect(Rect::new(x as i32, y as i32, w as i32, h as i32), full)
    }

    pub fn crop_window(&self, full: Size) -> CropWindow {
        CropWindow::new(self.visible(full), self.skip())
    }

    /// Maps a window point to full-image coordinates.
    pub fn to_image(&self, px: f64, py: f64) -> (f64, f64) {
        (
            self.center.0 + (px - self.width as f64 / 2.0) / self.zoom,
            self.center.1 + (py - self.height as f64 / 2.0) / self.zoom,
        )
    }

    /// Changes the zoom while keeping the image point under `(px, py)` fixed.
    pub fn zoom_at(&mut self, zoom: f64, px: f64, py: f64) {
        let anchor = self.to_image(px, py);
        self.zoom = zoom.max(f64::EPSILON);
        self.center = (
            anchor.0 - (px - self.width as f64 / 2.0) / self.zoom,
            anchor.1 - (py - self.height as f64 / 2.0) / self.zoom,
        );
    }

    /// Next zoom step in `direction` (positive zooms in).
    pub fn step_zoom(&self, direction: i32) -> f64 {
        if direction > 0 {
            ZOOM_STEPS
                .into_iter()
                .find(|z| *z > self.zoom + 1e-9)
                .unwrap_or(ZOOM_STEPS[ZOOM_STEPS.len() - 1])
        } else {
            ZOOM_STEPS
                .into_iter()
                .rev()
                .find(|z| *z < self.zoom - 1e-9)
                .unwrap_or(ZOOM_STEPS[0])
        }
    }

    pub fn pan(&mut self, dx: f64, dy: f64) {
        self.center.0 += dx / self.zoom;
        self.center.1 += dy / self.zoom;
    }
}
