use image::{Rgb, Rgb32FImage, RgbImage};

use crate::state::WorkingProfile;

/// 8-bit buffer handed to listeners.
pub type Image8 = RgbImage;

/// Linear-light RGB working buffer tagged with its color space.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkImage {
    pub pixels: Rgb32FImage,
    pub profile: WorkingProfile,
}

impl WorkImage {
    pub fn allocate(w: u32, h: u32, profile: WorkingProfile) -> Self {
        Self {
            pixels: Rgb32FImage::new(w.max(1), h.max(1)),
            profile,
        }
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.pixels.dimensions()
    }

    /// Copies `src` into this buffer. Sizes must match; the overlap is copied
    /// otherwise.
    pub fn copy_from(&mut self, src: &WorkImage) {
        self.profile = src.profile;
        if self.dimensions() == src.dimensions() {
            self.pixels.copy_from_slice(src.pixels.as_raw());
        } else {
            self.copy_region_from(src, 0, 0);
        }
    }

    /// Fills this buffer with the pixels of `src` starting at `(x, y)`.
    /// Pixels falling outside `src` are left black.
    pub fn copy_region_from(&mut self, src: &WorkImage, x: u32, y: u32) {
        self.profile = src.profile;
        let (sw, sh) = src.dimensions();
        let (w, h) = self.dimensions();
        let cols = w.min(sw.saturating_sub(x)) as usize;
        let row_len = w as usize * 3;
        let src_row_len = sw as usize * 3;
        for (row, out) in self.pixels.chunks_mut(row_len).enumerate() {
            let sy = y as usize + row;
            if sy >= sh as usize || cols == 0 {
                out.fill(0.0);
                continue;
            }
            let start = sy * src_row_len + x as usize * 3;
            out[..cols * 3].copy_from_slice(&src.pixels.as_raw()[start..start + cols * 3]);
            out[cols * 3..].fill(0.0);
        }
    }

    /// Writes this buffer into `dst` with its top-left at `(x, y)`, clipping at
    /// the destination edges.
    pub fn paste_into(&self, dst: &mut WorkImage, x: u32, y: u32) {
        let (w, h) = self.dimensions();
        let (dw, dh) = dst.dimensions();
        let cols = w.min(dw.saturating_sub(x)) as usize;
        let rows = h.min(dh.saturating_sub(y)) as usize;
        if cols == 0 {
            return;
        }
        let row_len = w as usize * 3;
        let dst_row_len = dw as usize * 3;
        for row in 0..rows {
            let src_start = row * row_len;
            let dst_start = (y as usize + row) * dst_row_len + x as usize * 3;
            (*dst.pixels)[dst_start..dst_start + cols * 3]
                .copy_from_slice(&self.pixels.as_raw()[src_start..src_start + cols * 3]);
        }
    }

    pub fn pixel(&self, x: u32, y: u32) -> Rgb<f32> {
        *self.pixels.get_pixel(x, y)
    }
}

/// Owned, nullable stage buffer.
#[derive(Debug, Default)]
pub struct Slot {
    buf: Option<WorkImage>,
}

impl Slot {
    /// Returns the buffer, reallocating only if it is missing or has other dimensions.
    pub fn ensure_size(&mut self, w: u32, h: u32, profile: WorkingProfile) -> &mut WorkImage {
        let (w, h) = (w.max(1), h.max(1));
        let fits = self.buf.as_ref().is_some_and(|b| b.dimensions() == (w, h));
        if !fits {
            self.buf = None;
        }
        let buf = self
            .buf
            .get_or_insert_with(|| WorkImage::allocate(w, h, profile));
        buf.profile = profile;
        buf
    }

    pub fn release(&mut self) {
        self.buf = None;
    }

    pub fn get(&self) -> Option<&WorkImage> {
        self.buf.as_ref()
    }

    pub fn is_allocated(&self) -> bool {
        self.buf.is_some()
    }
}
