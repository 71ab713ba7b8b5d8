use std::path::Path;

use anyhow::Context;
use image::{DynamicImage, Rgb32FImage};
use rayon::prelude::*;

use crate::buffer::WorkImage;
use crate::geometry::{Rect, Size, skips};
use crate::processing::output::{SRGB_TO_REC2020, apply_matrix, srgb_to_linear};
use crate::state::{ColorManagement, ExposureParams, FilmNegative, WhiteBalance, WorkingProfile};

static RAW_EXTS: &[&str] = &["raf", "dng", "nef", "cr2", "arw"];
static SUPPORTED_IMAGE_EXTS: &[&str] = &[
    "jpg", "jpeg", "png", "tiff", "tif", "webp", "bmp", "raf", "dng", "nef", "cr2", "arw",
];

/// Transmission of unexposed film base, mapped to white.
const FILM_BASE: f32 = 0.1;

fn has_extension(path: &Path, exts: &[&str]) -> bool {
    let Some(ext) = path.extension().map(|e| e.to_string_lossy()) else {
        return false;
    };
    exts.iter().any(|known| ext.eq_ignore_ascii_case(known))
}

pub fn is_raw_image(path: &Path) -> bool {
    has_extension(path, RAW_EXTS)
}

/// Returns `true` if the path has a supported image extension.
pub fn is_supported_image(path: &Path) -> bool {
    has_extension(path, SUPPORTED_IMAGE_EXTS)
}

/// Open an image, falling back to raw decoding for RAW extensions.
pub fn open_image(path: &Path) -> anyhow::Result<DynamicImage> {
    if let Ok(img) = image::open(path) {
        return Ok(img);
    }

    if !is_raw_image(path) {
        // Re-attempt to get the original error message.
        return image::open(path).with_context(|| format!("opening {}", path.display()));
    }

    let raw = rawler::decode_file(path).with_context(|| format!("decoding {}", path.display()))?;
    let develop = rawler::imgop::develop::RawDevelop::default();
    let intermediate = develop.develop_intermediate(&raw)?;
    intermediate
        .to_dynamic_image()
        .ok_or_else(|| anyhow::anyhow!("raw develop produced invalid image"))
}

/// Sub-rectangle and scale to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreviewProps {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
    pub skip: i32,
}

impl PreviewProps {
    pub fn new(rect: Rect, skip: i32) -> Self {
        Self {
            x: rect.x,
            y: rect.y,
            w: rect.w,
            h: rect.h,
            skip: skip.max(1),
        }
    }

    pub fn rect(&self) -> Rect {
        Rect::new(self.x, self.y, self.w, self.h)
    }
}

/// Decoded image the pipeline reads from.
pub trait ImageSource: Send + Sync {
    fn full_size(&self) -> Size;

    /// Dimensions `get_image` produces for `props`, without decoding.
    fn size(&self, props: &PreviewProps) -> (u32, u32) {
        let full = self.full_size();
        let r = props.rect();
        let w = r.w.min(full.w - r.x.max(0)).max(1);
        let h = r.h.min(full.h - r.y.max(0)).max(1);
        (skips(w, props.skip) as u32, skips(h, props.skip) as u32)
    }

    /// Decodes `props` into `dest`, which is already sized by [`ImageSource::size`].
    fn get_image(
        &self,
        wb: &WhiteBalance,
        props: &PreviewProps,
        dest: &mut WorkImage,
        exposure: &ExposureParams,
    );

    /// Converts a freshly decoded buffer into the working color space.
    fn convert_color_space(&self, buf: &mut WorkImage, icm: &ColorManagement, wb: &WhiteBalance) {
        let [r, g, b] = wb.multipliers();
        // Keep white balance from shifting overall brightness.
        let norm = 1.0 / (0.2126 * r + 0.7152 * g + 0.0722 * b);
        let matrix = match icm.working {
            WorkingProfile::Srgb => None,
            WorkingProfile::Rec2020 => Some(SRGB_TO_REC2020),
        };
        buf.pixels.par_chunks_mut(3).for_each(|px| {
            let mut v = [px[0] * norm, px[1] * norm, px[2] * norm];
            if let Some(m) = &matrix {
                v = apply_matrix(m, v);
            }
            px.copy_from_slice(&v);
        });
        buf.profile = icm.working;
    }

    /// Inverts a scanned film negative and tags the result with the working space.
    fn film_negative(&self, buf: &mut WorkImage, params: &FilmNegative, icm: &ColorManagement) {
        let exps = params.exponents;
        buf.pixels.par_chunks_mut(3).for_each(|px| {
            for c in 0..3 {
                let density = px[c].clamp(1e-4, 1.0);
                px[c] = (FILM_BASE / density).powf(exps[c]).min(1.0);
            }
        });
        buf.profile = icm.working;
    }
}

/// Whole image held in memory as linear RGB.
pub struct MemorySource {
    image: Rgb32FImage,
}

impl MemorySource {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let img = open_image(path)?;
        tracing::info!(path = %path.display(), width = img.width(), height = img.height(), "opened source");
        Ok(Self::from_image(img))
    }

    /// Wraps a display-referred image, linearizing it.
    pub fn from_image(img: DynamicImage) -> Self {
        let mut image = img.to_rgb32f();
        image
            .par_chunks_mut(3)
            .for_each(|px| px.iter_mut().for_each(|v| *v = srgb_to_linear(*v)));
        Self { image }
    }

    /// Wraps an already linear image.
    pub fn from_linear(image: Rgb32FImage) -> Self {
        Self { image }
    }
}

impl ImageSource for MemorySource {
    fn full_size(&self) -> Size {
        Size::new(self.image.width() as i32, self.image.height() as i32)
    }

    fn get_image(
        &self,
        wb: &WhiteBalance,
        props: &PreviewProps,
        dest: &mut WorkImage,
        exposure: &ExposureParams,
    ) {
        let (fw, fh) = self.image.dimensions();
        let gain = 2f32.powf(exposure.compensation);
        let mul = wb.multipliers().map(|m| m * gain);
        let skip = props.skip.max(1) as u32;
        let x0 = props.x.max(0) as u32;
        let y0 = props.y.max(0) as u32;
        let width = dest.width() as usize;
        let src = &self.image;

        dest.pixels
            .par_chunks_mut(width * 3)
            .enumerate()
            .for_each(|(by, row)| {
                let sy = (y0 + by as u32 * skip).min(fh - 1);
                for (bx, px) in row.chunks_mut(3).enumerate() {
                    let sx = (x0 + bx as u32 * skip).min(fw - 1);
                    let p = src.get_pixel(sx, sy).0;
                    px[0] = p[0] * mul[0];
                    px[1] = p[1] * mul[1];
                    px[2] = p[2] * mul[2];
                }
            });
    }
}
