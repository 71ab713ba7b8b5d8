use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::refresh::RefreshMask;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
/// Per-hue HSL adjustment used for selective color controls.
pub struct HslAdjust {
    pub hue: f32,
    pub saturation: f32,
    pub lightness: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WhiteBalance {
    /// -1.0 (cool) to 1.0 (warm).
    pub temperature: f32,
    /// -1.0 (green) to 1.0 (magenta).
    pub tint: f32,
}

impl WhiteBalance {
    /// Channel multipliers applied while decoding.
    pub fn multipliers(&self) -> [f32; 3] {
        let t = self.temperature.clamp(-1.0, 1.0) * 0.3;
        let g = 1.0 - self.tint.clamp(-1.0, 1.0) * 0.2;
        [1.0 + t, g, 1.0 - t]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExposureParams {
    /// Exposure compensation in EV.
    pub compensation: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilmNegative {
    pub enabled: bool,
    /// Per-channel density exponents.
    pub exponents: [f32; 3],
}

impl Default for FilmNegative {
    fn default() -> Self {
        Self {
            enabled: false,
            exponents: [1.0, 1.0, 1.0],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DenoiseParams {
    pub enabled: bool,
    /// 0.0 to 1.0.
    pub strength: f32,
}

impl Default for DenoiseParams {
    fn default() -> Self {
        Self {
            enabled: false,
            strength: 0.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
/// One clone-healing spot, in full-image pixels.
pub struct Spot {
    pub x: f32,
    pub y: f32,
    pub radius: f32,
    pub source_x: f32,
    pub source_y: f32,
    /// 0.0 (hard edge) to 1.0 (fully feathered).
    #[serde(default)]
    pub feather: f32,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SpotParams {
    pub enabled: bool,
    pub entries: Vec<Spot>,
}

impl SpotParams {
    pub fn active(&self) -> bool {
        self.enabled && !self.entries.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
/// Global dynamic-range compression. Needs full-image context.
pub struct ToneCompression {
    pub enabled: bool,
    /// 0.0 to 1.0.
    pub amount: f32,
}

impl Default for ToneCompression {
    fn default() -> Self {
        Self {
            enabled: false,
            amount: 0.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Dehaze {
    pub enabled: bool,
    /// 0.0 to 1.0.
    pub strength: f32,
}

impl Default for Dehaze {
    fn default() -> Self {
        Self {
            enabled: false,
            strength: 0.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
/// Keystone perspective correction parameters.
pub struct Keystone {
    pub vertical: f32,
    pub horizontal: f32,
}

impl Keystone {
    pub fn active(&self) -> bool {
        self.vertical != 0.0 || self.horizontal != 0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GeometryParams {
    /// Straighten angle in degrees, counter-clockwise.
    pub rotation_deg: f32,
    pub keystone: Keystone,
    /// Radial distortion coefficient; positive values correct barrel distortion.
    pub distortion: f32,
}

impl GeometryParams {
    pub fn active(&self) -> bool {
        self.rotation_deg != 0.0 || self.keystone.active() || self.distortion != 0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RgbCurve {
    pub contrast: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LumaCurve {
    pub highlights: f32,
    pub shadows: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ColorParams {
    pub saturation: f32,
    pub hue_shift: f32,
    // red, orange, yellow, green, cyan, blue, purple, pink
    pub selective_color: [HslAdjust; 8],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkingProfile {
    #[default]
    Srgb,
    Rec2020,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputProfile {
    #[default]
    Srgb,
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ColorManagement {
    pub working: WorkingProfile,
    pub output: OutputProfile,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
/// Processing parameters shared by every region of one image.
pub struct ProcParams {
    pub white_balance: WhiteBalance,
    pub exposure: ExposureParams,
    pub film_negative: FilmNegative,
    pub denoise: DenoiseParams,
    pub spots: SpotParams,
    pub tone_compression: ToneCompression,
    pub dehaze: Dehaze,
    pub geometry: GeometryParams,
    pub rgb_curve: RgbCurve,
    pub luma_curve: LumaCurve,
    pub color: ColorParams,
    pub icm: ColorManagement,
}

impl ProcParams {
    /// Whether the dynamic-range stage has anything to do.
    pub fn hdr_active(&self) -> bool {
        self.tone_compression.enabled || self.dehaze.enabled
    }

    /// Stages that have to rerun when switching from `previous` to `self`.
    pub fn refresh_mask_since(&self, previous: &ProcParams) -> RefreshMask {
        let mut mask = RefreshMask::empty();
        if self.white_balance != previous.white_balance
            || self.exposure != previous.exposure
            || self.film_negative != previous.film_negative
            || self.icm.working != previous.icm.working
        {
            mask |= RefreshMask::INIT;
        }
        if self.denoise != previous.denoise {
            mask |= RefreshMask::LINDENOISE;
        }
        if self.spots != previous.spots {
            mask |= RefreshMask::SPOT;
        }
        if self.tone_compression != previous.tone_compression || self.dehaze != previous.dehaze {
            mask |= RefreshMask::HDR;
        }
        if self.geometry != previous.geometry {
            mask |= RefreshMask::TRANSFORM;
        }
        if self.rgb_curve != previous.rgb_curve {
            mask |= RefreshMask::RGBCURVE;
        }
        if self.luma_curve != previous.luma_curve {
            mask |= RefreshMask::LUMACURVE;
        }
        if self.color.saturation != previous.color.saturation
            || self.color.hue_shift != previous.color.hue_shift
        {
            mask |= RefreshMask::COLOR;
        }
        if self.color.selective_color != previous.color.selective_color
            || self.icm.output != previous.icm.output
        {
            mask |= RefreshMask::LUMINANCE;
        }
        mask
    }

    /// Loads processing parameters from the image sidecar JSON, if present and valid.
    pub fn load(image_path: &Path) -> Option<Self> {
        let sidecar = sidecar_path(image_path);
        let json = std::fs::read_to_string(sidecar).ok()?;
        match serde_json::from_str(&json) {
            Ok(params) => Some(params),
            Err(err) => {
                tracing::warn!(path = %image_path.display(), error = %err, "ignoring unreadable sidecar");
                None
            }
        }
    }

    /// Saves the parameters to the image sidecar JSON.
    pub fn save(&self, image_path: &Path) -> anyhow::Result<()> {
        let sidecar = sidecar_path(image_path);
        if let Some(parent) = sidecar.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&sidecar, json)
            .with_context(|| format!("writing {}", sidecar.display()))?;
        Ok(())
    }
}

pub fn sidecar_path(image_path: &Path) -> PathBuf {
    let dir = image_path.parent().unwrap_or(Path::new("."));
    let filename = image_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    dir.join(".edits").join(format!("{}.json", filename))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::{Path, PathBuf};

    #[test]
    fn sidecar_uses_edits_folder() {
        let p = sidecar_path(Path::new("/photos/IMG_001.RAF"));
        assert_eq!(p, PathBuf::from("/photos/.edits/IMG_001.RAF.json"));
    }

    #[test]
    fn sidecar_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("shot.png");
        let mut params = ProcParams::default();
        params.spots.enabled = true;
        params.spots.entries.push(Spot {
            x: 10.0,
            y: 12.0,
            radius: 4.0,
            source_x: 30.0,
            source_y: 12.0,
            feather: 0.5,
        });
        params.tone_compression.enabled = true;
        params.save(&image).unwrap();

        let loaded = ProcParams::load(&image).unwrap();
        assert_eq!(loaded, params);
    }

    #[test]
    fn partial_sidecar_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("shot.png");
        let sidecar = sidecar_path(&image);
        std::fs::create_dir_all(sidecar.parent().unwrap()).unwrap();
        std::fs::write(&sidecar, r#"{"rgb_curve": {"contrast": 0.25}}"#).unwrap();

        let loaded = ProcParams::load(&image).unwrap();
        assert_eq!(loaded.rgb_curve.contrast, 0.25);
        assert_eq!(loaded.denoise, DenoiseParams::default());
    }

    #[test]
    fn identical_params_need_no_refresh() {
        let p = ProcParams::default();
        assert!(p.refresh_mask_since(&p.clone()).is_empty());
    }

    #[test]
    fn curve_change_maps_to_curve_stage_only() {
        let before = ProcParams::default();
        let mut after = before.clone();
        after.luma_curve.shadows = 0.3;
        assert_eq!(after.refresh_mask_since(&before), RefreshMask::LUMACURVE);
    }

    #[test]
    fn upstream_changes_map_to_their_stages() {
        let before = ProcParams::default();
        let mut after = before.clone();
        after.exposure.compensation = 1.0;
        after.dehaze.enabled = true;
        after.geometry.rotation_deg = 2.0;
        after.color.selective_color[3].hue = 0.2;
        assert_eq!(
            after.refresh_mask_since(&before),
            RefreshMask::INIT | RefreshMask::HDR | RefreshMask::TRANSFORM | RefreshMask::LUMINANCE
        );
    }
}
