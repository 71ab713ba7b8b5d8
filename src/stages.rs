use crate::buffer::{Image8, WorkImage};
use crate::config::PipelineSettings;
use crate::geometry::{Rect, Size};
use crate::state::{ColorManagement, DenoiseParams, ProcParams, Spot};

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Decode,
    Denoise,
    Spot,
    Hdr,
    Transform,
    RgbCurve,
    LumaCurve,
    Color,
}

impl Stage {
    pub fn name(self) -> &'static str {
        match self {
            Stage::Decode => "decode",
            Stage::Denoise => "denoise",
            Stage::Spot => "spot",
            Stage::Hdr => "hdr",
            Stage::Transform => "transform",
            Stage::RgbCurve => "rgb_curve",
            Stage::LumaCurve => "luma_curve",
            Stage::Color => "color",
        }
    }
}

/// What a stage did during one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    /// Processed its input.
    Ran,
    /// Copied its input forward without processing, because an earlier stage
    /// reported that nothing visible changes from here on.
    Propagated,
    /// Not requested; its buffer from a previous run was kept.
    Cached,
    /// Disabled; the input passed straight through.
    Unused,
}

/// Advisory result of a processing stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Flow {
    #[default]
    Continue,
    /// Later stages may copy their input forward instead of processing it.
    Stop,
}

impl Flow {
    pub fn is_stop(self) -> bool {
        self == Flow::Stop
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageReport {
    entries: Vec<(Stage, StageOutcome)>,
}

impl StageReport {
    pub fn record(&mut self, stage: Stage, outcome: StageOutcome) {
        self.entries.push((stage, outcome));
    }

    pub fn outcome(&self, stage: Stage) -> Option<StageOutcome> {
        self.entries
            .iter()
            .find(|(s, _)| *s == stage)
            .map(|(_, outcome)| *outcome)
    }

    pub fn ran(&self, stage: Stage) -> bool {
        self.outcome(stage) == Some(StageOutcome::Ran)
    }
}

impl std::fmt::Display for StageReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, (stage, outcome)) in self.entries.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{}={:?}", stage.name(), outcome)?;
        }
        Ok(())
    }
}

/// Extra source context a geometric correction needs around the crop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Overscan {
    None,
    Distortion,
    /// Perspective correction with an estimated margin fraction.
    Perspective(f64),
}

impl Overscan {
    /// Margin fraction of the full image size, if any.
    pub fn margin(self, settings: &PipelineSettings) -> Option<f64> {
        match self {
            Overscan::None => None,
            Overscan::Distortion => Some(settings.distortion_overscan),
            Overscan::Perspective(estimate) => {
                Some(settings.perspective_overscan.unwrap_or(estimate).clamp(0.0, 2.0))
            }
        }
    }
}

/// Placement of a scaled buffer in full-image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferOrigin {
    pub x: i32,
    pub y: i32,
    pub skip: i32,
}

impl BufferOrigin {
    pub fn of(rect: Rect, skip: i32) -> Self {
        Self {
            x: rect.x,
            y: rect.y,
            skip: skip.max(1),
        }
    }

    /// Full-image coordinate of buffer pixel `(bx, by)`.
    pub fn to_full(&self, bx: f32, by: f32) -> (f32, f32) {
        (
            self.x as f32 + bx * self.skip as f32,
            self.y as f32 + by * self.skip as f32,
        )
    }

    /// Buffer coordinate of full-image point `(fx, fy)`.
    pub fn to_buffer(&self, fx: f32, fy: f32) -> (f32, f32) {
        (
            (fx - self.x as f32) / self.skip as f32,
            (fy - self.y as f32) / self.skip as f32,
        )
    }
}

/// Per-image noise estimate shared by every region.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct NoiseStats {
    /// Noise standard deviation per channel, in linear units.
    pub sigma: [f32; 3],
}

/// Processing operations the pipeline executor drives, one per stage.
pub trait StageOps: Send + Sync {
    /// Whether any enabled geometric correction remaps pixels.
    fn needs_transform(&self, params: &ProcParams) -> bool;

    fn overscan(&self, params: &ProcParams, full: Size) -> Overscan;

    /// Maps an output rectangle to the source rectangle the transform reads.
    fn trans_coord(&self, params: &ProcParams, full: Size, rect: Rect) -> Rect;

    fn estimate_noise(&self, image: &WorkImage) -> NoiseStats;

    fn denoise(&self, buf: &mut WorkImage, params: &DenoiseParams, noise: &NoiseStats, skip: i32);

    fn remove_spots(&self, buf: &mut WorkImage, spots: &[Spot], origin: BufferOrigin);

    /// Tone compression or dehaze. Expects the whole image.
    fn compress_dynamic_range(&self, buf: &mut WorkImage, params: &ProcParams) -> Flow;

    fn transform(
        &self,
        src: &WorkImage,
        src_origin: BufferOrigin,
        dst: &mut WorkImage,
        dst_origin: BufferOrigin,
        params: &ProcParams,
        full: Size,
    );

    fn rgb_curve(&self, buf: &mut WorkImage, params: &ProcParams) -> Flow;

    fn luma_curve(&self, buf: &mut WorkImage, params: &ProcParams) -> Flow;

    fn color(&self, buf: &mut WorkImage, params: &ProcParams) -> Flow;

    /// Converts to the 8-bit display space.
    fn to_display(&self, buf: &WorkImage, icm: &ColorManagement) -> Image8;

    /// Converts to the 8-bit output space used for analysis.
    fn to_output(&self, buf: &WorkImage, icm: &ColorManagement) -> Image8;
}

#[cfg(test)]
mod tests {
    use super::{BufferOrigin, Overscan, Stage, StageOutcome, StageReport};
    use crate::config::PipelineSettings;
    use crate::geometry::Rect;

    #[test]
    fn report_looks_up_by_stage() {
        let mut report = StageReport::default();
        report.record(Stage::Decode, StageOutcome::Cached);
        report.record(Stage::RgbCurve, StageOutcome::Ran);
        assert_eq!(report.outcome(Stage::Decode), Some(StageOutcome::Cached));
        assert!(report.ran(Stage::RgbCurve));
        assert_eq!(report.outcome(Stage::Color), None);
        assert_eq!(report.to_string(), "decode=Cached rgb_curve=Ran");
    }

    #[test]
    fn origin_maps_both_ways() {
        let o = BufferOrigin::of(Rect::new(30, 60, 10, 10), 3);
        assert_eq!(o.to_full(2.0, 1.0), (36.0, 63.0));
        assert_eq!(o.to_buffer(36.0, 63.0), (2.0, 1.0));
    }

    #[test]
    fn perspective_margin_prefers_configured_value() {
        let mut settings = PipelineSettings::default();
        assert_eq!(Overscan::Perspective(0.3).margin(&settings), Some(0.3));
        settings.perspective_overscan = Some(0.1);
        assert_eq!(Overscan::Perspective(0.3).margin(&settings), Some(0.1));
        assert_eq!(Overscan::Distortion.margin(&settings), Some(0.15));
        assert_eq!(Overscan::None.margin(&settings), None);
    }
}
