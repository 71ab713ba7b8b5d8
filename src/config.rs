use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::geometry::DEFAULT_BORDER;

/// Environment variable overriding [`PipelineSettings::worker_threads`].
pub const WORKERS_ENV: &str = "DETAIL_CROP_WORKERS";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
/// Persisted pipeline settings for detail-crop.
pub struct PipelineSettings {
    /// Border, in output pixels, computed around every requested crop.
    pub border: u32,
    /// Run denoise on zoomed-out crops too, not only at 1:1.
    pub denoise_zoomed_out: bool,
    /// Fraction of the image size fetched around the source rectangle while
    /// lens distortion correction is active.
    pub distortion_overscan: f64,
    /// Same for perspective correction. Estimated from the correction itself
    /// when unset.
    pub perspective_overscan: Option<f64>,
    pub worker_threads: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            border: DEFAULT_BORDER,
            denoise_zoomed_out: false,
            distortion_overscan: 0.15,
            perspective_overscan: None,
            worker_threads: 2,
        }
    }
}

impl PipelineSettings {
    /// Returns the user settings file path, if a config directory is available.
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("detail-crop").join("settings.toml"))
    }

    /// Loads settings from the user config directory, falling back to defaults
    /// on any error, then applies environment overrides.
    pub fn load() -> Self {
        let settings = Self::config_path()
            .map(|path| Self::load_from(&path))
            .unwrap_or_default();
        settings.with_worker_override(std::env::var(WORKERS_ENV).ok().as_deref())
    }

    pub fn load_from(path: &Path) -> Self {
        let Ok(contents) = std::fs::read_to_string(path) else {
            return Self::default();
        };
        match toml::from_str(&contents) {
            Ok(settings) => settings,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "invalid settings, using defaults");
                Self::default()
            }
        }
    }

    /// Writes settings to `path`, creating parent directories.
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Writes settings to the user config directory, ignoring errors.
    pub fn save(&self) {
        let Some(path) = Self::config_path() else {
            return;
        };
        if let Err(err) = self.save_to(&path) {
            tracing::warn!(path = %path.display(), error = %err, "could not save settings");
        }
    }

    fn with_worker_override(mut self, value: Option<&str>) -> Self {
        if let Some(n) = value.and_then(|v| v.trim().parse::<usize>().ok()) {
            self.worker_threads = n;
        }
        self.worker_threads = self.worker_threads.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::PipelineSettings;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let s = PipelineSettings::load_from(&dir.path().join("nope.toml"));
        assert_eq!(s, PipelineSettings::default());
        assert_eq!(s.border, 32);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        std::fs::write(&path, "denoise_zoomed_out = true\nperspective_overscan = 0.4\n").unwrap();
        let s = PipelineSettings::load_from(&path);
        assert!(s.denoise_zoomed_out);
        assert_eq!(s.perspective_overscan, Some(0.4));
        assert_eq!(s.distortion_overscan, 0.15);
    }

    #[test]
    fn garbage_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        std::fs::write(&path, "border = \"wide\"").unwrap();
        assert_eq!(PipelineSettings::load_from(&path), PipelineSettings::default());
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.toml");
        let s = PipelineSettings {
            border: 8,
            worker_threads: 4,
            ..Default::default()
        };
        s.save_to(&path).unwrap();
        assert_eq!(PipelineSettings::load_from(&path), s);
    }

    #[test]
    fn worker_override_parses_and_floors() {
        let s = PipelineSettings::default();
        assert_eq!(s.clone().with_worker_override(Some(" 6 ")).worker_threads, 6);
        assert_eq!(s.clone().with_worker_override(Some("0")).worker_threads, 1);
        assert_eq!(s.clone().with_worker_override(Some("many")).worker_threads, 2);
        assert_eq!(s.with_worker_override(None).worker_threads, 2);
    }
}
