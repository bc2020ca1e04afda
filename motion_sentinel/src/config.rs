// THEORY:
// `PipelineConfig` carries every tuning knob of the motion pipeline. Each field
// has a default that reproduces the reference behaviour (5x5 auto-sigma blur,
// cutoff 30, 7x7 ellipse, open 1 / close 3 / dilate 1, minimum area 500), so an
// empty TOML file is a valid configuration. The config is read once before the
// stream starts; there is no reconfiguration mid-stream.

use crate::error::ConfigError;
use serde::Deserialize;
use std::path::Path;

/// Shape of the structuring element used by every morphology stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MorphShape {
    #[default]
    Ellipse,
    Rect,
    Cross,
}

/// Configuration for the MotionPipeline, allowing for tunable behavior.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Side of the square Gaussian kernel. Must be odd; 1 disables smoothing.
    pub blur_kernel_size: u32,
    /// Gaussian standard deviation. 0.0 derives it from `blur_kernel_size`.
    pub blur_sigma: f64,
    /// Difference values strictly above this become foreground.
    pub diff_threshold: u8,
    /// Side of the square structuring element. Must be odd.
    pub morph_kernel_size: u32,
    pub morph_shape: MorphShape,
    pub open_iterations: u32,
    pub close_iterations: u32,
    pub dilate_iterations: u32,
    /// Regions enclosing this many pixels or fewer are treated as noise.
    pub min_region_area: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            blur_kernel_size: 5,
            blur_sigma: 0.0,
            diff_threshold: 30,
            morph_kernel_size: 7,
            morph_shape: MorphShape::Ellipse,
            open_iterations: 1,
            close_iterations: 3,
            dilate_iterations: 1,
            min_region_area: 500,
        }
    }
}

impl PipelineConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: PipelineConfig =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects values the image operators cannot honour.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.blur_kernel_size == 0 || self.blur_kernel_size % 2 == 0 {
            return Err(ConfigError::Invalid(format!(
                "blur_kernel_size must be a positive odd number, got {}",
                self.blur_kernel_size
            )));
        }
        if !self.blur_sigma.is_finite() || self.blur_sigma < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "blur_sigma must be finite and non-negative, got {}",
                self.blur_sigma
            )));
        }
        if self.morph_kernel_size == 0 || self.morph_kernel_size % 2 == 0 {
            return Err(ConfigError::Invalid(format!(
                "morph_kernel_size must be a positive odd number, got {}",
                self.morph_kernel_size
            )));
        }
        Ok(())
    }
}
