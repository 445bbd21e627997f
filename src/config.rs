//! Configuration types for keying jobs and the execution engine

use crate::{
    color::{tolerance_to_distance, ColorSample},
    error::{BgKeyError, Result},
    selection::MagicSelectionState,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// How background pixels are identified
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProcessingMode {
    /// Detect the background color and threshold automatically
    Auto,
    /// Detect the background color, use the configured threshold
    Manual,
    /// Remove user-picked colors, each with its own tolerance
    ColorPicker,
}

impl Default for ProcessingMode {
    fn default() -> Self {
        Self::Auto
    }
}

impl std::fmt::Display for ProcessingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Manual => write!(f, "manual"),
            Self::ColorPicker => write!(f, "colorPicker"),
        }
    }
}

/// Edge treatment applied to the classification result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EdgeMode {
    /// Binary alpha: matched pixels become fully transparent
    Hard,
    /// Smoothstep falloff written directly by the classifier
    Feathered,
    /// Smoothing followed by background color-spill removal
    Decontaminate,
    /// Gaussian-like smoothing of transition pixels
    Smooth,
    /// Morphological open followed by a light edge blur
    Refine,
}

impl Default for EdgeMode {
    fn default() -> Self {
        Self::Hard
    }
}

impl EdgeMode {
    /// Whether this mode runs the refinement pipeline after classification
    #[must_use]
    pub fn is_advanced(&self) -> bool {
        matches!(self, Self::Decontaminate | Self::Smooth | Self::Refine)
    }
}

impl std::fmt::Display for EdgeMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Hard => write!(f, "hard"),
            Self::Feathered => write!(f, "feathered"),
            Self::Decontaminate => write!(f, "decontaminate"),
            Self::Smooth => write!(f, "smooth"),
            Self::Refine => write!(f, "refine"),
        }
    }
}

/// A user-picked color with its own tolerance (0-100)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectedColor {
    pub id: String,
    #[serde(flatten)]
    pub color: ColorSample,
    pub tolerance: f32,
}

impl SelectedColor {
    /// Create a selected color with a fresh identifier
    #[must_use]
    pub fn new(color: ColorSample, tolerance: f32) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            color,
            tolerance,
        }
    }

    /// Distance cutoff corresponding to the tolerance
    #[must_use]
    pub fn cutoff(&self) -> f32 {
        tolerance_to_distance(self.tolerance)
    }
}

/// Per-job processing settings, owned by the caller and passed by value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProcessingSettings {
    pub mode: ProcessingMode,
    /// Distance cutoff (0-255) used in manual mode
    pub threshold: f32,
    /// Cached auto-threshold result, reused in auto mode when present
    pub auto_threshold: Option<f32>,
    pub selected_colors: Vec<SelectedColor>,
    pub edge_mode: EdgeMode,
    /// Feather, blend, erosion or strength radius depending on `edge_mode` (1-20)
    pub feather_radius: u32,
    pub magic_selection: MagicSelectionState,
}

impl Default for ProcessingSettings {
    fn default() -> Self {
        Self {
            mode: ProcessingMode::Auto,
            threshold: 30.0,
            auto_threshold: None,
            selected_colors: Vec::new(),
            edge_mode: EdgeMode::Hard,
            feather_radius: 5,
            magic_selection: MagicSelectionState::default(),
        }
    }
}

impl ProcessingSettings {
    /// Create a new settings builder
    #[must_use]
    pub fn builder() -> ProcessingSettingsBuilder {
        ProcessingSettingsBuilder::default()
    }

    /// Load settings from a JSON file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let settings: Self = serde_json::from_str(&text)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate value ranges
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=255.0).contains(&self.threshold) {
            return Err(BgKeyError::config_value_error(
                "threshold",
                self.threshold,
                "0-255",
            ));
        }
        if let Some(auto) = self.auto_threshold {
            if !(0.0..=255.0).contains(&auto) {
                return Err(BgKeyError::config_value_error(
                    "autoThreshold",
                    auto,
                    "0-255",
                ));
            }
        }
        if !(1..=20).contains(&self.feather_radius) {
            return Err(BgKeyError::config_value_error(
                "featherRadius",
                self.feather_radius,
                "1-20",
            ));
        }
        for selected in &self.selected_colors {
            if !(0.0..=100.0).contains(&selected.tolerance) {
                return Err(BgKeyError::config_value_error(
                    "tolerance",
                    selected.tolerance,
                    "0-100",
                ));
            }
        }
        if !(0.0..=100.0).contains(&self.magic_selection.tolerance) {
            return Err(BgKeyError::config_value_error(
                "magicSelection.tolerance",
                self.magic_selection.tolerance,
                "0-100",
            ));
        }
        self.magic_selection.validate()?;
        Ok(())
    }
}

/// Builder for `ProcessingSettings`
#[derive(Default)]
pub struct ProcessingSettingsBuilder {
    settings: ProcessingSettings,
}

impl ProcessingSettingsBuilder {
    #[must_use]
    pub fn mode(mut self, mode: ProcessingMode) -> Self {
        self.settings.mode = mode;
        self
    }

    #[must_use]
    pub fn threshold(mut self, threshold: f32) -> Self {
        self.settings.threshold = threshold;
        self
    }

    #[must_use]
    pub fn auto_threshold(mut self, threshold: Option<f32>) -> Self {
        self.settings.auto_threshold = threshold;
        self
    }

    /// Add a picked color; tolerance is clamped to 0-100
    #[must_use]
    pub fn select_color(mut self, color: ColorSample, tolerance: f32) -> Self {
        self.settings
            .selected_colors
            .push(SelectedColor::new(color, tolerance.clamp(0.0, 100.0)));
        self
    }

    #[must_use]
    pub fn edge_mode(mut self, edge_mode: EdgeMode) -> Self {
        self.settings.edge_mode = edge_mode;
        self
    }

    #[must_use]
    pub fn feather_radius(mut self, radius: u32) -> Self {
        self.settings.feather_radius = radius;
        self
    }

    #[must_use]
    pub fn magic_selection(mut self, state: MagicSelectionState) -> Self {
        self.settings.magic_selection = state;
        self
    }

    /// Build the settings
    ///
    /// # Errors
    ///
    /// Returns `BgKeyError::InvalidConfig` for out-of-range values
    pub fn build(self) -> Result<ProcessingSettings> {
        self.settings.validate()?;
        Ok(self.settings)
    }
}

/// Engine-level configuration shared by every job of an execution context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Pixels classified between cancellation checks
    pub chunk_size: usize,
    /// Minimum progress increase (percentage points) between reports
    pub progress_step: u8,
    /// Applied magic regions kept before same-mode regions are consolidated
    pub max_applied_regions: usize,
    /// Bounded request queue length of the worker
    pub request_queue_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chunk_size: 250_000,
            progress_step: 10,
            max_applied_regions: 20,
            request_queue_capacity: 32,
        }
    }
}

impl EngineConfig {
    #[must_use]
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    /// Validate engine parameters
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(BgKeyError::invalid_config("chunk size must be positive"));
        }
        if self.progress_step == 0 || self.progress_step > 100 {
            return Err(BgKeyError::config_value_error(
                "progress step",
                self.progress_step,
                "1-100",
            ));
        }
        if self.max_applied_regions == 0 {
            return Err(BgKeyError::invalid_config(
                "max applied regions must be positive",
            ));
        }
        if self.request_queue_capacity == 0 {
            return Err(BgKeyError::invalid_config(
                "request queue capacity must be positive",
            ));
        }
        Ok(())
    }
}

/// Builder for `EngineConfig`
#[derive(Default)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    #[must_use]
    pub fn chunk_size(mut self, pixels: usize) -> Self {
        self.config.chunk_size = pixels;
        self
    }

    #[must_use]
    pub fn progress_step(mut self, step: u8) -> Self {
        self.config.progress_step = step;
        self
    }

    #[must_use]
    pub fn max_applied_regions(mut self, max: usize) -> Self {
        self.config.max_applied_regions = max;
        self
    }

    #[must_use]
    pub fn request_queue_capacity(mut self, capacity: usize) -> Self {
        self.config.request_queue_capacity = capacity;
        self
    }

    pub fn build(self) -> Result<EngineConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
