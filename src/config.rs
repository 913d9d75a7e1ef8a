//! Configuration types for listing pipeline runs

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};

/// Largest accepted upload (25 MiB)
pub const MAX_FILE_SIZE: usize = 25 * 1024 * 1024;

/// Smallest recommended and allowed target edge
pub const MIN_EDGE_PX: u32 = 500;

/// Largest recommended and allowed target edge
pub const MAX_EDGE_PX: u32 = 5000;

/// Default working size for segmentation in optimized mode
pub const DEFAULT_SEGMENTATION_CAP: u32 = 1024;

/// Target container format for processed images
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutputFormat {
    /// JPEG (no transparency, flattened onto white)
    #[serde(rename = "jpeg", alias = "photographicLossy")]
    PhotographicLossy,
    /// Lossy WebP with alpha channel
    #[serde(rename = "webp", alias = "modernLossy")]
    ModernLossy,
}

impl Default for OutputFormat {
    fn default() -> Self {
        Self::PhotographicLossy
    }
}

impl OutputFormat {
    /// MIME type written for this format
    #[must_use]
    pub fn mime_type(self) -> &'static str {
        match self {
            Self::PhotographicLossy => "image/jpeg",
            Self::ModernLossy => "image/webp",
        }
    }

    /// File extension (without the dot)
    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Self::PhotographicLossy => "jpg",
            Self::ModernLossy => "webp",
        }
    }

    /// Whether the container keeps an alpha channel
    #[must_use]
    pub fn supports_transparency(self) -> bool {
        matches!(self, Self::ModernLossy)
    }

    /// Parse a user-facing name (`jpeg`, `jpg`, `webp`)
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "jpeg" | "jpg" | "image/jpeg" => Some(Self::PhotographicLossy),
            "webp" | "image/webp" => Some(Self::ModernLossy),
            _ => None,
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PhotographicLossy => write!(f, "jpeg"),
            Self::ModernLossy => write!(f, "webp"),
        }
    }
}

/// Options applied to every job of a batch run
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingOptions {
    /// Longest allowed output edge in pixels (500-5000)
    pub max_edge_px: u32,
    /// Output container format
    pub format: OutputFormat,
    /// Encoder quality factor in (0.0, 1.0]
    pub quality: f32,
    /// Run background removal before resizing
    pub remove_background: bool,
}

impl Default for ProcessingOptions {
    fn default() -> Self {
        Self {
            max_edge_px: 2000,
            format: OutputFormat::default(),
            quality: 0.85,
            remove_background: false,
        }
    }
}

impl ProcessingOptions {
    /// Create a new options builder
    ///
    /// # Examples
    /// ```rust
    /// use listing_pipeline::{OutputFormat, ProcessingOptions};
    ///
    /// let options = ProcessingOptions::builder()
    ///     .max_edge_px(1600)
    ///     .format(OutputFormat::ModernLossy)
    ///     .quality(0.8)
    ///     .build()
    ///     .unwrap();
    /// assert_eq!(options.max_edge_px, 1600);
    /// ```
    #[must_use]
    pub fn builder() -> ProcessingOptionsBuilder {
        ProcessingOptionsBuilder::default()
    }

    /// Validate all option values
    ///
    /// # Errors
    /// - `max_edge_px` outside 500-5000
    /// - `quality` not in (0.0, 1.0]
    pub fn validate(&self) -> Result<()> {
        if !(MIN_EDGE_PX..=MAX_EDGE_PX).contains(&self.max_edge_px) {
            return Err(PipelineError::config_value_error(
                "maxEdgePx",
                self.max_edge_px,
                "500-5000",
            ));
        }

        if !self.quality.is_finite() || self.quality <= 0.0 || self.quality > 1.0 {
            return Err(PipelineError::config_value_error(
                "quality",
                self.quality,
                "(0.0, 1.0]",
            ));
        }

        Ok(())
    }

    /// Quality mapped onto the 1-100 integer scale used by JPEG encoders
    #[must_use]
    pub fn jpeg_quality(&self) -> u8 {
        quality_percent(self.quality)
    }
}

/// Map a (0, 1] quality factor onto 1..=100
#[must_use]
pub fn quality_percent(quality: f32) -> u8 {
    (quality * 100.0).round().clamp(1.0, 100.0) as u8
}

/// Builder for `ProcessingOptions`
#[derive(Debug, Default)]
pub struct ProcessingOptionsBuilder {
    options: ProcessingOptions,
}

impl ProcessingOptionsBuilder {
    #[must_use]
    pub fn max_edge_px(mut self, max_edge_px: u32) -> Self {
        self.options.max_edge_px = max_edge_px;
        self
    }

    #[must_use]
    pub fn format(mut self, format: OutputFormat) -> Self {
        self.options.format = format;
        self
    }

    #[must_use]
    pub fn quality(mut self, quality: f32) -> Self {
        self.options.quality = quality;
        self
    }

    #[must_use]
    pub fn remove_background(mut self, remove: bool) -> Self {
        self.options.remove_background = remove;
        self
    }

    /// Build and validate the options
    ///
    /// # Errors
    /// Returns `PipelineError::InvalidOptions` when any value is out of range.
    pub fn build(self) -> Result<ProcessingOptions> {
        self.options.validate()?;
        Ok(self.options)
    }
}

/// Strategy used by the background remover
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemovalMode {
    /// Segment the full-resolution image directly
    Standard,
    /// Segment a downscaled copy, then composite the mask onto the original
    Optimized,
}

impl Default for RemovalMode {
    fn default() -> Self {
        Self::Optimized
    }
}

/// Limits and tuning shared by every job a processor handles
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Hard cap on input size in bytes
    pub max_file_size: usize,
    /// Smallest edge that does not raise a dimension warning
    pub min_edge_px: u32,
    /// Largest edge that does not raise a dimension warning
    pub max_edge_px: u32,
    /// Background removal strategy
    pub removal_mode: RemovalMode,
    /// Longest edge fed to segmentation in optimized mode
    pub segmentation_cap: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_file_size: MAX_FILE_SIZE,
            min_edge_px: MIN_EDGE_PX,
            max_edge_px: MAX_EDGE_PX,
            removal_mode: RemovalMode::default(),
            segmentation_cap: DEFAULT_SEGMENTATION_CAP,
        }
    }
}

impl PipelineConfig {
    #[must_use]
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::default()
    }

    /// Validate limits for internal consistency
    ///
    /// # Errors
    /// - Zero file size limit
    /// - Inverted edge bounds
    /// - Segmentation cap below 64 px
    pub fn validate(&self) -> Result<()> {
        if self.max_file_size == 0 {
            return Err(PipelineError::config_value_error(
                "max file size",
                self.max_file_size,
                "> 0",
            ));
        }
        if self.min_edge_px == 0 || self.min_edge_px > self.max_edge_px {
            return Err(PipelineError::invalid_options(format!(
                "Invalid edge bounds: {}-{}",
                self.min_edge_px, self.max_edge_px
            )));
        }
        if self.segmentation_cap < 64 {
            return Err(PipelineError::config_value_error(
                "segmentation cap",
                self.segmentation_cap,
                ">= 64",
            ));
        }
        Ok(())
    }
}

/// Builder for `PipelineConfig`
#[derive(Debug, Default)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    #[must_use]
    pub fn max_file_size(mut self, bytes: usize) -> Self {
        self.config.max_file_size = bytes;
        self
    }

    #[must_use]
    pub fn edge_bounds(mut self, min_edge_px: u32, max_edge_px: u32) -> Self {
        self.config.min_edge_px = min_edge_px;
        self.config.max_edge_px = max_edge_px;
        self
    }

    #[must_use]
    pub fn removal_mode(mut self, mode: RemovalMode) -> Self {
        self.config.removal_mode = mode;
        self
    }

    #[must_use]
    pub fn segmentation_cap(mut self, cap: u32) -> Self {
        self.config.segmentation_cap = cap;
        self
    }

    /// Build and validate the configuration
    ///
    /// # Errors
    /// See [`PipelineConfig::validate`].
    pub fn build(self) -> Result<PipelineConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Optional features a processor can offer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureFlags {
    pub background_removal: bool,
    pub quality_adjustment: bool,
    pub format_conversion: bool,
}

/// Read-only description of what a processor accepts and produces
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    pub supported_formats: Vec<String>,
    pub max_file_size: usize,
    pub min_edge_size: u32,
    pub max_edge_size: u32,
    pub features: FeatureFlags,
}

impl Capabilities {
    /// Describe a processor built from `config`
    #[must_use]
    pub fn from_config(config: &PipelineConfig, background_removal: bool) -> Self {
        Self {
            supported_formats: vec![
                OutputFormat::PhotographicLossy.to_string(),
                OutputFormat::ModernLossy.to_string(),
            ],
            max_file_size: config.max_file_size,
            min_edge_size: config.min_edge_px,
            max_edge_size: config.max_edge_px,
            features: FeatureFlags {
                background_removal,
                quality_adjustment: true,
                format_conversion: true,
            },
        }
    }
}
