//! Core types for listing pipeline operations

use crate::{
    config::OutputFormat,
    error::{ErrorKind, PipelineError, Result},
};
use chrono::{DateTime, Utc};
use image::{ImageBuffer, Luma, RgbaImage};
use serde::{Deserialize, Serialize};

/// Opaque job identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(uuid::Uuid);

impl JobId {
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle status of an image job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Whether the job reached a final state for the current run
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Processing)
                | (Self::Processing, Self::Completed | Self::Failed | Self::Cancelled)
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// A file entering a batch
#[derive(Debug, Clone)]
pub struct JobSubmission {
    pub name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl JobSubmission {
    #[must_use]
    pub fn new<N: Into<String>, M: Into<String>>(name: N, mime_type: M, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            bytes,
        }
    }
}

/// Per-stage timing breakdown for one processed image
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingTimings {
    pub validate_ms: u64,
    pub background_removal_ms: Option<u64>,
    pub resize_ms: u64,
    pub compress_ms: u64,
    pub strip_metadata_ms: u64,
    pub total_ms: u64,
}

/// Encoded output of a successful pipeline run
#[derive(Debug, Clone)]
pub struct ProcessedImage {
    /// Final encoded bytes
    pub bytes: Vec<u8>,
    /// Container of `bytes`
    pub format: OutputFormat,
    /// Output dimensions (width, height)
    pub dimensions: (u32, u32),
    /// Size of the submitted payload
    pub original_size: usize,
    /// Per-stage timings
    pub timings: ProcessingTimings,
    /// Soft validation issues carried from the validator
    pub warnings: Vec<String>,
}

impl ProcessedImage {
    #[must_use]
    pub fn processed_size(&self) -> usize {
        self.bytes.len()
    }

    #[must_use]
    pub fn mime_type(&self) -> &'static str {
        self.format.mime_type()
    }

    /// Output size relative to input size (0.25 means 75% smaller)
    #[must_use]
    pub fn compression_ratio(&self) -> f64 {
        if self.original_size == 0 {
            return 1.0;
        }
        self.bytes.len() as f64 / self.original_size as f64
    }
}

/// One file's progress through the pipeline
///
/// The job owns both its source and result buffers; dropping the job frees them.
#[derive(Debug, Clone)]
pub struct ImageJob {
    pub id: JobId,
    pub name: String,
    pub byte_size: usize,
    pub mime_type: String,
    status: JobStatus,
    source_bytes: Vec<u8>,
    result: Option<ProcessedImage>,
    error_detail: Option<String>,
    error_kind: Option<ErrorKind>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ImageJob {
    /// Create a pending job from a submission
    #[must_use]
    pub fn new(submission: JobSubmission) -> Self {
        Self {
            id: JobId::new(),
            byte_size: submission.bytes.len(),
            name: submission.name,
            mime_type: submission.mime_type,
            status: JobStatus::Pending,
            source_bytes: submission.bytes,
            result: None,
            error_detail: None,
            error_kind: None,
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    #[must_use]
    pub fn status(&self) -> JobStatus {
        self.status
    }

    #[must_use]
    pub fn source_bytes(&self) -> &[u8] {
        &self.source_bytes
    }

    /// Output of the last run, present only when Completed
    #[must_use]
    pub fn result(&self) -> Option<&ProcessedImage> {
        self.result.as_ref()
    }

    /// Display-safe failure description, present only when Failed
    #[must_use]
    pub fn error_detail(&self) -> Option<&str> {
        self.error_detail.as_deref()
    }

    /// Category of the failure, present only when Failed
    #[must_use]
    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error_kind
    }

    /// Take ownership of the result buffer, leaving the job Completed without it
    pub fn take_result(&mut self) -> Option<ProcessedImage> {
        self.result.take()
    }

    /// Reset the job to Pending so a later run processes it again
    ///
    /// # Errors
    /// Returns an error while the job is being processed.
    pub fn resubmit(&mut self) -> Result<()> {
        if self.status == JobStatus::Processing {
            return Err(PipelineError::invalid_options(format!(
                "Job '{}' is processing and cannot be resubmitted",
                self.name
            )));
        }
        self.status = JobStatus::Pending;
        self.result = None;
        self.error_detail = None;
        self.error_kind = None;
        self.finished_at = None;
        Ok(())
    }

    pub(crate) fn begin(&mut self) -> Result<()> {
        self.transition(JobStatus::Processing)
    }

    pub(crate) fn complete(&mut self, result: ProcessedImage) -> Result<()> {
        self.transition(JobStatus::Completed)?;
        self.result = Some(result);
        self.error_detail = None;
        self.error_kind = None;
        Ok(())
    }

    /// Record `error` with its display-safe message and kind
    pub(crate) fn fail(&mut self, error: &PipelineError) -> Result<()> {
        self.transition(JobStatus::Failed)?;
        self.result = None;
        self.error_detail = Some(error.user_message());
        self.error_kind = Some(error.kind());
        Ok(())
    }

    pub(crate) fn cancel(&mut self) -> Result<()> {
        self.transition(JobStatus::Cancelled)?;
        self.result = None;
        Ok(())
    }

    fn transition(&mut self, next: JobStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(PipelineError::stage_error(
                "queue",
                format!("illegal job transition {} -> {}", self.status, next),
            ));
        }
        self.status = next;
        if next.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        Ok(())
    }
}

/// Alpha mask produced by segmentation (0 = background, 255 = foreground)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentationMask {
    /// Mask data as grayscale values (0-255), row-major
    pub data: Vec<u8>,

    /// Mask dimensions (width, height)
    pub dimensions: (u32, u32),
}

impl SegmentationMask {
    /// Create a new segmentation mask
    #[must_use]
    pub fn new(data: Vec<u8>, dimensions: (u32, u32)) -> Self {
        Self { data, dimensions }
    }

    /// Create mask from a grayscale image
    #[must_use]
    pub fn from_image(image: &ImageBuffer<Luma<u8>, Vec<u8>>) -> Self {
        Self::new(image.as_raw().clone(), image.dimensions())
    }

    /// Use the alpha channel of a cutout as the mask
    #[must_use]
    pub fn from_alpha(cutout: &RgbaImage) -> Self {
        let data = cutout.pixels().map(|p| p[3]).collect();
        Self::new(data, cutout.dimensions())
    }

    /// Whether `data` holds exactly one value per pixel of `dimensions`
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        let (width, height) = self.dimensions;
        width > 0 && height > 0 && self.data.len() as u64 == u64::from(width) * u64::from(height)
    }

    /// Convert mask to a grayscale image
    ///
    /// # Errors
    /// Returns an error when the buffer length does not match the dimensions.
    pub fn to_image(&self) -> Result<ImageBuffer<Luma<u8>, Vec<u8>>> {
        let (width, height) = self.dimensions;
        ImageBuffer::from_raw(width, height, self.data.clone()).ok_or_else(|| {
            PipelineError::inference("Mask buffer does not match its dimensions")
        })
    }

    /// Resize the mask to new dimensions
    ///
    /// # Errors
    /// Returns an error when the mask buffer is malformed.
    pub fn resize(&self, new_width: u32, new_height: u32) -> Result<SegmentationMask> {
        if self.dimensions == (new_width, new_height) {
            return Ok(self.clone());
        }
        let current_image = self.to_image()?;
        let resized = image::imageops::resize(
            &current_image,
            new_width,
            new_height,
            image::imageops::FilterType::Triangle,
        );

        Ok(SegmentationMask::from_image(&resized))
    }

    /// Composite the mask onto an RGBA image, keeping pixels where the mask is opaque
    ///
    /// Destination-in: the resulting alpha is `image_alpha * mask / 255`, colour
    /// channels are untouched.
    ///
    /// # Errors
    /// Returns an error when image and mask dimensions differ or the mask
    /// buffer does not cover every pixel.
    pub fn apply_to_image(&self, image: &mut RgbaImage) -> Result<()> {
        if image.dimensions() != self.dimensions {
            return Err(PipelineError::inference(format!(
                "Image ({}x{}) and mask ({}x{}) dimensions do not match",
                image.width(),
                image.height(),
                self.dimensions.0,
                self.dimensions.1
            )));
        }
        if !self.is_well_formed() {
            return Err(PipelineError::inference(format!(
                "Mask holds {} values for {}x{} pixels",
                self.data.len(),
                self.dimensions.0,
                self.dimensions.1
            )));
        }

        for (pixel, &mask_value) in image.pixels_mut().zip(self.data.iter()) {
            let alpha = u16::from(pixel[3]) * u16::from(mask_value) / 255;
            pixel[3] = alpha as u8;
        }

        Ok(())
    }

    /// Fraction of pixels considered foreground (> 127)
    #[must_use]
    pub fn foreground_ratio(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        let foreground = self.data.iter().filter(|&&x| x > 127).count();
        foreground as f32 / self.data.len() as f32
    }
}
