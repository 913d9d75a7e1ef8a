//! Segmentation backend abstraction

use crate::{error::Result, types::SegmentationMask};
use async_trait::async_trait;
use image::DynamicImage;

/// Callback receiving segmentation progress as a 0.0-1.0 fraction
pub type SegmentationProgress<'a> = &'a (dyn Fn(f32) + Send + Sync);

/// Trait for foreground segmentation backends
///
/// Implementations return an alpha mask with the same dimensions as the input
/// image: 255 marks the subject, 0 the background.
#[async_trait]
pub trait Segmenter: Send + Sync {
    /// Segment `image` into a foreground mask
    ///
    /// # Errors
    /// - Model or inference failures
    /// - `Cancelled`, `QuotaExceeded` or `Unauthorized` from remote backends
    async fn segment(
        &self,
        image: &DynamicImage,
        progress: SegmentationProgress<'_>,
    ) -> Result<SegmentationMask>;

    /// Short backend identifier used in logs
    fn name(&self) -> &'static str;
}

/// Progress callback that discards updates
pub fn ignore_progress(_fraction: f32) {}
