//! Metadata removal
//!
//! The encoders in this crate never copy ancillary blocks, so decoding to raw
//! pixels and re-encoding drops EXIF, ICC, XMP and text chunks.

use crate::{
    error::{PipelineError, Result},
    services::{encoding::ImageEncoder, progress::ProcessingStage, validation::detect_format},
};
use image::{DynamicImage, GenericImageView, ImageBuffer, ImageFormat};

/// Stripper that redraws encoded images without their metadata
pub struct MetadataStripper;

impl MetadataStripper {
    /// Re-encode `bytes` in its own container with no metadata blocks
    ///
    /// # Errors
    /// - Unrecognized container signature
    /// - Decoding or re-encoding failure
    pub fn strip(bytes: &[u8], quality: f32) -> Result<Vec<u8>> {
        let container = detect_format(bytes).ok_or_else(|| {
            PipelineError::stage_error(
                ProcessingStage::StripMetadata,
                "unrecognized container signature",
            )
        })?;

        let decoded = image::load_from_memory_with_format(bytes, container).map_err(|e| {
            PipelineError::stage_error(ProcessingStage::StripMetadata, format!("decode: {e}"))
        })?;

        let redrawn = redraw(&decoded)?;
        let encoded = ImageEncoder::encode_container(&redrawn, container, quality).map_err(|e| {
            PipelineError::stage_error(ProcessingStage::StripMetadata, e.to_string())
        })?;

        ImageEncoder::ensure_not_empty(encoded, ProcessingStage::StripMetadata)
    }

    /// Container that [`MetadataStripper::strip`] would write for `bytes`
    #[must_use]
    pub fn container_of(bytes: &[u8]) -> Option<ImageFormat> {
        detect_format(bytes)
    }
}

/// Copy pixels onto a fresh surface of identical dimensions
fn redraw(image: &DynamicImage) -> Result<DynamicImage> {
    let (width, height) = image.dimensions();
    if image.color().has_alpha() {
        let pixels = image.to_rgba8().into_raw();
        ImageBuffer::from_raw(width, height, pixels)
            .map(DynamicImage::ImageRgba8)
            .ok_or_else(|| {
                PipelineError::stage_error(ProcessingStage::StripMetadata, "surface size mismatch")
            })
    } else {
        let pixels = image.to_rgb8().into_raw();
        ImageBuffer::from_raw(width, height, pixels)
            .map(DynamicImage::ImageRgb8)
            .ok_or_else(|| {
                PipelineError::stage_error(ProcessingStage::StripMetadata, "surface size mismatch")
            })
    }
}
