//! Output encoding service
//!
//! Encodes decoded pixels into one of the supported containers. Encoder
//! failures always surface as errors; an empty buffer is never returned.

use crate::{
    config::{quality_percent, OutputFormat},
    error::{PipelineError, Result},
    services::progress::ProcessingStage,
};
use image::{codecs::jpeg::JpegEncoder, DynamicImage, ImageFormat, RgbImage};
use std::io::Cursor;

/// Service for encoding images into output containers
pub struct ImageEncoder;

impl ImageEncoder {
    /// Encode `image` as `format` with a quality factor in (0, 1]
    ///
    /// # Errors
    /// Returns `PipelineError::Internal` (stage `compress`) when the encoder
    /// rejects the input or produces no data.
    pub fn encode(image: &DynamicImage, format: OutputFormat, quality: f32) -> Result<Vec<u8>> {
        let bytes = match format {
            OutputFormat::PhotographicLossy => Self::encode_jpeg(image, quality),
            OutputFormat::ModernLossy => Self::encode_webp(image, quality),
        }
        .map_err(|e| Self::attribute(e, ProcessingStage::Compress))?;

        Self::ensure_not_empty(bytes, ProcessingStage::Compress)
    }

    /// Encode into an arbitrary supported container (JPEG, WebP or PNG)
    ///
    /// PNG is lossless and ignores `quality`.
    ///
    /// # Errors
    /// Returns an error for unsupported containers or encoder failures.
    pub fn encode_container(
        image: &DynamicImage,
        container: ImageFormat,
        quality: f32,
    ) -> Result<Vec<u8>> {
        match container {
            ImageFormat::Jpeg => Self::encode_jpeg(image, quality),
            ImageFormat::WebP => Self::encode_webp(image, quality),
            ImageFormat::Png => Self::encode_png(image),
            other => Err(PipelineError::validation(format!(
                "Unsupported container: {other:?}"
            ))),
        }
    }

    /// Encode as PNG, keeping any alpha channel
    ///
    /// # Errors
    /// Returns an error when the PNG encoder fails.
    pub fn encode_png(image: &DynamicImage) -> Result<Vec<u8>> {
        let mut buffer = Cursor::new(Vec::new());
        image
            .write_to(&mut buffer, ImageFormat::Png)
            .map_err(|e| PipelineError::inference(format!("PNG encoding failed: {e}")))?;
        Ok(buffer.into_inner())
    }

    fn encode_jpeg(image: &DynamicImage, quality: f32) -> Result<Vec<u8>> {
        let rgb = flatten_onto_white(image);
        let mut buffer = Vec::new();
        let mut encoder = JpegEncoder::new_with_quality(&mut buffer, quality_percent(quality));
        encoder
            .encode_image(&rgb)
            .map_err(|e| PipelineError::inference(format!("JPEG encoding failed: {e}")))?;
        Ok(buffer)
    }

    fn encode_webp(image: &DynamicImage, quality: f32) -> Result<Vec<u8>> {
        let webp_quality = (quality * 100.0).clamp(0.0, 100.0);
        let memory = if image.color().has_alpha() {
            let rgba = image.to_rgba8();
            webp::Encoder::from_rgba(rgba.as_raw(), rgba.width(), rgba.height())
                .encode_simple(false, webp_quality)
        } else {
            let rgb = image.to_rgb8();
            webp::Encoder::from_rgb(rgb.as_raw(), rgb.width(), rgb.height())
                .encode_simple(false, webp_quality)
        }
        .map_err(|e| PipelineError::inference(format!("WebP encoding failed: {e:?}")))?;

        Ok(memory.to_vec())
    }

    fn attribute(error: PipelineError, stage: ProcessingStage) -> PipelineError {
        match error {
            PipelineError::Inference(message) => PipelineError::stage_error(stage, message),
            other => other,
        }
    }

    pub(crate) fn ensure_not_empty(bytes: Vec<u8>, stage: ProcessingStage) -> Result<Vec<u8>> {
        if bytes.is_empty() {
            return Err(PipelineError::stage_error(
                stage,
                "encoder produced an empty buffer",
            ));
        }
        Ok(bytes)
    }
}

/// Drop the alpha channel by compositing over a white background
#[must_use]
pub fn flatten_onto_white(image: &DynamicImage) -> RgbImage {
    if !image.color().has_alpha() {
        return image.to_rgb8();
    }

    let rgba = image.to_rgba8();
    let mut rgb = RgbImage::new(rgba.width(), rgba.height());
    for (src, dst) in rgba.pixels().zip(rgb.pixels_mut()) {
        let alpha = u32::from(src[3]);
        for channel in 0..3 {
            let value = (u32::from(src[channel]) * alpha + 255 * (255 - alpha) + 127) / 255;
            dst[channel] = value as u8;
        }
    }
    rgb
}
