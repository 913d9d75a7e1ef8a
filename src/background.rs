//! Background removal stage
//!
//! Wraps a [`Segmenter`] with the two removal strategies. In optimized mode
//! large images are segmented at a reduced working size and the mask is
//! scaled back up, which keeps inference cost bounded regardless of input
//! resolution.

use crate::{
    config::{PipelineConfig, RemovalMode},
    error::{PipelineError, Result},
    inference::Segmenter,
    processor::run_blocking,
    services::{progress::ProcessingStage, resize::fit_within},
    types::SegmentationMask,
};
use image::{imageops::FilterType, DynamicImage, GenericImageView, RgbaImage};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Stage-local progress checkpoints (fractions of the removal stage)
const DECODED: f32 = 0.10;
const DOWNSCALED: f32 = 0.25;
const SEGMENT_START: f32 = 0.40;
const SEGMENT_END: f32 = 0.80;
const COMPOSITED: f32 = 0.90;

const STAGE: ProcessingStage = ProcessingStage::RemoveBackground;

/// Background remover over a segmentation backend
#[derive(Clone)]
pub struct BackgroundRemover {
    segmenter: Arc<dyn Segmenter>,
    mode: RemovalMode,
    segmentation_cap: u32,
}

impl std::fmt::Debug for BackgroundRemover {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundRemover")
            .field("segmenter", &self.segmenter.name())
            .field("mode", &self.mode)
            .field("segmentation_cap", &self.segmentation_cap)
            .finish()
    }
}

impl BackgroundRemover {
    #[must_use]
    pub fn new(segmenter: Arc<dyn Segmenter>, mode: RemovalMode, segmentation_cap: u32) -> Self {
        Self {
            segmenter,
            mode,
            segmentation_cap,
        }
    }

    /// Create a remover using the mode and cap from `config`
    #[must_use]
    pub fn from_config(segmenter: Arc<dyn Segmenter>, config: &PipelineConfig) -> Self {
        Self::new(segmenter, config.removal_mode, config.segmentation_cap)
    }

    #[must_use]
    pub fn mode(&self) -> RemovalMode {
        self.mode
    }

    /// Name of the underlying segmentation backend
    #[must_use]
    pub fn backend_name(&self) -> &'static str {
        self.segmenter.name()
    }

    /// Cut the subject out of `image`
    ///
    /// `progress` receives stage-local fractions (0.0-1.0). Cancellation is
    /// checked between steps and aborts an in-flight segmentation.
    ///
    /// # Errors
    /// - `Cancelled` when `cancel` fires
    /// - `QuotaExceeded` / `Unauthorized` passed through from remote backends
    /// - `BackgroundRemovalFailed` for any other segmentation failure
    pub async fn remove(
        &self,
        image: DynamicImage,
        cancel: &CancellationToken,
        progress: &(dyn Fn(f32) + Send + Sync),
    ) -> Result<DynamicImage> {
        let span = tracing::debug_span!(
            "remove_background",
            backend = self.segmenter.name(),
            mode = ?self.mode
        );
        self.run(image, cancel, progress)
            .instrument(span)
            .await
            .map_err(|e| self.classify(e))
    }

    async fn run(
        &self,
        image: DynamicImage,
        cancel: &CancellationToken,
        progress: &(dyn Fn(f32) + Send + Sync),
    ) -> Result<DynamicImage> {
        // 1. decode / convert
        let original = run_blocking(STAGE, move || Ok(image.to_rgba8())).await?;
        let dimensions = original.dimensions();
        progress(DECODED);
        ensure_active(cancel)?;

        // 2. downscale to the working size
        let working = match self.working_dimensions(dimensions) {
            Some((width, height)) => {
                tracing::debug!(
                    from = ?dimensions,
                    to = ?(width, height),
                    "Downscaling for segmentation"
                );
                let source = original.clone();
                Some(
                    run_blocking(STAGE, move || {
                        Ok(DynamicImage::ImageRgba8(image::imageops::resize(
                            &source,
                            width,
                            height,
                            FilterType::Triangle,
                        )))
                    })
                    .await?,
                )
            },
            None => None,
        };
        progress(DOWNSCALED);
        ensure_active(cancel)?;

        // 3. segment
        let input = match working {
            Some(image) => image,
            None => DynamicImage::ImageRgba8(original.clone()),
        };
        let mask = self.segment(&input, cancel, progress).await?;
        drop(input);
        progress(SEGMENT_END);
        ensure_active(cancel)?;

        // 4. upscale mask and composite
        let cutout = run_blocking(STAGE, move || composite(original, &mask)).await?;
        progress(COMPOSITED);
        ensure_active(cancel)?;

        // 5. done
        progress(1.0);
        Ok(DynamicImage::ImageRgba8(cutout))
    }

    /// Working size when the image must be downscaled before segmentation
    fn working_dimensions(&self, dimensions: (u32, u32)) -> Option<(u32, u32)> {
        match self.mode {
            RemovalMode::Standard => None,
            RemovalMode::Optimized => {
                let target = fit_within(dimensions, self.segmentation_cap);
                (target != dimensions).then_some(target)
            },
        }
    }

    async fn segment(
        &self,
        input: &DynamicImage,
        cancel: &CancellationToken,
        progress: &(dyn Fn(f32) + Send + Sync),
    ) -> Result<SegmentationMask> {
        let span = SEGMENT_END - SEGMENT_START;
        let scaled = |fraction: f32| {
            let fraction = if fraction.is_finite() {
                fraction.clamp(0.0, 1.0)
            } else {
                0.0
            };
            progress(SEGMENT_START + span * fraction);
        };
        scaled(0.0);

        let mask = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(PipelineError::Cancelled),
            mask = self.segmenter.segment(input, &scaled) => mask?,
        };

        if mask.data.is_empty() {
            return Err(PipelineError::inference("Segmentation returned an empty mask"));
        }
        if !mask.is_well_formed() {
            let (width, height) = mask.dimensions;
            return Err(PipelineError::inference(format!(
                "Segmentation returned {} mask values for {width}x{height} pixels",
                mask.data.len()
            )));
        }
        Ok(mask)
    }

    /// Keep the error kinds callers must distinguish, collapse the rest
    fn classify(&self, error: PipelineError) -> PipelineError {
        match error {
            PipelineError::Cancelled
            | PipelineError::QuotaExceeded(_)
            | PipelineError::Unauthorized(_)
            | PipelineError::BackgroundRemovalFailed(_) => error,
            other => {
                tracing::warn!(
                    backend = self.segmenter.name(),
                    error = %other,
                    "Segmentation failed"
                );
                PipelineError::background_removal(format!(
                    "the {} segmentation backend could not isolate the subject",
                    self.segmenter.name()
                ))
            },
        }
    }
}

fn ensure_active(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(PipelineError::Cancelled);
    }
    Ok(())
}

/// Scale `mask` to the original resolution and apply it destination-in
fn composite(mut original: RgbaImage, mask: &SegmentationMask) -> Result<RgbaImage> {
    let (width, height) = original.dimensions();
    if mask.dimensions == (width, height) {
        mask.apply_to_image(&mut original)?;
    } else {
        mask.resize(width, height)?.apply_to_image(&mut original)?;
    }
    Ok(original)
}
