//! Remote segmentation backend
//!
//! Delegates segmentation to a remote processing service and recovers the
//! mask from the alpha channel of the returned WebP cutout.

use crate::{
    config::{OutputFormat, ProcessingOptions, MAX_EDGE_PX, MIN_EDGE_PX},
    error::{PipelineError, Result},
    inference::{SegmentationProgress, Segmenter},
    remote::RemoteDelegate,
    services::encoding::ImageEncoder,
    types::SegmentationMask,
};
use async_trait::async_trait;
use image::{DynamicImage, GenericImageView};
use tokio_util::sync::CancellationToken;

/// Segmenter that runs background removal on a remote service
#[derive(Debug, Clone)]
pub struct RemoteSegmenter {
    delegate: RemoteDelegate,
}

impl RemoteSegmenter {
    #[must_use]
    pub fn new(delegate: RemoteDelegate) -> Self {
        Self { delegate }
    }

    /// Options asking for a full-quality transparent cutout of `dimensions`
    fn cutout_options(dimensions: (u32, u32)) -> ProcessingOptions {
        ProcessingOptions {
            max_edge_px: dimensions.0.max(dimensions.1).clamp(MIN_EDGE_PX, MAX_EDGE_PX),
            format: OutputFormat::ModernLossy,
            quality: 1.0,
            remove_background: true,
        }
    }
}

#[async_trait]
impl Segmenter for RemoteSegmenter {
    async fn segment(
        &self,
        image: &DynamicImage,
        progress: SegmentationProgress<'_>,
    ) -> Result<SegmentationMask> {
        let dimensions = image.dimensions();
        let payload = ImageEncoder::encode_png(image)?;
        progress(0.1);

        // Cancellation is handled by the caller dropping this future
        let result = self
            .delegate
            .process(
                payload,
                "segment.png",
                &Self::cutout_options(dimensions),
                &CancellationToken::new(),
            )
            .await?;
        progress(0.8);

        let cutout = image::load_from_memory(&result.bytes).map_err(|e| {
            PipelineError::inference(format!("Remote cutout could not be decoded: {e}"))
        })?;
        let mask = SegmentationMask::from_alpha(&cutout.to_rgba8());
        let mask = mask.resize(dimensions.0, dimensions.1)?;
        progress(1.0);
        Ok(mask)
    }

    fn name(&self) -> &'static str {
        "remote"
    }
}
