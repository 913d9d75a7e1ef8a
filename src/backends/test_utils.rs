//! Test utilities and mock segmenters
//!
//! Mocks produce deterministic masks without model files so background
//! removal can be exercised in unit tests.

use crate::{
    error::{PipelineError, Result},
    inference::{SegmentationProgress, Segmenter},
    types::SegmentationMask,
};
use async_trait::async_trait;
use image::{DynamicImage, GenericImageView};
use std::sync::{Arc, Mutex};

/// Mock segmenter returning a centred elliptical mask
#[derive(Debug, Clone)]
pub struct MockSegmenter {
    /// Dimensions of every image passed to `segment`
    call_history: Arc<Mutex<Vec<(u32, u32)>>>,
    /// Error returned instead of a mask
    failure: Option<fn() -> PipelineError>,
    /// Return a mask of the wrong size
    wrong_size: bool,
    /// Return a mask whose data covers only the first row
    truncated: bool,
}

impl MockSegmenter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            call_history: Arc::new(Mutex::new(Vec::new())),
            failure: None,
            wrong_size: false,
            truncated: false,
        }
    }

    /// Create a mock that fails every call with `failure()`
    #[must_use]
    pub fn failing(failure: fn() -> PipelineError) -> Self {
        Self {
            failure: Some(failure),
            ..Self::new()
        }
    }

    /// Create a mock whose masks do not match the input dimensions
    #[must_use]
    pub fn wrong_size() -> Self {
        Self {
            wrong_size: true,
            ..Self::new()
        }
    }

    /// Create a mock whose masks claim the input dimensions but hold one row
    #[must_use]
    pub fn truncated() -> Self {
        Self {
            truncated: true,
            ..Self::new()
        }
    }

    /// Dimensions of the images segmented so far
    pub fn get_call_history(&self) -> Vec<(u32, u32)> {
        self.call_history.lock().unwrap().clone()
    }

    /// Elliptical foreground filling the middle of the frame
    pub fn ellipse_mask(width: u32, height: u32) -> SegmentationMask {
        let cx = width as f32 / 2.0;
        let cy = height as f32 / 2.0;
        let rx = (width as f32 / 3.0).max(1.0);
        let ry = (height as f32 / 3.0).max(1.0);

        let mut data = Vec::with_capacity((width * height) as usize);
        for y in 0..height {
            for x in 0..width {
                let dx = (x as f32 + 0.5 - cx) / rx;
                let dy = (y as f32 + 0.5 - cy) / ry;
                data.push(if dx * dx + dy * dy <= 1.0 { 255 } else { 0 });
            }
        }
        SegmentationMask::new(data, (width, height))
    }
}

impl Default for MockSegmenter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Segmenter for MockSegmenter {
    async fn segment(
        &self,
        image: &DynamicImage,
        progress: SegmentationProgress<'_>,
    ) -> Result<SegmentationMask> {
        let (width, height) = image.dimensions();
        self.call_history.lock().unwrap().push((width, height));

        if let Some(failure) = self.failure {
            return Err(failure());
        }

        progress(0.0);
        progress(0.5);
        let mask = if self.wrong_size {
            Self::ellipse_mask(width + 1, height)
        } else if self.truncated {
            SegmentationMask::new(vec![0; width as usize], (width, height))
        } else {
            Self::ellipse_mask(width, height)
        };
        progress(1.0);
        Ok(mask)
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::ignore_progress;
    use image::RgbImage;

    #[tokio::test]
    async fn test_mock_segmenter_records_calls() {
        let segmenter = MockSegmenter::new();
        let image = DynamicImage::ImageRgb8(RgbImage::new(30, 20));

        let mask = segmenter.segment(&image, &ignore_progress).await.unwrap();
        assert_eq!(mask.dimensions, (30, 20));
        assert_eq!(mask.data[(10 * 30 + 15) as usize], 255);
        assert_eq!(mask.data[0], 0);
        assert_eq!(segmenter.get_call_history(), vec![(30, 20)]);
    }

    #[tokio::test]
    async fn test_failing_mock() {
        let segmenter = MockSegmenter::failing(|| PipelineError::inference("model crashed"));
        let image = DynamicImage::ImageRgb8(RgbImage::new(4, 4));
        assert!(segmenter.segment(&image, &ignore_progress).await.is_err());
    }
}
