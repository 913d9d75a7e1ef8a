//! Tensor preparation for segmentation models
//!
//! Images are letterboxed into a square canvas, normalized into an NCHW
//! tensor, and the model output is mapped back through the same letterbox.

use crate::{
    error::{PipelineError, Result},
    types::SegmentationMask,
};
use image::{DynamicImage, ImageBuffer, RgbImage};
use ndarray::Array4;
use serde::{Deserialize, Serialize};

/// Model input requirements
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreprocessingConfig {
    /// Square input edge expected by the model
    pub target_size: u32,
    /// Per-channel mean subtracted after scaling to 0-1
    pub normalization_mean: [f32; 3],
    /// Per-channel standard deviation divided after mean subtraction
    pub normalization_std: [f32; 3],
    /// Canvas colour around the letterboxed image
    pub padding_color: [u8; 3],
}

impl Default for PreprocessingConfig {
    fn default() -> Self {
        // ImageNet statistics, 1024 px square input
        Self {
            target_size: 1024,
            normalization_mean: [0.485, 0.456, 0.406],
            normalization_std: [0.229, 0.224, 0.225],
            padding_color: [255, 255, 255],
        }
    }
}

/// Placement of the original image inside the square model canvas
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    /// Scale factor applied to the original image
    pub scale: f32,
    /// Horizontal padding before the image
    pub offset_x: u32,
    /// Vertical padding before the image
    pub offset_y: u32,
    /// Canvas edge
    pub target_size: u32,
}

impl Letterbox {
    /// Compute the letterbox for `dimensions` inside a `target_size` square
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    #[must_use]
    pub fn fit(dimensions: (u32, u32), target_size: u32) -> Self {
        let (width, height) = dimensions;
        let target = target_size as f32;
        let scale = (target / width.max(1) as f32).min(target / height.max(1) as f32);

        let (scaled_width, scaled_height) = Self::scaled(dimensions, scale, target_size);
        Self {
            scale,
            offset_x: (target_size - scaled_width) / 2,
            offset_y: (target_size - scaled_height) / 2,
            target_size,
        }
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn scaled(dimensions: (u32, u32), scale: f32, target_size: u32) -> (u32, u32) {
        let w = ((dimensions.0 as f32 * scale).round() as u32).clamp(1, target_size);
        let h = ((dimensions.1 as f32 * scale).round() as u32).clamp(1, target_size);
        (w, h)
    }

    /// Map a model output tensor (1x1xHxW, values 0-1) to a mask at `dimensions`
    ///
    /// # Errors
    /// Returns an error for tensors that are not single-channel 4D outputs.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn tensor_to_mask(
        &self,
        tensor: &Array4<f32>,
        dimensions: (u32, u32),
    ) -> Result<SegmentationMask> {
        let shape = tensor.shape();
        if shape[0] != 1 || shape[1] != 1 {
            return Err(PipelineError::inference(format!(
                "Invalid output tensor shape: {shape:?}"
            )));
        }
        let mask_height = shape[2] as u32;
        let mask_width = shape[3] as u32;

        let (width, height) = dimensions;
        let mut data = Vec::with_capacity((width as usize) * (height as usize));
        for y in 0..height {
            for x in 0..width {
                let tensor_x = (x as f32 * self.scale).round() as u32 + self.offset_x;
                let tensor_y = (y as f32 * self.scale).round() as u32 + self.offset_y;

                let value = if tensor_x < mask_width && tensor_y < mask_height {
                    tensor
                        .get([0, 0, tensor_y as usize, tensor_x as usize])
                        .copied()
                        .unwrap_or(0.0)
                } else {
                    0.0
                };
                data.push((value.clamp(0.0, 1.0) * 255.0).round() as u8);
            }
        }

        Ok(SegmentationMask::new(data, dimensions))
    }
}

/// Image to tensor conversion
pub struct ImagePreprocessor;

impl ImagePreprocessor {
    /// Letterbox and normalize `image` into a 1x3xSxS tensor
    ///
    /// # Errors
    /// Returns an error for a zero-sized target.
    pub fn preprocess(
        image: &DynamicImage,
        config: &PreprocessingConfig,
    ) -> Result<(Array4<f32>, Letterbox)> {
        if config.target_size == 0 {
            return Err(PipelineError::model("Model input size must be positive"));
        }

        let rgb = image.to_rgb8();
        let letterbox = Letterbox::fit(rgb.dimensions(), config.target_size);
        let (new_width, new_height) =
            Letterbox::scaled(rgb.dimensions(), letterbox.scale, config.target_size);

        let resized = image::imageops::resize(
            &rgb,
            new_width,
            new_height,
            image::imageops::FilterType::Triangle,
        );

        let padding = config.padding_color;
        let mut canvas: RgbImage = ImageBuffer::from_pixel(
            config.target_size,
            config.target_size,
            image::Rgb(padding),
        );
        image::imageops::replace(
            &mut canvas,
            &resized,
            i64::from(letterbox.offset_x),
            i64::from(letterbox.offset_y),
        );

        Ok((Self::canvas_to_tensor(&canvas, config), letterbox))
    }

    fn canvas_to_tensor(canvas: &RgbImage, config: &PreprocessingConfig) -> Array4<f32> {
        let size = config.target_size as usize;
        let mut tensor = Array4::<f32>::zeros((1, 3, size, size));

        for (x, y, pixel) in canvas.enumerate_pixels() {
            for channel in 0..3 {
                let value = (f32::from(pixel[channel]) / 255.0
                    - config.normalization_mean[channel])
                    / config.normalization_std[channel];
                tensor[[0, channel, y as usize, x as usize]] = value;
            }
        }

        tensor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn small_config() -> PreprocessingConfig {
        PreprocessingConfig {
            target_size: 32,
            ..PreprocessingConfig::default()
        }
    }

    #[test]
    fn test_letterbox_landscape() {
        let letterbox = Letterbox::fit((200, 100), 32);
        assert!((letterbox.scale - 0.16).abs() < 1e-6);
        assert_eq!(letterbox.offset_x, 0);
        assert_eq!(letterbox.offset_y, 8);
    }

    #[test]
    fn test_preprocess_shape_and_padding() {
        let image = DynamicImage::ImageRgb8(ImageBuffer::from_pixel(64, 32, Rgb([255, 0, 0])));
        let config = small_config();
        let (tensor, letterbox) = ImagePreprocessor::preprocess(&image, &config).unwrap();

        assert_eq!(tensor.shape(), &[1, 3, 32, 32]);
        assert_eq!(letterbox.offset_y, 8);

        // Red channel inside the image, white padding above it
        let red_inside = (1.0 - 0.485) / 0.229;
        assert!((tensor[[0, 0, 16, 16]] - red_inside).abs() < 1e-4);
        let green_padding = (1.0 - 0.456) / 0.224;
        assert!((tensor[[0, 1, 0, 16]] - green_padding).abs() < 1e-4);
    }

    #[test]
    fn test_tensor_to_mask_maps_back_through_letterbox() {
        let letterbox = Letterbox::fit((64, 32), 32);
        let mut tensor = Array4::<f32>::zeros((1, 1, 32, 32));
        // Foreground in the left half of the letterboxed content
        for y in 8..24 {
            for x in 0..16 {
                tensor[[0, 0, y, x]] = 1.0;
            }
        }

        let mask = letterbox.tensor_to_mask(&tensor, (64, 32)).unwrap();
        assert_eq!(mask.dimensions, (64, 32));
        assert_eq!(mask.data[0], 255);
        assert_eq!(mask.data[63], 0);
    }

    #[test]
    fn test_tensor_to_mask_rejects_multichannel() {
        let letterbox = Letterbox::fit((10, 10), 8);
        let tensor = Array4::<f32>::zeros((1, 3, 8, 8));
        assert!(letterbox.tensor_to_mask(&tensor, (10, 10)).is_err());
    }

    #[test]
    fn test_zero_target_rejected() {
        let image = DynamicImage::ImageRgb8(RgbImage::new(4, 4));
        let config = PreprocessingConfig {
            target_size: 0,
            ..PreprocessingConfig::default()
        };
        assert!(ImagePreprocessor::preprocess(&image, &config).is_err());
    }
}
