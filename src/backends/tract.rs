//! Tract segmentation backend
//!
//! Runs an ONNX segmentation model (single RGB input, single-channel mask
//! output) with Tract, a pure Rust inference engine. Inference happens on the
//! blocking thread pool.

use crate::{
    error::{PipelineError, Result},
    inference::{SegmentationProgress, Segmenter},
    types::SegmentationMask,
    utils::preprocessing::{ImagePreprocessor, PreprocessingConfig},
};
use async_trait::async_trait;
use image::{DynamicImage, GenericImageView};
use instant::Instant;
use ndarray::Array4;
use std::{path::Path, sync::Arc};
use tract_onnx::prelude::*;

/// Type alias for the complex Tract model type to reduce complexity warnings
type TractModel = RunnableModel<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Segmenter backed by a Tract-optimized ONNX model
#[derive(Clone)]
pub struct TractSegmenter {
    model: Arc<TractModel>,
    preprocessing: PreprocessingConfig,
}

impl std::fmt::Debug for TractSegmenter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TractSegmenter")
            .field("preprocessing", &self.preprocessing)
            .finish_non_exhaustive()
    }
}

impl TractSegmenter {
    /// Load a model from an ONNX file
    ///
    /// # Errors
    /// - File cannot be read
    /// - Model cannot be parsed or optimized
    pub fn from_file<P: AsRef<Path>>(path: P, preprocessing: PreprocessingConfig) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| {
            PipelineError::model(format!("Failed to read model {}: {e}", path.display()))
        })?;
        Self::from_bytes(&bytes, preprocessing)
    }

    /// Load a model from in-memory ONNX bytes
    ///
    /// # Errors
    /// Returns `PipelineError::Model` when parsing or optimization fails.
    pub fn from_bytes(model_data: &[u8], preprocessing: PreprocessingConfig) -> Result<Self> {
        let load_start = Instant::now();
        let size = preprocessing.target_size as usize;

        log::info!("🚀 Initializing Tract segmenter");
        #[allow(clippy::cast_precision_loss)]
        let size_mb = model_data.len() as f64 / (1024.0 * 1024.0);
        log::info!("📏 Model size: {size_mb:.2} MB, input {size}x{size}");

        let model = onnx()
            .model_for_read(&mut std::io::Cursor::new(model_data))
            .map_err(|e| PipelineError::model(format!("Failed to load ONNX model: {e}")))?
            .with_input_fact(0, f32::fact([1, 3, size, size]).into())
            .map_err(|e| PipelineError::model(format!("Failed to set input shape: {e}")))?
            .into_optimized()
            .map_err(|e| PipelineError::model(format!("Failed to optimize model: {e}")))?
            .into_runnable()
            .map_err(|e| PipelineError::model(format!("Failed to create runnable model: {e}")))?;

        log::info!(
            "✅ Tract segmenter ready in {}ms",
            load_start.elapsed().as_millis()
        );

        Ok(Self {
            model: Arc::new(model),
            preprocessing,
        })
    }

    /// Preprocessing applied before inference
    #[must_use]
    pub fn preprocessing(&self) -> &PreprocessingConfig {
        &self.preprocessing
    }

    fn infer(model: &TractModel, input: Array4<f32>) -> Result<Array4<f32>> {
        log::debug!("🔮 Running Tract inference on {:?}", input.shape());
        let inference_start = Instant::now();

        let outputs = model
            .run(tvec![Tensor::from(input).into()])
            .map_err(|e| PipelineError::inference(format!("Tract inference failed: {e}")))?;

        let output = outputs
            .into_iter()
            .next()
            .ok_or_else(|| PipelineError::inference("No output tensor found"))?
            .into_arc_tensor();

        let view = output.to_array_view::<f32>().map_err(|e| {
            PipelineError::inference(format!("Failed to convert output tensor: {e}"))
        })?;

        let shape = view.shape().to_vec();
        // Some models emit 1xHxW; lift to 1x1xHxW
        let array = match shape.as_slice() {
            [n, c, h, w] => view
                .to_owned()
                .into_shape_with_order((*n, *c, *h, *w))
                .map_err(|e| PipelineError::inference(format!("Bad output tensor: {e}")))?,
            [n, h, w] => view
                .to_owned()
                .into_shape_with_order((*n, 1, *h, *w))
                .map_err(|e| PipelineError::inference(format!("Bad output tensor: {e}")))?,
            other => {
                return Err(PipelineError::inference(format!(
                    "Expected 3D or 4D output tensor, got {}D",
                    other.len()
                )))
            },
        };

        log::debug!(
            "✅ Tract inference completed in {}ms",
            inference_start.elapsed().as_millis()
        );
        Ok(array)
    }
}

#[async_trait]
impl Segmenter for TractSegmenter {
    async fn segment(
        &self,
        image: &DynamicImage,
        progress: SegmentationProgress<'_>,
    ) -> Result<SegmentationMask> {
        let dimensions = image.dimensions();
        let (tensor, letterbox) = ImagePreprocessor::preprocess(image, &self.preprocessing)?;
        progress(0.2);

        let model = Arc::clone(&self.model);
        let output = tokio::task::spawn_blocking(move || Self::infer(&model, tensor))
            .await
            .map_err(|e| PipelineError::inference(format!("Inference task failed: {e}")))??;
        progress(0.9);

        let mask = letterbox.tensor_to_mask(&output, dimensions)?;
        progress(1.0);
        Ok(mask)
    }

    fn name(&self) -> &'static str {
        "tract"
    }
}
