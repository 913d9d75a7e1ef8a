//! Pipeline processor
//!
//! Runs one image through Validate → RemoveBackground (optional) → Resize →
//! Compress → StripMetadata. Pixel work happens on tokio's blocking pool;
//! between stages the processor yields, honours pause and checks for
//! cancellation.

use crate::{
    background::BackgroundRemover,
    config::{Capabilities, PipelineConfig, ProcessingOptions},
    error::{PipelineError, Result},
    inference::Segmenter,
    services::{
        ImageEncoder, ImageResizer, ImageValidator, MetadataStripper, NoOpProgressReporter,
        ProcessingStage, ProgressReporter, ProgressTracker,
    },
    types::{ProcessedImage, ProcessingTimings},
};
use image::{DynamicImage, GenericImageView};
use instant::Instant;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Final state of one pipeline run
#[derive(Debug)]
pub enum PipelineOutcome {
    /// All stages succeeded
    Completed(ProcessedImage),
    /// A stage failed; the error names the stage or its kind
    Failed(PipelineError),
    /// The run was stopped through its cancellation token
    Cancelled,
}

impl PipelineOutcome {
    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    /// Convert into a `Result`, mapping `Cancelled` to `PipelineError::Cancelled`
    ///
    /// # Errors
    /// Returns the failure or `Cancelled`.
    pub fn into_result(self) -> Result<ProcessedImage> {
        match self {
            Self::Completed(image) => Ok(image),
            Self::Failed(error) => Err(error),
            Self::Cancelled => Err(PipelineError::Cancelled),
        }
    }
}

impl From<Result<ProcessedImage>> for PipelineOutcome {
    fn from(result: Result<ProcessedImage>) -> Self {
        match result {
            Ok(image) => Self::Completed(image),
            Err(PipelineError::Cancelled) => Self::Cancelled,
            Err(error) => Self::Failed(error),
        }
    }
}

/// Cooperative pause and cancellation signals for one run
#[derive(Debug, Clone)]
pub struct RunControl {
    cancel: CancellationToken,
    pause: watch::Receiver<bool>,
}

impl RunControl {
    /// Combine a cancellation token with a pause signal (`true` = paused)
    #[must_use]
    pub fn new(cancel: CancellationToken, pause: watch::Receiver<bool>) -> Self {
        Self { cancel, pause }
    }

    /// Control that can be cancelled but never pauses
    #[must_use]
    pub fn unpausable(cancel: CancellationToken) -> Self {
        let (_, pause) = watch::channel(false);
        Self { cancel, pause }
    }

    #[must_use]
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Yield, wait while paused, and fail with `Cancelled` once cancelled
    ///
    /// # Errors
    /// Returns `PipelineError::Cancelled` when the token has fired.
    pub async fn checkpoint(&mut self) -> Result<()> {
        tokio::task::yield_now().await;
        loop {
            if self.cancel.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }
            if !*self.pause.borrow_and_update() {
                return Ok(());
            }
            tokio::select! {
                () = self.cancel.cancelled() => return Err(PipelineError::Cancelled),
                changed = self.pause.changed() => {
                    // Nobody left to resume us
                    if changed.is_err() {
                        return Ok(());
                    }
                },
            }
        }
    }
}

/// Run CPU-bound stage work on the blocking pool
pub(crate) async fn run_blocking<T, F>(stage: ProcessingStage, work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| PipelineError::stage_error(stage, format!("worker task failed: {e}")))?
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

/// Image pipeline shared by the queue, the server and the CLI
#[derive(Clone)]
pub struct PipelineProcessor {
    config: PipelineConfig,
    remover: Option<BackgroundRemover>,
    reporter: Arc<dyn ProgressReporter>,
}

impl std::fmt::Debug for PipelineProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineProcessor")
            .field("config", &self.config)
            .field("remover", &self.remover)
            .finish_non_exhaustive()
    }
}

impl PipelineProcessor {
    /// Create a processor without background removal support
    ///
    /// # Errors
    /// Returns an error when `config` is inconsistent.
    pub fn new(config: PipelineConfig) -> Result<Self> {
        Self::builder().config(config).build()
    }

    #[must_use]
    pub fn builder() -> PipelineProcessorBuilder {
        PipelineProcessorBuilder::default()
    }

    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Whether a segmentation backend is attached
    #[must_use]
    pub fn supports_background_removal(&self) -> bool {
        self.remover.is_some()
    }

    /// Describe what this processor accepts and produces
    #[must_use]
    pub fn capabilities(&self) -> Capabilities {
        Capabilities::from_config(&self.config, self.supports_background_removal())
    }

    /// Reporter configured at build time
    #[must_use]
    pub fn reporter(&self) -> Arc<dyn ProgressReporter> {
        Arc::clone(&self.reporter)
    }

    /// Process one image to completion, without pause support
    ///
    /// # Errors
    /// Returns the stage failure, or `Cancelled` when `cancel` fires.
    pub async fn process_bytes(
        &self,
        bytes: Vec<u8>,
        filename: &str,
        options: &ProcessingOptions,
        cancel: CancellationToken,
    ) -> Result<ProcessedImage> {
        let mut control = RunControl::unpausable(cancel);
        self.process(bytes, filename, options, &mut control)
            .await
            .into_result()
    }

    /// Process one image, reporting to the configured reporter
    pub async fn process(
        &self,
        bytes: Vec<u8>,
        filename: &str,
        options: &ProcessingOptions,
        control: &mut RunControl,
    ) -> PipelineOutcome {
        self.process_with_reporter(bytes, filename, options, control, self.reporter())
            .await
    }

    /// Process one image, sending progress to `reporter`
    ///
    /// Progress is monotonic and reaches exactly 100 on success.
    #[instrument(
        skip(self, bytes, options, control, reporter),
        fields(
            filename = %filename,
            bytes = bytes.len(),
            format = %options.format,
            remove_background = options.remove_background
        )
    )]
    pub async fn process_with_reporter(
        &self,
        bytes: Vec<u8>,
        filename: &str,
        options: &ProcessingOptions,
        control: &mut RunControl,
        reporter: Arc<dyn ProgressReporter>,
    ) -> PipelineOutcome {
        let mut tracker = ProgressTracker::new(reporter);

        let result = match self.check_options(options) {
            Ok(()) => {
                self.run_stages(bytes, filename, options, control, &mut tracker)
                    .await
            },
            Err(error) => Err(error),
        };

        match &result {
            Ok(image) => {
                tracker.report_completion(&image.timings);
                info!(
                    dimensions = ?image.dimensions,
                    size = image.processed_size(),
                    ms = image.timings.total_ms,
                    "Image processed"
                );
            },
            Err(PipelineError::Cancelled) => debug!("Processing cancelled"),
            Err(error) => {
                tracker.report_error(&error.to_string());
                warn!(kind = ?error.kind(), error = %error, "Processing failed");
            },
        }

        result.into()
    }

    fn check_options(&self, options: &ProcessingOptions) -> Result<()> {
        options.validate()?;
        if options.remove_background && self.remover.is_none() {
            return Err(PipelineError::invalid_options(
                "Background removal requested but no segmentation backend is configured",
            ));
        }
        Ok(())
    }

    async fn run_stages(
        &self,
        bytes: Vec<u8>,
        filename: &str,
        options: &ProcessingOptions,
        control: &mut RunControl,
        tracker: &mut ProgressTracker,
    ) -> Result<ProcessedImage> {
        let total_start = Instant::now();
        let mut timings = ProcessingTimings::default();
        let original_size = bytes.len();
        control.checkpoint().await?;

        // Validate
        tracker.report_stage(ProcessingStage::Validate);
        let stage_start = Instant::now();
        let report = ImageValidator::validate(&bytes, filename, &self.config);
        if !report.is_valid {
            return Err(PipelineError::validation(report.error_summary()));
        }
        for warning in &report.warnings {
            warn!(warning = %warning, "Validation warning");
        }
        let container = report.format.ok_or_else(|| {
            PipelineError::stage_error(ProcessingStage::Validate, "format not detected")
        })?;
        let name = filename.to_string();
        let decoded = run_blocking(ProcessingStage::Validate, move || {
            image::load_from_memory_with_format(&bytes, container).map_err(|e| {
                warn!(file = %name, error = %e, "Image decode failed");
                PipelineError::validation(format!(
                    "'{name}' could not be decoded as {}",
                    container.extensions_str().first().copied().unwrap_or("an image")
                ))
            })
        })
        .await?;
        timings.validate_ms = elapsed_ms(stage_start);
        tracker.report_within(ProcessingStage::Validate, 1.0);
        control.checkpoint().await?;

        // Remove background
        let image = match (&self.remover, options.remove_background) {
            (Some(remover), true) => {
                tracker.report_stage(ProcessingStage::RemoveBackground);
                let stage_start = Instant::now();
                let shared = Mutex::new(&mut *tracker);
                let on_progress = |fraction: f32| {
                    if let Ok(mut tracker) = shared.lock() {
                        tracker.report_within(ProcessingStage::RemoveBackground, fraction);
                    }
                };
                let cutout = remover
                    .remove(decoded, control.cancel_token(), &on_progress)
                    .await?;
                timings.background_removal_ms = Some(elapsed_ms(stage_start));
                control.checkpoint().await?;
                cutout
            },
            _ => decoded,
        };

        // Resize
        tracker.report_stage(ProcessingStage::Resize);
        let stage_start = Instant::now();
        let max_edge = options.max_edge_px;
        let resized = run_blocking(ProcessingStage::Resize, move || {
            Ok(ImageResizer::resize_to_fit(image, max_edge))
        })
        .await?;
        let dimensions = resized.dimensions();
        timings.resize_ms = elapsed_ms(stage_start);
        control.checkpoint().await?;

        // Compress
        tracker.report_stage(ProcessingStage::Compress);
        let stage_start = Instant::now();
        let (format, quality) = (options.format, options.quality);
        let encoded = run_blocking(ProcessingStage::Compress, move || {
            ImageEncoder::encode(&resized, format, quality)
        })
        .await?;
        timings.compress_ms = elapsed_ms(stage_start);
        control.checkpoint().await?;

        // Strip metadata
        tracker.report_stage(ProcessingStage::StripMetadata);
        let stage_start = Instant::now();
        let stripped = run_blocking(ProcessingStage::StripMetadata, move || {
            MetadataStripper::strip(&encoded, quality)
        })
        .await?;
        timings.strip_metadata_ms = elapsed_ms(stage_start);
        timings.total_ms = elapsed_ms(total_start);

        Ok(ProcessedImage {
            bytes: stripped,
            format,
            dimensions,
            original_size,
            timings,
            warnings: report.warnings,
        })
    }

    /// Resize, compress and strip already decoded pixels synchronously
    ///
    /// # Errors
    /// Returns the first stage failure.
    pub fn transform_pixels(
        image: DynamicImage,
        options: &ProcessingOptions,
    ) -> Result<Vec<u8>> {
        options.validate()?;
        let resized = ImageResizer::resize_to_fit(image, options.max_edge_px);
        let encoded = ImageEncoder::encode(&resized, options.format, options.quality)?;
        MetadataStripper::strip(&encoded, options.quality)
    }
}

/// Builder for `PipelineProcessor`
pub struct PipelineProcessorBuilder {
    config: PipelineConfig,
    segmenter: Option<Arc<dyn Segmenter>>,
    reporter: Arc<dyn ProgressReporter>,
}

impl Default for PipelineProcessorBuilder {
    fn default() -> Self {
        Self {
            config: PipelineConfig::default(),
            segmenter: None,
            reporter: Arc::new(NoOpProgressReporter),
        }
    }
}

impl PipelineProcessorBuilder {
    #[must_use]
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Attach a segmentation backend, enabling background removal
    #[must_use]
    pub fn segmenter(mut self, segmenter: Arc<dyn Segmenter>) -> Self {
        self.segmenter = Some(segmenter);
        self
    }

    #[must_use]
    pub fn progress_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Build the processor
    ///
    /// # Errors
    /// Returns an error when the pipeline configuration is invalid.
    pub fn build(self) -> Result<PipelineProcessor> {
        self.config.validate()?;
        let remover = self
            .segmenter
            .map(|segmenter| BackgroundRemover::from_config(segmenter, &self.config));
        Ok(PipelineProcessor {
            config: self.config,
            remover,
            reporter: self.reporter,
        })
    }
}
