#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::unused_async)]

//! # Listing Pipeline
//!
//! Turns raw product photos into marketplace-ready images: validation,
//! optional background removal, resizing, lossy re-encoding and metadata
//! stripping, driven one file at a time by a pausable, cancellable job queue.
//!
//! ## Features
//!
//! - **Validation**: size limit, container signature sniffing (JPEG, PNG, WebP), dimension warnings
//! - **Background Removal**: standard or optimized (downscaled segmentation) modes over a pluggable [`Segmenter`]
//! - **Resizing**: aspect-preserving fit within a longest-edge bound, never upscaling
//! - **Compression**: JPEG (flattened onto white) or WebP with alpha
//! - **Metadata Stripping**: re-encodes pixels only, dropping EXIF/XMP/ICC payloads
//! - **Job Queue**: sequential runs with pause, resume, cancel and a watchable progress state
//! - **Remote Delegate**: offloads processing to an HTTP service with the same contract
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use listing_pipeline::{OutputFormat, ProcessingOptions, process_image_bytes};
//!
//! # async fn example(upload: Vec<u8>) -> anyhow::Result<()> {
//! let options = ProcessingOptions::builder()
//!     .max_edge_px(1600)
//!     .format(OutputFormat::ModernLossy)
//!     .quality(0.8)
//!     .build()?;
//! let processed = process_image_bytes(upload, &options).await?;
//! println!("{}x{} {}", processed.dimensions.0, processed.dimensions.1, processed.mime_type());
//! # Ok(())
//! # }
//! ```
//!
//! ## Batch Runs
//!
//! ```rust,no_run
//! use listing_pipeline::{JobQueue, JobSubmission, PipelineProcessor, ProcessingOptions};
//!
//! # async fn example(files: Vec<(String, Vec<u8>)>) -> anyhow::Result<()> {
//! let queue = JobQueue::new(PipelineProcessor::builder().build()?);
//! for (name, bytes) in files {
//!     queue.submit(JobSubmission::new(name, "image/jpeg", bytes))?;
//! }
//!
//! let controller = queue.clone();
//! let mut progress = queue.subscribe();
//! tokio::spawn(async move {
//!     while progress.changed().await.is_ok() {
//!         let state = progress.borrow_and_update().clone();
//!         println!("{}% ({:?})", state.percent(), state.current_job);
//!     }
//! });
//!
//! let report = queue.start(Vec::new(), ProcessingOptions::default()).await?;
//! println!("{} succeeded, {} failed", report.succeeded, report.failed);
//! # drop(controller);
//! # Ok(())
//! # }
//! ```
//!
//! ### Feature Flags
//!
//! - `tract` (default): local ONNX segmentation through Tract (pure Rust)
//! - `server` (default): axum server implementing the remote processing contract
//! - `cli` (default): `listing-pipeline` batch tool and tracing subscriber setup
//! - `tracing-json`: JSON log output for the binaries

pub mod background;
pub mod backends;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod error;
pub mod inference;
pub mod processor;
pub mod queue;
pub mod remote;
#[cfg(feature = "server")]
pub mod server;
pub mod services;
#[cfg(feature = "cli")]
pub mod tracing_config;
pub mod types;
pub mod utils;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::sync::CancellationToken;

// Public API exports
pub use background::BackgroundRemover;
pub use backends::RemoteSegmenter;
#[cfg(feature = "tract")]
pub use backends::TractSegmenter;
pub use config::{
    Capabilities, FeatureFlags, OutputFormat, PipelineConfig, PipelineConfigBuilder,
    ProcessingOptions, ProcessingOptionsBuilder, RemovalMode,
};
pub use error::{ErrorKind, PipelineError, Result};
pub use inference::Segmenter;
pub use processor::{PipelineOutcome, PipelineProcessor, PipelineProcessorBuilder, RunControl};
pub use queue::{JobQueue, JobSummary, QueueProgress, QueueState, RunReport};
pub use remote::{RemoteDelegate, RemoteDelegateConfig, RemoteResult};
pub use services::{
    ConsoleProgressReporter, ImageValidator, NoOpProgressReporter, ProcessingStage,
    ProgressReporter, ProgressTracker, ProgressUpdate, ValidationReport,
};
pub use types::{
    ImageJob, JobId, JobStatus, JobSubmission, ProcessedImage, ProcessingTimings,
    SegmentationMask,
};
pub use utils::{ImagePreprocessor, PreprocessingConfig};

#[cfg(feature = "server")]
pub use server::{ApiError, ServerConfig};

#[cfg(feature = "cli")]
pub use tracing_config::{init_cli_tracing, spans, TracingConfig, TracingFormat};

/// Process one image held in memory with the default limits
///
/// Runs validation, resizing, compression and metadata stripping. Background
/// removal needs a segmenter, so build a [`PipelineProcessor`] with one for
/// options that request it.
///
/// # Examples
///
/// ```rust,no_run
/// use listing_pipeline::{process_image_bytes, ProcessingOptions};
///
/// # async fn example(upload_bytes: Vec<u8>) -> anyhow::Result<()> {
/// let result = process_image_bytes(upload_bytes, &ProcessingOptions::default()).await?;
/// std::fs::write("listing.jpg", &result.bytes)?;
/// # Ok(())
/// # }
/// ```
pub async fn process_image_bytes(
    image_bytes: Vec<u8>,
    options: &ProcessingOptions,
) -> Result<ProcessedImage> {
    let processor = PipelineProcessor::new(PipelineConfig::default())?;
    processor
        .process_bytes(image_bytes, "image", options, CancellationToken::new())
        .await
}

/// Process one image read from an async stream with the default limits
///
/// Reading stops one byte past [`config::MAX_FILE_SIZE`], so an endless or
/// oversized stream is rejected by validation without being buffered whole.
///
/// # Examples
///
/// ```rust,no_run
/// use listing_pipeline::{process_image_reader, ProcessingOptions};
/// use tokio::fs::File;
///
/// # async fn example() -> anyhow::Result<()> {
/// let file = File::open("product.jpg").await?;
/// let result = process_image_reader(file, &ProcessingOptions::default()).await?;
/// println!("{} bytes", result.processed_size());
/// # Ok(())
/// # }
/// ```
pub async fn process_image_reader<R: AsyncRead + Unpin>(
    reader: R,
    options: &ProcessingOptions,
) -> Result<ProcessedImage> {
    let mut buffer = Vec::new();
    reader
        .take(config::MAX_FILE_SIZE as u64 + 1)
        .read_to_end(&mut buffer)
        .await?;
    process_image_bytes(buffer, options).await
}
