//! Listing pipeline CLI tool
//!
//! Runs product photos through the pipeline as one queued batch and writes the
//! processed images next to the inputs or into an output directory.

use super::config::{load_segmenter, CliConfigBuilder};
use crate::{
    config::OutputFormat,
    processor::PipelineProcessor,
    queue::{JobQueue, QueueState, RunReport},
    services::ConsoleProgressReporter,
    tracing_config::{spans, TracingConfig, TracingFormat},
    types::{ImageJob, JobId, JobStatus, JobSubmission},
};
use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Instant,
};
use tracing::{error, info, warn, Instrument};

/// Extensions picked up when scanning directories
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp"];

/// Product photo pipeline CLI
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "listing-pipeline")]
pub struct Cli {
    /// Input image files or directories
    #[arg(value_name = "INPUT", required = true)]
    pub input: Vec<String>,

    /// Output directory (default: next to each input with a `_listing` suffix)
    #[arg(short, long, value_name = "DIR")]
    pub output: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = CliOutputFormat::Jpeg)]
    pub format: CliOutputFormat,

    /// Encoder quality factor in (0.0, 1.0]
    #[arg(short, long, default_value_t = 0.85)]
    pub quality: f32,

    /// Longest output edge in pixels (500-5000)
    #[arg(long, default_value_t = 2000)]
    pub max_edge: u32,

    /// Remove the background before resizing
    #[arg(short = 'b', long)]
    pub remove_background: bool,

    /// Background removal strategy
    #[arg(long, value_enum, default_value_t = CliRemovalMode::Optimized)]
    pub mode: CliRemovalMode,

    /// Longest edge fed to segmentation in optimized mode
    #[arg(long, default_value_t = 1024)]
    pub segmentation_cap: u32,

    /// Largest accepted input in MiB
    #[arg(long, default_value_t = 25)]
    pub max_file_size_mib: usize,

    /// Path to a local ONNX segmentation model
    #[arg(short, long, value_name = "PATH")]
    pub model: Option<PathBuf>,

    /// Base URL of a remote processing service used for segmentation
    #[arg(long, value_name = "URL")]
    pub remote: Option<String>,

    /// Bearer token for the remote processing service
    #[arg(long, requires = "remote")]
    pub api_token: Option<String>,

    /// Process directories recursively
    #[arg(short, long)]
    pub recursive: bool,

    /// Enable verbose logging (-v: DEBUG, -vv: TRACE)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Emit logs as JSON
    #[cfg(feature = "tracing-json")]
    #[arg(long)]
    pub json_logs: bool,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum CliOutputFormat {
    Jpeg,
    Webp,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum CliRemovalMode {
    Standard,
    Optimized,
}

pub async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(&cli).context("Failed to initialize tracing")?;
    CliConfigBuilder::validate_cli(&cli).context("Invalid CLI arguments")?;

    let options = CliConfigBuilder::options(&cli)?;
    let pipeline_config = CliConfigBuilder::pipeline_config(&cli)?;
    let segmenter = load_segmenter(
        cli.model.as_deref(),
        cli.remote.as_deref(),
        cli.api_token.as_deref(),
    )?;
    let backend = segmenter.as_ref().map_or("none", |s| s.name());

    let mut builder = PipelineProcessor::builder().config(pipeline_config);
    if let Some(segmenter) = segmenter {
        builder = builder.segmenter(segmenter);
    }
    if cli.verbose > 0 {
        builder = builder.progress_reporter(Arc::new(ConsoleProgressReporter::new(cli.verbose > 1)));
    }
    let processor = builder.build().context("Failed to create pipeline processor")?;

    let session_id = uuid::Uuid::new_v4().to_string();
    let span = spans::session(&session_id, backend);
    let start_time = Instant::now();
    let report = run_batch(&cli, processor, options).instrument(span).await?;

    info!(
        "Processed {} of {} image(s) in {:.2}s",
        report.succeeded,
        report.total,
        start_time.elapsed().as_secs_f64()
    );
    if report.was_cancelled {
        warn!(
            not_started = report.not_started,
            "Run cancelled before all images were processed"
        );
    }
    if report.failed > 0 {
        anyhow::bail!("{} image(s) failed to process", report.failed);
    }
    Ok(())
}

fn init_tracing(cli: &Cli) -> Result<()> {
    #[cfg(feature = "tracing-json")]
    let format = if cli.json_logs {
        TracingFormat::Json
    } else {
        TracingFormat::Console
    };
    #[cfg(not(feature = "tracing-json"))]
    let format = TracingFormat::Console;

    TracingConfig::new()
        .with_verbosity(cli.verbose)
        .with_format(format)
        .init()
}

/// Queue every input, run the batch and write the results
async fn run_batch(
    cli: &Cli,
    processor: PipelineProcessor,
    options: crate::config::ProcessingOptions,
) -> Result<RunReport> {
    let files = collect_inputs(&cli.input, cli.recursive)?;
    if files.is_empty() {
        warn!("No supported image files found in the provided inputs");
        return Ok(RunReport::default());
    }
    info!("Found {} image file(s) to process", files.len());

    if let Some(dir) = &cli.output {
        prepare_output_dir(dir)?;
    }

    let mut jobs = Vec::with_capacity(files.len());
    let mut targets: Vec<(JobId, PathBuf)> = Vec::with_capacity(files.len());
    for path in &files {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let job = ImageJob::new(JobSubmission::new(
            path.display().to_string(),
            mime_for_path(path),
            bytes,
        ));
        targets.push((
            job.id,
            generate_output_path(path, cli.output.as_deref(), options.format),
        ));
        jobs.push(job);
    }

    let queue = JobQueue::new(processor);
    let progress = (cli.verbose == 0).then(|| spawn_progress_bar(&queue));
    let interrupt = spawn_interrupt_handler(queue.clone());

    let report = queue
        .start(jobs, options)
        .instrument(spans::batch_processing(files.len()))
        .await
        .context("Failed to run batch")?;

    interrupt.abort();
    if let Some((bar, task)) = progress {
        task.abort();
        bar.finish_with_message(format!(
            "Completed! Processed: {}, Failed: {}",
            report.succeeded, report.failed
        ));
    }

    write_results(&queue, &targets).await?;
    Ok(report)
}

/// Write finished images and log failures
async fn write_results(queue: &JobQueue, targets: &[(JobId, PathBuf)]) -> Result<()> {
    for (id, target) in targets {
        let Some(summary) = queue.job(*id) else {
            continue;
        };
        match summary.status {
            JobStatus::Completed => {
                if let Some(result) = queue.take_result(*id) {
                    tokio::fs::write(target, &result.bytes)
                        .await
                        .with_context(|| format!("Failed to write {}", target.display()))?;
                    info!(
                        "{} -> {} ({}x{}, {:.0}% of original)",
                        summary.name,
                        target.display(),
                        result.dimensions.0,
                        result.dimensions.1,
                        result.compression_ratio() * 100.0
                    );
                }
            },
            JobStatus::Failed => error!(
                "Failed to process {}: {}",
                summary.name,
                summary.error_detail.as_deref().unwrap_or("unknown error")
            ),
            JobStatus::Cancelled => warn!("Cancelled: {}", summary.name),
            JobStatus::Pending | JobStatus::Processing => {},
        }
    }
    Ok(())
}

/// Drive an indicatif bar from the queue's state channel
fn spawn_progress_bar(queue: &JobQueue) -> (ProgressBar, tokio::task::JoinHandle<()>) {
    let bar = ProgressBar::new(100);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {msg}")
    {
        bar.set_style(style.progress_chars("#>-"));
    }

    let mut states = queue.subscribe();
    let handle = bar.clone();
    let task = tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let state: QueueState = states.borrow_and_update().clone();
            handle.set_position(u64::from(state.percent()));
            let message = match (&state.current_job, state.paused) {
                (_, true) => "paused".to_string(),
                (Some(name), false) => format!("{name} ({}%)", state.current_job_progress),
                (None, false) => format!("{}/{}", state.completed, state.total),
            };
            handle.set_message(message);
        }
    });
    (bar, task)
}

/// Cancel the run on Ctrl-C
fn spawn_interrupt_handler(queue: JobQueue) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling remaining jobs");
            queue.cancel();
        }
    })
}

fn prepare_output_dir(dir: &Path) -> Result<()> {
    if dir.is_file() {
        anyhow::bail!(
            "Output path exists and is a file, not a directory: {}",
            dir.display()
        );
    }
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create output directory: {}", dir.display()))
}

/// Expand files and directories into a sorted list of image paths
fn collect_inputs(inputs: &[String], recursive: bool) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for input in inputs {
        let path = PathBuf::from(input);
        if path.is_file() {
            if is_image_file(&path) {
                files.push(path);
            } else {
                warn!("Skipping unsupported file: {}", path.display());
            }
        } else if path.is_dir() {
            files.extend(find_image_files(&path, recursive)?);
        } else {
            anyhow::bail!(
                "Input path does not exist or is not accessible: {}",
                path.display()
            );
        }
    }
    files.sort();
    files.dedup();
    Ok(files)
}

fn find_image_files(dir: &Path, recursive: bool) -> Result<Vec<PathBuf>> {
    let walker = walkdir::WalkDir::new(dir).max_depth(if recursive { usize::MAX } else { 1 });
    let mut files = Vec::new();
    for entry in walker {
        let entry = entry?;
        if entry.file_type().is_file() && is_image_file(entry.path()) {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
}

fn mime_for_path(path: &Path) -> &'static str {
    image::ImageFormat::from_path(path)
        .map_or("application/octet-stream", |format| format.to_mime_type())
}

/// Output path for `input`, inside `output_dir` when given
fn generate_output_path(input: &Path, output_dir: Option<&Path>, format: OutputFormat) -> PathBuf {
    let stem = input.file_stem().unwrap_or_default().to_string_lossy();
    match output_dir {
        Some(dir) => dir.join(format!("{stem}.{}", format.extension())),
        None => input
            .parent()
            .unwrap_or(Path::new("."))
            .join(format!("{stem}_listing.{}", format.extension())),
    }
}
