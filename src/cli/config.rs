//! Configuration conversion utilities for CLI arguments

use crate::cli::main_impl::{Cli, CliOutputFormat, CliRemovalMode};
use crate::{
    backends::RemoteSegmenter,
    config::{OutputFormat, PipelineConfig, ProcessingOptions, RemovalMode},
    inference::Segmenter,
    remote::{RemoteDelegate, RemoteDelegateConfig},
};
use anyhow::{Context, Result};
use std::{path::Path, sync::Arc};

/// Convert CLI arguments into pipeline configuration
pub(crate) struct CliConfigBuilder;

impl CliConfigBuilder {
    /// Per-run processing options from the CLI flags
    pub(crate) fn options(cli: &Cli) -> Result<ProcessingOptions> {
        ProcessingOptions::builder()
            .max_edge_px(cli.max_edge)
            .format(cli.format.into())
            .quality(cli.quality)
            .remove_background(cli.remove_background)
            .build()
            .context("Invalid processing options")
    }

    /// Processor-wide limits from the CLI flags
    pub(crate) fn pipeline_config(cli: &Cli) -> Result<PipelineConfig> {
        PipelineConfig::builder()
            .max_file_size(cli.max_file_size_mib.saturating_mul(1024 * 1024))
            .removal_mode(cli.mode.into())
            .segmentation_cap(cli.segmentation_cap)
            .build()
            .context("Invalid pipeline configuration")
    }

    /// Validate CLI arguments for consistency
    pub(crate) fn validate_cli(cli: &Cli) -> Result<()> {
        Self::options(cli)?;
        Self::pipeline_config(cli)?;

        if cli.model.is_some() && cli.remote.is_some() {
            anyhow::bail!("Use either --model or --remote, not both");
        }
        if cli.remove_background && cli.model.is_none() && cli.remote.is_none() {
            anyhow::bail!("--remove-background needs a segmentation model (--model) or a remote service (--remote)");
        }
        Ok(())
    }
}

/// Load the segmentation backend selected on the command line
///
/// Returns `None` when neither a local model nor a remote service is given.
pub(crate) fn load_segmenter(
    model: Option<&Path>,
    remote: Option<&str>,
    api_token: Option<&str>,
) -> Result<Option<Arc<dyn Segmenter>>> {
    if let Some(base_url) = remote {
        let mut config = RemoteDelegateConfig::new(base_url);
        if let Some(token) = api_token {
            config = config.with_token(token);
        }
        let delegate = RemoteDelegate::new(config).context("Failed to create remote delegate")?;
        return Ok(Some(Arc::new(RemoteSegmenter::new(delegate))));
    }

    let Some(path) = model else {
        return Ok(None);
    };
    load_local_model(path).map(Some)
}

#[cfg(feature = "tract")]
fn load_local_model(path: &Path) -> Result<Arc<dyn Segmenter>> {
    use crate::{backends::TractSegmenter, utils::PreprocessingConfig};

    let segmenter = TractSegmenter::from_file(path, PreprocessingConfig::default())
        .with_context(|| format!("Failed to load segmentation model {}", path.display()))?;
    Ok(Arc::new(segmenter))
}

#[cfg(not(feature = "tract"))]
fn load_local_model(path: &Path) -> Result<Arc<dyn Segmenter>> {
    anyhow::bail!(
        "Cannot load {}: rebuild with the 'tract' feature for local segmentation",
        path.display()
    )
}

impl From<CliOutputFormat> for OutputFormat {
    fn from(format: CliOutputFormat) -> Self {
        match format {
            CliOutputFormat::Jpeg => Self::PhotographicLossy,
            CliOutputFormat::Webp => Self::ModernLossy,
        }
    }
}

impl From<CliRemovalMode> for RemovalMode {
    fn from(mode: CliRemovalMode) -> Self {
        match mode {
            CliRemovalMode::Standard => Self::Standard,
            CliRemovalMode::Optimized => Self::Optimized,
        }
    }
}
