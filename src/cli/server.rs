//! Entry point of the processing server binary

use super::config::load_segmenter;
use super::main_impl::CliRemovalMode;
use crate::{
    config::PipelineConfig,
    processor::PipelineProcessor,
    server::{self, ServerConfig},
    tracing_config::{init_cli_tracing, TracingFormat},
};
use anyhow::{Context, Result};
use clap::Parser;
use std::{net::SocketAddr, path::PathBuf};
use tracing::info;

/// HTTP server for the remote processing contract
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "listing-pipeline-server")]
pub struct ServerCli {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1:8080")]
    pub bind: SocketAddr,

    /// Bearer token clients must present
    #[arg(long)]
    pub api_token: Option<String>,

    /// Concurrent processing requests before answering 429
    #[arg(long, default_value_t = 4)]
    pub capacity: usize,

    /// Path to a local ONNX segmentation model enabling background removal
    #[arg(short, long, value_name = "PATH")]
    pub model: Option<PathBuf>,

    /// Background removal strategy
    #[arg(long, value_enum, default_value_t = CliRemovalMode::Optimized)]
    pub mode: CliRemovalMode,

    /// Longest edge fed to segmentation in optimized mode
    #[arg(long, default_value_t = 1024)]
    pub segmentation_cap: u32,

    /// Enable verbose logging (-v: DEBUG, -vv: TRACE)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

pub async fn serve_main() -> Result<()> {
    let cli = ServerCli::parse();
    init_cli_tracing(cli.verbose, TracingFormat::Compact)
        .context("Failed to initialize tracing")?;

    let config = PipelineConfig::builder()
        .removal_mode(cli.mode.into())
        .segmentation_cap(cli.segmentation_cap)
        .build()
        .context("Invalid pipeline configuration")?;

    let mut builder = PipelineProcessor::builder().config(config);
    if let Some(segmenter) = load_segmenter(cli.model.as_deref(), None, None)? {
        info!(backend = segmenter.name(), "Background removal enabled");
        builder = builder.segmenter(segmenter);
    }
    let processor = builder.build().context("Failed to create pipeline processor")?;

    let server_config = ServerConfig {
        bind_addr: cli.bind,
        api_token: cli.api_token,
        capacity: cli.capacity,
    };
    server::run(processor, server_config, async {
        // Fall through to shutdown if the signal handler cannot be installed
        let _ = tokio::signal::ctrl_c().await;
        info!("Shutting down");
    })
    .await
    .context("Server error")
}
