//! Listing pipeline CLI tool
//!
//! Batch-processes product photos: validation, optional background removal,
//! resizing, re-encoding and metadata stripping.

#[cfg(feature = "cli")]
use listing_pipeline::cli;

#[cfg(feature = "cli")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::main().await
}

#[cfg(not(feature = "cli"))]
fn main() {
    panic!("CLI feature not enabled. Please rebuild with --features cli");
}
