//! Listing pipeline processing server
//!
//! Serves the remote processing contract over HTTP.

#[cfg(all(feature = "cli", feature = "server"))]
use listing_pipeline::cli;

#[cfg(all(feature = "cli", feature = "server"))]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::serve_main().await
}

#[cfg(not(all(feature = "cli", feature = "server")))]
fn main() {
    panic!("Server binary needs the 'cli' and 'server' features");
}
