//! modsync CLI binary.

use anyhow::Result;
use modsync::cli::Cli;
use tracing_subscriber::EnvFilter;

/// Main entry point for the modsync CLI.
///
/// Uses tokio's `current_thread` runtime; commands are sequential and I/O bound.
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Controlled via RUST_LOG, e.g. RUST_LOG=modsync=debug
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("modsync=info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    tracing::debug!("Starting modsync CLI");

    let cli = Cli::parse_args();
    cli.execute().await?;

    tracing::debug!("modsync CLI completed successfully");
    Ok(())
}
