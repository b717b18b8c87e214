//! modsync HTTP server binary.

use anyhow::Result;
use clap::Parser;
use modsync::cli::{StoreArg, build_service};
use modsync::config::ServiceConfig;
use modsync_server::{AppState, ctrl_c, serve};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Serve modsync ingestion and cycle analysis over HTTP.
#[derive(Parser, Debug)]
#[command(name = "modsync-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a YAML configuration file
    #[arg(short, long, env = "MODSYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Listen host (overrides configuration)
    #[arg(long)]
    host: Option<String>,

    /// Listen port (overrides configuration)
    #[arg(short, long)]
    port: Option<u16>,

    /// Graph store backend (overrides configuration)
    #[arg(long, value_enum)]
    store: Option<StoreArg>,

    /// Data file for the jsonl backend (overrides configuration)
    #[arg(long)]
    data_file: Option<PathBuf>,
}

impl Args {
    async fn resolve_config(&self) -> Result<ServiceConfig> {
        let mut config = ServiceConfig::resolve(self.config.as_deref()).await?;
        if let Some(host) = &self.host {
            config.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(store) = self.store {
            config.store.backend = store.as_str().to_string();
        }
        if let Some(data_file) = &self.data_file {
            config.store.data_file.clone_from(data_file);
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Controlled via RUST_LOG, e.g. RUST_LOG=modsync_server=debug,tower_http=debug
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("modsync=info,modsync_server=info,tower_http=info")
        }))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = args.resolve_config().await?;
    tracing::info!(
        host = %config.server.host,
        port = config.server.port,
        store = %config.store.backend,
        "Starting modsync-server"
    );

    let service = build_service(&config).await?;
    if let Err(e) = service.ensure_schema().await {
        tracing::warn!(error = %e, "Could not ensure store schema at startup");
    }

    serve(&config.server, AppState::new(service), ctrl_c()).await
}
