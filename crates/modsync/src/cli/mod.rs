//! CLI argument parsing and command dispatch.
//!
//! # Commands
//!
//! - `ingest <FILE>`: merge a batch of instance snapshots into the graph
//! - `analyse`: detect dependency cycles (alias `analyze`)
//! - `stats`: show node and relationship counts
//! - `init-schema`: create store uniqueness constraints
//!
//! # Global Flags
//!
//! - `--config <FILE>`: YAML configuration file
//! - `--store <BACKEND>` / `--data-file <FILE>`: override the store settings
//! - `--json`: output in JSON format
//!
//! # Example
//!
//! ```bash
//! modsync --store jsonl ingest snapshots.json
//! modsync --store jsonl analyse --fail-on-cycles
//! ```

mod args;
mod execute;

use crate::config::ServiceConfig;
use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

pub use args::{AnalyseArgs, IngestArgs, InitSchemaArgs, StatsArgs};
pub use execute::{OutputMode, build_service};

/// modsync - module dependency graph synchronization
///
/// Merges per-instance module dependency snapshots into one global graph and
/// reports dependency cycles across all instances.
#[derive(Parser, Debug)]
#[command(name = "modsync")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output in JSON format for programmatic use
    #[arg(long, global = true)]
    pub json: bool,

    /// Path to a YAML configuration file
    #[arg(short, long, global = true, env = "MODSYNC_CONFIG")]
    pub config: Option<PathBuf>,

    /// Graph store backend (overrides configuration)
    #[arg(long, global = true, value_enum)]
    pub store: Option<StoreArg>,

    /// Data file for the jsonl backend (overrides configuration)
    #[arg(long, global = true)]
    pub data_file: Option<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Store backend choices accepted on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StoreArg {
    /// Ephemeral in-memory graph
    Memory,
    /// In-memory graph persisted to a JSONL file
    Jsonl,
    /// Neo4j database
    Neo4j,
}

impl StoreArg {
    /// Backend name as used in configuration.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Jsonl => "jsonl",
            Self::Neo4j => "neo4j",
        }
    }
}

/// Available commands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Ingest a batch of instance snapshots
    ///
    /// Reads a JSON file holding either a list of instance payloads or an
    /// object with an `instances_data` list.
    Ingest(IngestArgs),

    /// Detect dependency cycles in the global graph
    #[command(alias = "analyze")]
    Analyse(AnalyseArgs),

    /// Show node and relationship counts
    Stats(StatsArgs),

    /// Create uniqueness constraints in the graph store
    InitSchema(InitSchemaArgs),
}

impl Cli {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        <Self as Parser>::parse()
    }

    /// Parse CLI arguments from an iterator (for testing)
    ///
    /// # Errors
    ///
    /// Returns the clap error for invalid arguments.
    pub fn try_parse_from<I, T>(iter: I) -> std::result::Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        <Self as Parser>::try_parse_from(iter)
    }

    /// Resolve configuration: file and environment, then command-line flags.
    ///
    /// # Errors
    ///
    /// Returns any configuration error.
    pub async fn resolve_config(&self) -> Result<ServiceConfig> {
        let mut config = ServiceConfig::resolve(self.config.as_deref()).await?;
        if let Some(store) = self.store {
            config.store.backend = store.as_str().to_string();
        }
        if let Some(data_file) = &self.data_file {
            config.store.data_file.clone_from(data_file);
        }
        Ok(config)
    }

    /// Execute the CLI command
    ///
    /// # Errors
    ///
    /// Returns configuration, store and command errors.
    pub async fn execute(&self) -> Result<()> {
        let output_mode = if self.json {
            OutputMode::Json
        } else {
            OutputMode::Text
        };

        let config = self.resolve_config().await?;
        let service = execute::build_service(&config).await?;

        match &self.command {
            Commands::Ingest(args) => execute::execute_ingest(&service, args, output_mode).await,
            Commands::Analyse(args) => execute::execute_analyse(&service, args, output_mode).await,
            Commands::Stats(args) => execute::execute_stats(&service, args, output_mode).await,
            Commands::InitSchema(args) => {
                execute::execute_init_schema(&service, args, output_mode).await
            }
        }
    }
}
