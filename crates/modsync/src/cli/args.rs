//! CLI argument structs for all commands.

use clap::Parser;
use std::path::PathBuf;

/// Arguments for the `ingest` command
#[derive(Parser, Debug, Clone)]
pub struct IngestArgs {
    /// JSON file with the instance payloads
    pub file: PathBuf,
}

/// Arguments for the `analyse` command
#[derive(Parser, Debug, Clone, Default)]
pub struct AnalyseArgs {
    /// Exit with an error status when cycles are found
    #[arg(long)]
    pub fail_on_cycles: bool,
}

/// Arguments for the `stats` command
#[derive(Parser, Debug, Clone, Default)]
pub struct StatsArgs {}

/// Arguments for the `init-schema` command
#[derive(Parser, Debug, Clone, Default)]
pub struct InitSchemaArgs {
    /// Suppress output messages
    #[arg(short, long)]
    pub quiet: bool,
}
