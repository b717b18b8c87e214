//! Command execution logic.

use anyhow::{Context, Result, bail};
use serde::Serialize;

use super::args::{AnalyseArgs, IngestArgs, InitSchemaArgs, StatsArgs};
use crate::config::ServiceConfig;
use crate::service::{InstanceReport, ServiceOptions, SyncService};
use crate::snapshot::IngestRequest;
use crate::store::{StoreBackend, create_store};

/// How command results are printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Human-readable text
    Text,
    /// Pretty-printed JSON
    Json,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Open the configured store and wrap it in a service.
pub async fn build_service(config: &ServiceConfig) -> Result<SyncService> {
    let backend = StoreBackend::from_config(&config.store)?;
    tracing::debug!(backend = backend.name(), "Opening graph store");
    let store = create_store(backend).await?;
    Ok(SyncService::new(store, ServiceOptions::from(&config.ingest)))
}

/// Execute the ingest command
pub async fn execute_ingest(
    service: &SyncService,
    args: &IngestArgs,
    output_mode: OutputMode,
) -> Result<()> {
    let content = tokio::fs::read_to_string(&args.file)
        .await
        .with_context(|| format!("failed to read {}", args.file.display()))?;
    let request = IngestRequest::from_json(&content)
        .with_context(|| format!("{} is not a valid ingest batch", args.file.display()))?;

    let report = service.ingest(request.into_payloads()).await?;

    match output_mode {
        OutputMode::Json => print_json(&report)?,
        OutputMode::Text => {
            println!("{}", report.message);
            for instance in &report.instances {
                match instance {
                    InstanceReport::Merged {
                        instance,
                        nodes_merged,
                        edges_merged,
                        dangling_edges,
                        ..
                    } => {
                        println!("  {instance}: {nodes_merged} modules, {edges_merged} dependencies");
                        for edge in dangling_edges {
                            println!("    dangling: {} -> {}", edge.from, edge.to);
                        }
                    }
                    InstanceReport::Skipped { instance, reason } => {
                        println!("  {instance}: skipped ({reason})");
                    }
                    InstanceReport::Rejected { instance, errors } => {
                        println!("  {instance}: rejected");
                        for error in errors {
                            println!("    {error}");
                        }
                    }
                }
            }
        }
    }

    Ok(())
}

/// Execute the analyse command
pub async fn execute_analyse(
    service: &SyncService,
    args: &AnalyseArgs,
    output_mode: OutputMode,
) -> Result<()> {
    let result = service.analyze().await?;

    match output_mode {
        OutputMode::Json => print_json(&result)?,
        OutputMode::Text => {
            println!("{}", result.message);
            for cycle in &result.cycles {
                let mut path = cycle.join(" -> ");
                if let Some(first) = cycle.first() {
                    path.push_str(" -> ");
                    path.push_str(first);
                }
                println!("  {path}");
            }
            if !result.affected_instances.is_empty() {
                println!("Affected instances: {}", result.affected_instances.join(", "));
            }
        }
    }

    if args.fail_on_cycles && result.has_cycles {
        bail!("{} dependency cycle(s) detected", result.cycles.len());
    }
    Ok(())
}

/// Execute the stats command
pub async fn execute_stats(
    service: &SyncService,
    _args: &StatsArgs,
    output_mode: OutputMode,
) -> Result<()> {
    let stats = service.stats().await?;

    match output_mode {
        OutputMode::Json => print_json(&stats)?,
        OutputMode::Text => {
            println!("Modules:      {}", stats.modules);
            println!("Instances:    {}", stats.instances);
            println!("Deployments:  {}", stats.deployments);
            println!("Dependencies: {}", stats.dependencies);
        }
    }
    Ok(())
}

/// Execute the init-schema command
pub async fn execute_init_schema(
    service: &SyncService,
    args: &InitSchemaArgs,
    output_mode: OutputMode,
) -> Result<()> {
    service.ensure_schema().await?;

    match output_mode {
        OutputMode::Json => print_json(&serde_json::json!({"status": "success"}))?,
        OutputMode::Text if !args.quiet => println!("Schema constraints ensured"),
        OutputMode::Text => {}
    }
    Ok(())
}
