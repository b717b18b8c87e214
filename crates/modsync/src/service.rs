//! The sync service.
//!
//! [`SyncService`] ties the pipeline together: it normalizes an ingest batch,
//! turns every valid snapshot into a [`MergePlan`], applies the plans to the
//! graph store with bounded concurrency and summarizes the result. It also
//! runs cycle analysis over the stored graph and reports service health.

use crate::analysis::{self, CycleAnalysisResult};
use crate::domain::GraphStats;
use crate::error::{Result, ValidationError};
use crate::merge::{DanglingEdge, MergeOutcome, MergePlan};
use crate::snapshot::{self, InstancePayload};
use crate::store::GraphStore;
use chrono::{SecondsFormat, Utc};
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::Serialize;
use std::sync::Arc;

/// Name reported by the health operation.
pub const SERVICE_NAME: &str = "modsync";

/// Tunables for the sync service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceOptions {
    /// Maximum number of instance merges in flight at once
    pub max_concurrent_merges: usize,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            max_concurrent_merges: crate::config::DEFAULT_MAX_CONCURRENT_MERGES,
        }
    }
}

impl From<&crate::config::IngestConfig> for ServiceOptions {
    fn from(config: &crate::config::IngestConfig) -> Self {
        Self {
            max_concurrent_merges: config.max_concurrent_merges,
        }
    }
}

/// Result of one ingest call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    /// Always `"success"` when the call returns
    pub status: String,
    /// Human-readable summary
    pub message: String,
    /// Payloads in the batch
    pub instances_received: usize,
    /// Instances merged into the graph
    pub instances_processed: usize,
    /// Module upserts across all merged instances
    pub nodes_merged: usize,
    /// Dependency links across all merged instances
    pub edges_merged: usize,
    /// One outcome per payload, in input order
    pub instances: Vec<InstanceReport>,
}

/// Outcome for one payload of an ingest batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum InstanceReport {
    /// The snapshot was merged.
    Merged {
        /// Instance name
        instance: String,
        /// Modules upserted
        nodes_merged: usize,
        /// Dependency links applied
        edges_merged: usize,
        /// Edges that did not exist before
        edges_created: usize,
        /// Edges skipped because an endpoint is missing
        #[serde(skip_serializing_if = "Vec::is_empty")]
        dangling_edges: Vec<DanglingEdge>,
    },
    /// The instance reported its own failure.
    Skipped {
        /// Instance name
        instance: String,
        /// Why it was skipped
        reason: String,
    },
    /// The snapshot failed validation.
    Rejected {
        /// Instance name
        instance: String,
        /// Every validation error found
        errors: Vec<ValidationError>,
    },
}

impl InstanceReport {
    /// Instance name of this outcome.
    #[must_use]
    pub fn instance(&self) -> &str {
        match self {
            Self::Merged { instance, .. }
            | Self::Skipped { instance, .. }
            | Self::Rejected { instance, .. } => instance,
        }
    }

    fn merged(instance: String, outcome: MergeOutcome) -> Self {
        Self::Merged {
            instance,
            nodes_merged: outcome.modules_merged,
            edges_merged: outcome.edges_merged,
            edges_created: outcome.edges_created,
            dangling_edges: outcome.dangling,
        }
    }
}

/// Result of the health operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    /// Always `"ok"`: the service itself is running
    pub status: String,
    /// Crate version
    pub version: String,
    /// Service name
    pub service: String,
    /// Whether the graph store answered a trivial query
    pub store_connected: bool,
    /// Time of the check, RFC 3339 UTC
    pub timestamp: String,
}

/// Orchestrates ingestion and analysis against a graph store.
#[derive(Clone)]
pub struct SyncService {
    store: Arc<dyn GraphStore>,
    options: ServiceOptions,
}

impl std::fmt::Debug for SyncService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncService")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl SyncService {
    /// Create a service over the given store.
    #[must_use]
    pub fn new(store: Arc<dyn GraphStore>, options: ServiceOptions) -> Self {
        Self { store, options }
    }

    /// The underlying store handle.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn GraphStore> {
        &self.store
    }

    /// Ingest a batch of instance payloads.
    ///
    /// Skipped and rejected instances are recorded in the report. All valid
    /// snapshots share one observed-at timestamp and are merged with at most
    /// `max_concurrent_merges` plans in flight.
    ///
    /// # Errors
    ///
    /// Returns the first store error. Instances committed before the error
    /// stay committed.
    pub async fn ingest(&self, payloads: Vec<InstancePayload>) -> Result<IngestReport> {
        let received = payloads.len();
        let normalization = snapshot::normalize(payloads);
        let observed_at = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);

        let plans: Vec<(usize, MergePlan)> = normalization
            .snapshots
            .iter()
            .map(|accepted| {
                (
                    accepted.position,
                    MergePlan::from_snapshot(&accepted.snapshot, &observed_at),
                )
            })
            .collect();

        let store = &self.store;
        let merged: Vec<(usize, String, MergeOutcome)> = stream::iter(plans)
            .map(|(position, plan)| async move {
                let outcome = store.apply(&plan).await?;
                tracing::debug!(
                    instance = %plan.instance,
                    modules = outcome.modules_merged,
                    edges = outcome.edges_merged,
                    dangling = outcome.dangling.len(),
                    "Merged instance snapshot"
                );
                Ok::<_, crate::error::Error>((position, plan.instance.to_string(), outcome))
            })
            .buffered(self.options.max_concurrent_merges.max(1))
            .try_collect()
            .await?;

        let mut slots: Vec<Option<InstanceReport>> = vec![None; received];
        let mut nodes_merged = 0;
        let mut edges_merged = 0;
        let processed = merged.len();

        for (position, instance, outcome) in merged {
            nodes_merged += outcome.modules_merged;
            edges_merged += outcome.edges_merged;
            slots[position] = Some(InstanceReport::merged(instance, outcome));
        }
        for skipped in normalization.skipped {
            slots[skipped.position] = Some(InstanceReport::Skipped {
                instance: skipped.instance,
                reason: skipped.reason,
            });
        }
        for rejected in normalization.rejected {
            slots[rejected.position] = Some(InstanceReport::Rejected {
                instance: rejected.instance,
                errors: rejected.errors,
            });
        }
        let instances: Vec<InstanceReport> = slots.into_iter().flatten().collect();

        let skipped = instances
            .iter()
            .filter(|r| matches!(r, InstanceReport::Skipped { .. }))
            .count();
        let rejected = instances
            .iter()
            .filter(|r| matches!(r, InstanceReport::Rejected { .. }))
            .count();

        tracing::info!(
            received,
            processed,
            skipped,
            rejected,
            nodes_merged,
            edges_merged,
            "Ingest complete"
        );

        Ok(IngestReport {
            status: "success".to_string(),
            message: format!(
                "Data from {received} instances ingested successfully \
                 ({processed} merged, {skipped} skipped, {rejected} rejected)"
            ),
            instances_received: received,
            instances_processed: processed,
            nodes_merged,
            edges_merged,
            instances,
        })
    }

    /// Run cycle analysis over the stored graph.
    ///
    /// # Errors
    ///
    /// Returns any store error raised while loading the graph.
    pub async fn analyze(&self) -> Result<CycleAnalysisResult> {
        let graph = self.store.load_graph().await?;
        let result = analysis::analyze(&graph);
        tracing::info!(
            has_cycles = result.has_cycles,
            cycle_count = result.cycles.len(),
            affected_instances = result.affected_instances.len(),
            "Cycle analysis complete"
        );
        Ok(result)
    }

    /// Report service health. Never fails; store problems only clear the
    /// `store_connected` flag.
    pub async fn health(&self) -> HealthReport {
        let store_connected = match self.store.ping().await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "Graph store health check failed");
                false
            }
        };

        HealthReport {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            service: SERVICE_NAME.to_string(),
            store_connected,
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        }
    }

    /// Node and relationship counts.
    ///
    /// # Errors
    ///
    /// Returns any store error.
    pub async fn stats(&self) -> Result<GraphStats> {
        self.store.stats().await
    }

    /// Bootstrap store uniqueness constraints.
    ///
    /// # Errors
    ///
    /// Returns any store error.
    pub async fn ensure_schema(&self) -> Result<()> {
        self.store.ensure_schema().await
    }
}
