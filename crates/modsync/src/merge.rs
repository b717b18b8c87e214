//! Merge plans.
//!
//! A [`MergePlan`] is the ordered list of graph operations derived from one
//! instance snapshot. Plans are pure data: the in-memory [`crate::graph::ModuleGraph`]
//! executes them directly and store backends translate them into their own
//! transactional operations. Either way one plan is applied atomically.

use crate::domain::{InstanceName, ModuleId, Properties, merge_properties};
use crate::snapshot::Snapshot;
use serde::Serialize;
use std::collections::HashMap;

/// One graph operation of a merge plan.
#[derive(Debug, Clone, PartialEq)]
pub enum GraphOp {
    /// Create the instance node if it does not exist.
    UpsertInstance {
        /// Instance name
        instance: InstanceName,
    },

    /// Create the module node if needed and merge its properties.
    UpsertModule {
        /// Module identity
        id: ModuleId,
        /// Properties to merge, last write wins per key
        properties: Properties,
    },

    /// Ensure the `DEPLOYS` / `DEPLOYED_BY` pair between an instance and a module.
    EnsureDeployment {
        /// Deploying instance
        instance: InstanceName,
        /// Deployed module
        module: ModuleId,
    },

    /// Upsert the `DEPENDS_ON` edge and attribute it to an instance.
    ///
    /// Both endpoints must exist when the op runs; otherwise the edge is
    /// reported as dangling and nothing is created.
    LinkDependency {
        /// Dependent module
        from: ModuleId,
        /// Required module
        to: ModuleId,
        /// Instance that observed the edge
        instance: InstanceName,
        /// Observed-at value, applied only when the edge is created
        since: String,
        /// Edge properties to merge
        properties: Properties,
    },
}

/// Ordered graph operations for one instance snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct MergePlan {
    /// Instance the plan belongs to
    pub instance: InstanceName,
    /// Operations in execution order
    pub ops: Vec<GraphOp>,
}

impl MergePlan {
    /// Build the plan for one snapshot.
    ///
    /// Duplicate node records are coalesced in payload order, so later values
    /// win. Duplicate edge records collapse into one link. The instance is
    /// upserted first, then every module with its deployment, then every link.
    /// Edges without an explicit `since` use `observed_at`.
    #[must_use]
    pub fn from_snapshot(snapshot: &Snapshot, observed_at: &str) -> Self {
        let instance = snapshot.instance.clone();

        let mut modules: Vec<(ModuleId, Properties)> = Vec::new();
        let mut module_slots: HashMap<&ModuleId, usize> = HashMap::new();
        for record in &snapshot.modules {
            if let Some(&slot) = module_slots.get(&record.id) {
                merge_properties(&mut modules[slot].1, &record.properties);
            } else {
                module_slots.insert(&record.id, modules.len());
                modules.push((record.id.clone(), record.properties.clone()));
            }
        }

        let mut links: Vec<(ModuleId, ModuleId, Option<String>, Properties)> = Vec::new();
        let mut link_slots: HashMap<(&ModuleId, &ModuleId), usize> = HashMap::new();
        for edge in &snapshot.edges {
            if let Some(&slot) = link_slots.get(&(&edge.from, &edge.to)) {
                let link = &mut links[slot];
                if edge.since.is_some() {
                    link.2.clone_from(&edge.since);
                }
                merge_properties(&mut link.3, &edge.properties);
            } else {
                link_slots.insert((&edge.from, &edge.to), links.len());
                links.push((
                    edge.from.clone(),
                    edge.to.clone(),
                    edge.since.clone(),
                    edge.properties.clone(),
                ));
            }
        }

        let mut ops = Vec::with_capacity(1 + modules.len() * 2 + links.len());
        ops.push(GraphOp::UpsertInstance {
            instance: instance.clone(),
        });
        for (id, properties) in modules {
            ops.push(GraphOp::UpsertModule {
                id: id.clone(),
                properties,
            });
            ops.push(GraphOp::EnsureDeployment {
                instance: instance.clone(),
                module: id,
            });
        }
        for (from, to, since, properties) in links {
            ops.push(GraphOp::LinkDependency {
                from,
                to,
                instance: instance.clone(),
                since: since.unwrap_or_else(|| observed_at.to_string()),
                properties,
            });
        }

        Self { instance, ops }
    }

    /// Number of distinct modules upserted by the plan.
    #[must_use]
    pub fn module_count(&self) -> usize {
        self.ops
            .iter()
            .filter(|op| matches!(op, GraphOp::UpsertModule { .. }))
            .count()
    }

    /// Number of distinct dependency links in the plan.
    #[must_use]
    pub fn link_count(&self) -> usize {
        self.ops
            .iter()
            .filter(|op| matches!(op, GraphOp::LinkDependency { .. }))
            .count()
    }
}

/// A dependency edge that could not be linked because an endpoint is missing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DanglingEdge {
    /// Dependent module
    pub from: ModuleId,
    /// Required module
    pub to: ModuleId,
    /// Endpoints that do not exist in the graph
    pub missing: Vec<ModuleId>,
}

/// Result of applying one merge plan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeOutcome {
    /// Modules upserted
    pub modules_merged: usize,
    /// Deployment pairs ensured
    pub deployments: usize,
    /// Dependency edges linked (created or updated)
    pub edges_merged: usize,
    /// Dependency edges that did not exist before
    pub edges_created: usize,
    /// Existing edges that gained this instance in their attribution
    pub edges_attributed: usize,
    /// Edges skipped because an endpoint is missing
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub dangling: Vec<DanglingEdge>,
}

/// What happened to a single `LinkDependency` op.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkResult {
    /// A new edge was created.
    Created,
    /// The edge existed and the instance was added to its attribution.
    Attributed,
    /// The edge existed and was already attributed to the instance.
    Unchanged,
    /// One or both endpoints are missing.
    Dangling(Vec<ModuleId>),
}

impl MergeOutcome {
    /// Account for one link result.
    pub fn record_link(&mut self, from: &ModuleId, to: &ModuleId, result: LinkResult) {
        match result {
            LinkResult::Created => {
                self.edges_merged += 1;
                self.edges_created += 1;
            }
            LinkResult::Attributed => {
                self.edges_merged += 1;
                self.edges_attributed += 1;
            }
            LinkResult::Unchanged => self.edges_merged += 1,
            LinkResult::Dangling(missing) => {
                tracing::warn!(
                    from = %from,
                    to = %to,
                    missing = ?missing,
                    "Skipping dependency edge with missing endpoint"
                );
                self.dangling.push(DanglingEdge {
                    from: from.clone(),
                    to: to.clone(),
                    missing,
                });
            }
        }
    }
}
