//! JSONL-backed graph store.
//!
//! The graph lives in memory and is rewritten to a JSON Lines file after
//! every merge. Each line is one tagged record:
//!
//! ```text
//! {"type":"module","id":"m1","properties":{"name":"Base"}}
//! {"type":"instance","name":"prod-1","deploys":["m1"]}
//! {"type":"depends_on","from":"m2","to":"m1","instances":["prod-1"],"since":"..."}
//! ```
//!
//! Records are written modules first, then instances, then dependencies, each
//! group sorted by key, so saves are deterministic.

use super::GraphStore;
use crate::domain::{
    Dependency, GraphStats, InstanceName, ModuleId, Properties,
};
use crate::error::{Error, Result, StoreError};
use crate::graph::ModuleGraph;
use crate::merge::{MergeOutcome, MergePlan};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::Mutex;

/// One line of the JSONL file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum GraphRecord {
    Module {
        id: ModuleId,
        #[serde(default, skip_serializing_if = "Properties::is_empty")]
        properties: Properties,
    },
    Instance {
        name: InstanceName,
        #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
        deploys: BTreeSet<ModuleId>,
    },
    DependsOn {
        from: ModuleId,
        to: ModuleId,
        instances: BTreeSet<InstanceName>,
        since: String,
        #[serde(default, skip_serializing_if = "Properties::is_empty")]
        properties: Properties,
    },
}

/// Non-fatal problems found while loading a JSONL file.
///
/// The offending line or relationship is skipped; everything else loads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadWarning {
    /// Line that could not be parsed as a graph record.
    MalformedLine {
        /// 1-based line number
        line_number: usize,
        /// Parser error
        error: String,
    },

    /// Instance deploys a module that has no module record.
    DanglingDeployment {
        /// Deploying instance
        instance: InstanceName,
        /// Missing module
        module: ModuleId,
    },

    /// Dependency references a module that has no module record.
    DanglingDependency {
        /// Dependent module
        from: ModuleId,
        /// Required module
        to: ModuleId,
    },
}

/// Graph store persisted to a JSONL file.
#[derive(Debug)]
pub struct JsonlStore {
    graph: Mutex<ModuleGraph>,
    path: PathBuf,
}

impl JsonlStore {
    /// Open the store, loading the file if it exists.
    ///
    /// A missing file yields an empty graph; the file is created on the
    /// first merge.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the file exists but cannot be read.
    pub async fn open(path: impl Into<PathBuf>) -> Result<(Self, Vec<LoadWarning>)> {
        let path = path.into();
        let (graph, warnings) = if path.exists() {
            load_from_jsonl(&path).await?
        } else {
            (ModuleGraph::new(), Vec::new())
        };

        tracing::debug!(
            path = %path.display(),
            modules = graph.stats().modules,
            "Opened JSONL graph store"
        );

        Ok((
            Self {
                graph: Mutex::new(graph),
                path,
            },
            warnings,
        ))
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn reload(&self) -> Result<ModuleGraph> {
        if self.path.exists() {
            Ok(load_from_jsonl(&self.path).await?.0)
        } else {
            Ok(ModuleGraph::new())
        }
    }
}

#[async_trait]
impl GraphStore for JsonlStore {
    async fn ensure_schema(&self) -> Result<()> {
        Ok(())
    }

    async fn apply(&self, plan: &MergePlan) -> Result<MergeOutcome> {
        let mut graph = self.graph.lock().await;
        let before = graph.clone();
        let outcome = graph.apply(plan);

        if let Err(e) = save_to_jsonl(&graph, &self.path).await {
            // Disk state is authoritative; drop the unsaved merge
            tracing::error!(
                instance = %plan.instance,
                error = %e,
                "Failed to persist merge, reloading graph from disk"
            );
            *graph = match self.reload().await {
                Ok(reloaded) => reloaded,
                Err(reload_error) => {
                    tracing::warn!(
                        error = %reload_error,
                        "Reload failed, restoring the graph as it was before the merge"
                    );
                    before
                }
            };
            return Err(e);
        }

        Ok(outcome)
    }

    async fn load_graph(&self) -> Result<ModuleGraph> {
        Ok(self.graph.lock().await.clone())
    }

    async fn stats(&self) -> Result<GraphStats> {
        Ok(self.graph.lock().await.stats())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

fn graph_records(graph: &ModuleGraph) -> Vec<GraphRecord> {
    let modules = graph.modules().map(|m| GraphRecord::Module {
        id: m.id.clone(),
        properties: m.properties.clone(),
    });
    let instances = graph.instances().map(|i| GraphRecord::Instance {
        name: i.name.clone(),
        deploys: i.deploys.clone(),
    });
    let dependencies = graph
        .dependencies()
        .into_iter()
        .map(|(from, to, dep)| GraphRecord::DependsOn {
            from: from.clone(),
            to: to.clone(),
            instances: dep.instances.clone(),
            since: dep.since.clone(),
            properties: dep.properties.clone(),
        });

    modules.chain(instances).chain(dependencies).collect()
}

/// Load a graph from a JSONL file.
///
/// Malformed lines and relationships pointing at unknown modules are skipped
/// and reported as warnings.
///
/// # Errors
///
/// Returns `Error::Io` if the file cannot be read.
pub async fn load_from_jsonl(path: &Path) -> Result<(ModuleGraph, Vec<LoadWarning>)> {
    let file = File::open(path).await?;
    let mut lines = BufReader::new(file).lines();

    let mut warnings = Vec::new();
    let mut records = Vec::new();
    let mut line_number = 0;

    // First pass: parse lines
    while let Some(line) = lines.next_line().await? {
        line_number += 1;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<GraphRecord>(&line) {
            Ok(record) => records.push(record),
            Err(e) => warnings.push(LoadWarning::MalformedLine {
                line_number,
                error: e.to_string(),
            }),
        }
    }

    let mut graph = ModuleGraph::new();

    // Second pass: modules, so relationships can resolve regardless of line order
    for record in &records {
        if let GraphRecord::Module { id, properties } = record {
            graph.upsert_module(id, properties);
        }
    }

    // Third pass: instances and dependencies
    for record in records {
        match record {
            GraphRecord::Module { .. } => {}
            GraphRecord::Instance { name, deploys } => {
                graph.upsert_instance(&name);
                for module in deploys {
                    if graph.module(&module).is_some() {
                        graph.ensure_deployment(&name, &module);
                    } else {
                        warnings.push(LoadWarning::DanglingDeployment {
                            instance: name.clone(),
                            module,
                        });
                    }
                }
            }
            GraphRecord::DependsOn {
                from,
                to,
                instances,
                since,
                properties,
            } => {
                let dependency = Dependency {
                    instances,
                    since,
                    properties,
                };
                if graph.insert_dependency(&from, &to, dependency).is_err() {
                    warnings.push(LoadWarning::DanglingDependency { from, to });
                }
            }
        }
    }

    Ok((graph, warnings))
}

/// Save a graph to a JSONL file with an atomic write.
///
/// Writes to a temporary file first, then renames it over the target, so an
/// interrupted save leaves the previous file intact.
///
/// # Errors
///
/// Returns `Error::Io` on write failure and `StoreError::Serialization` if a
/// record cannot be encoded.
pub async fn save_to_jsonl(graph: &ModuleGraph, path: &Path) -> Result<()> {
    let temp_path = path.with_extension("tmp");

    let file = File::create(&temp_path).await.map_err(Error::Io)?;
    let mut writer = BufWriter::new(file);

    for record in graph_records(graph) {
        let json = serde_json::to_string(&record).map_err(StoreError::Serialization)?;
        writer.write_all(json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
    }

    writer.flush().await?;
    tokio::fs::rename(&temp_path, path).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::normalize_instance;
    use serde_json::json;
    use tempfile::TempDir;

    fn plan(instance: &str, data: serde_json::Value) -> MergePlan {
        let snapshot = normalize_instance(instance, serde_json::from_value(data).unwrap()).unwrap();
        MergePlan::from_snapshot(&snapshot, "2024-01-01T00:00:00+00:00")
    }

    fn sample_plan() -> MergePlan {
        plan(
            "prod-1",
            json!({
                "nodes": [{"id": "m1", "name": "Base", "installable": true}, {"id": "m2", "sequence": 10}],
                "edges": [{"from": "m2", "to": "m1", "since": "2023-01-15"}]
            }),
        )
    }

    #[tokio::test]
    async fn test_merge_persists_and_reopens() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("graph.jsonl");

        let (store, warnings) = JsonlStore::open(&path).await.unwrap();
        assert!(warnings.is_empty());
        store.apply(&sample_plan()).await.unwrap();
        let before = store.load_graph().await.unwrap();
        drop(store);

        let (reopened, warnings) = JsonlStore::open(&path).await.unwrap();
        assert!(warnings.is_empty());
        let after = reopened.load_graph().await.unwrap();

        assert_eq!(before, after);
        assert_eq!(after.stats().dependencies, 1);
        let dep = after
            .dependency(&ModuleId::new("m2"), &ModuleId::new("m1"))
            .unwrap();
        assert_eq!(dep.since, "2023-01-15");
    }

    #[tokio::test]
    async fn test_save_is_deterministic_and_ordered() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("graph.jsonl");

        let (store, _) = JsonlStore::open(&path).await.unwrap();
        store.apply(&sample_plan()).await.unwrap();
        let first = tokio::fs::read_to_string(&path).await.unwrap();

        store.apply(&sample_plan()).await.unwrap();
        let second = tokio::fs::read_to_string(&path).await.unwrap();

        assert_eq!(first, second);
        let kinds: Vec<String> = first
            .lines()
            .map(|l| serde_json::from_str::<serde_json::Value>(l).unwrap()["type"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(kinds, vec!["module", "module", "instance", "depends_on"]);
        assert!(!dir.path().join("graph.tmp").exists());
    }

    #[tokio::test]
    async fn test_resilient_load_reports_warnings() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("graph.jsonl");
        let content = [
            r#"{"type":"module","id":"a"}"#,
            "this is not json",
            r#"{"type":"instance","name":"prod","deploys":["a","ghost"]}"#,
            "",
            r#"{"type":"depends_on","from":"a","to":"missing","instances":["prod"],"since":"t"}"#,
            r#"{"type":"depends_on","from":"a","to":"a","instances":["prod"],"since":"t"}"#,
        ]
        .join("\n");
        tokio::fs::write(&path, content).await.unwrap();

        let (graph, warnings) = load_from_jsonl(&path).await.unwrap();

        assert_eq!(warnings.len(), 3);
        assert!(matches!(warnings[0], LoadWarning::MalformedLine { line_number: 2, .. }));
        assert_eq!(
            warnings[1],
            LoadWarning::DanglingDeployment {
                instance: InstanceName::new("prod"),
                module: ModuleId::new("ghost"),
            }
        );
        assert_eq!(
            warnings[2],
            LoadWarning::DanglingDependency {
                from: ModuleId::new("a"),
                to: ModuleId::new("missing"),
            }
        );

        let stats = graph.stats();
        assert_eq!(stats.modules, 1);
        assert_eq!(stats.instances, 1);
        assert_eq!(stats.deployments, 1);
        assert_eq!(stats.dependencies, 1);
    }

    #[tokio::test]
    async fn test_failed_save_reloads_from_disk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("graph.jsonl");

        let (store, _) = JsonlStore::open(&path).await.unwrap();
        store.apply(&sample_plan()).await.unwrap();

        // A directory at the temp path makes the next save fail
        tokio::fs::create_dir(dir.path().join("graph.tmp")).await.unwrap();

        let result = store
            .apply(&plan("prod-2", json!({"nodes": [{"id": "m3"}]})))
            .await;
        assert!(result.is_err());

        let graph = store.load_graph().await.unwrap();
        assert!(graph.module(&ModuleId::new("m3")).is_none());
        assert!(graph.instance(&InstanceName::new("prod-2")).is_none());
        assert_eq!(graph.stats().modules, 2);
    }

    #[tokio::test]
    async fn test_failed_reload_restores_pre_merge_graph() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("graph.jsonl");

        let (store, _) = JsonlStore::open(&path).await.unwrap();
        store.apply(&sample_plan()).await.unwrap();

        // A directory at the data path fails both the rename and the reload
        tokio::fs::remove_file(&path).await.unwrap();
        tokio::fs::create_dir(&path).await.unwrap();

        let result = store
            .apply(&plan("prod-2", json!({"nodes": [{"id": "m3"}]})))
            .await;
        assert!(result.is_err());

        let graph = store.load_graph().await.unwrap();
        assert!(graph.module(&ModuleId::new("m3")).is_none());
        assert!(graph.instance(&InstanceName::new("prod-2")).is_none());
        assert!(graph.instance(&InstanceName::new("prod-1")).is_some());
        assert_eq!(graph.stats().modules, 2);
    }
}
