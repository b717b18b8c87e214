//! In-memory graph store.
//!
//! The store is an `Arc<Mutex<ModuleGraph>>`. Each merge plan runs inside a
//! single critical section, which makes plan application atomic with respect
//! to every other store operation.

use super::GraphStore;
use crate::domain::GraphStats;
use crate::error::Result;
use crate::graph::ModuleGraph;
use crate::merge::{MergeOutcome, MergePlan};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Thread-safe in-memory store.
pub type InMemoryStore = Arc<Mutex<ModuleGraph>>;

/// Create a new empty in-memory store.
#[must_use]
pub fn new_in_memory_store() -> InMemoryStore {
    Arc::new(Mutex::new(ModuleGraph::new()))
}

#[async_trait]
impl GraphStore for InMemoryStore {
    async fn ensure_schema(&self) -> Result<()> {
        // Identity is enforced by the graph's maps
        Ok(())
    }

    async fn apply(&self, plan: &MergePlan) -> Result<MergeOutcome> {
        let mut graph = self.lock().await;
        Ok(graph.apply(plan))
    }

    async fn load_graph(&self) -> Result<ModuleGraph> {
        Ok(self.lock().await.clone())
    }

    async fn stats(&self) -> Result<GraphStats> {
        Ok(self.lock().await.stats())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{InstanceName, ModuleId};
    use crate::snapshot::normalize_instance;
    use serde_json::json;

    fn plan(instance: &str, data: serde_json::Value) -> MergePlan {
        let snapshot = normalize_instance(instance, serde_json::from_value(data).unwrap()).unwrap();
        MergePlan::from_snapshot(&snapshot, "2024-01-01T00:00:00+00:00")
    }

    #[tokio::test]
    async fn test_apply_and_load() {
        let store = new_in_memory_store();
        let outcome = store
            .apply(&plan(
                "prod-1",
                json!({
                    "nodes": [{"id": "m1"}, {"id": "m2"}],
                    "edges": [{"from": "m2", "to": "m1"}]
                }),
            ))
            .await
            .unwrap();

        assert_eq!(outcome.modules_merged, 2);
        assert_eq!(outcome.edges_created, 1);

        let graph = store.load_graph().await.unwrap();
        let dep = graph
            .dependency(&ModuleId::new("m2"), &ModuleId::new("m1"))
            .unwrap();
        assert!(dep.instances.contains(&InstanceName::new("prod-1")));
    }

    #[tokio::test]
    async fn test_concurrent_merges_keep_one_edge() {
        let store = new_in_memory_store();
        let data = json!({
            "nodes": [{"id": "m1"}, {"id": "m2"}],
            "edges": [{"from": "m2", "to": "m1"}]
        });

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                let plan = plan(&format!("inst-{i}"), data.clone());
                tokio::spawn(async move { store.apply(&plan).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.modules, 2);
        assert_eq!(stats.instances, 8);
        assert_eq!(stats.dependencies, 1);

        let graph = store.load_graph().await.unwrap();
        let dep = graph
            .dependency(&ModuleId::new("m2"), &ModuleId::new("m1"))
            .unwrap();
        assert_eq!(dep.instances.len(), 8);
    }
}
