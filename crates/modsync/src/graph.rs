//! The in-memory global module graph.
//!
//! [`ModuleGraph`] holds every Module and Instance node plus the attributed
//! `DEPENDS_ON` edges between modules. Dependency edges live in a petgraph
//! `DiGraph` so the cycle analyzer can run graph algorithms on them directly.
//!
//! # Edge direction
//!
//! Edges point from the **dependent** module to the module it **requires**:
//! `A -> B` means "A depends on B". At most one edge exists per ordered pair.

use crate::domain::{
    Dependency, GraphStats, Instance, InstanceName, Module, ModuleId, Properties, merge_properties,
};
use crate::merge::{GraphOp, LinkResult, MergeOutcome, MergePlan};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// The merged graph of all modules, instances and dependencies.
#[derive(Debug, Clone, Default)]
pub struct ModuleGraph {
    /// Modules indexed by ID
    modules: BTreeMap<ModuleId, Module>,

    /// Instances indexed by name
    instances: BTreeMap<InstanceName, Instance>,

    /// Dependency graph. Nodes are module IDs, edges carry attribution.
    graph: DiGraph<ModuleId, Dependency>,

    /// Mapping from `ModuleId` to graph `NodeIndex`.
    ///
    /// Every module in `self.modules` has an entry here.
    node_map: HashMap<ModuleId, NodeIndex>,
}

impl ModuleGraph {
    /// Create an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the instance node if missing. Returns `true` if it was created.
    pub fn upsert_instance(&mut self, name: &InstanceName) -> bool {
        if self.instances.contains_key(name) {
            return false;
        }
        self.instances
            .insert(name.clone(), Instance::new(name.clone()));
        true
    }

    /// Create the module node if missing and merge `properties` onto it.
    ///
    /// Returns `true` if the module was created.
    pub fn upsert_module(&mut self, id: &ModuleId, properties: &Properties) -> bool {
        if let Some(module) = self.modules.get_mut(id) {
            merge_properties(&mut module.properties, properties);
            return false;
        }

        let mut module = Module::new(id.clone());
        module.properties.clone_from(properties);
        self.modules.insert(id.clone(), module);
        let node = self.graph.add_node(id.clone());
        self.node_map.insert(id.clone(), node);
        true
    }

    /// Ensure the `DEPLOYS` / `DEPLOYED_BY` pair between an instance and a module.
    ///
    /// Missing endpoints are created, so both directions always exist together.
    /// Returns `true` if the pair was newly created.
    pub fn ensure_deployment(&mut self, instance: &InstanceName, module: &ModuleId) -> bool {
        self.upsert_instance(instance);
        self.upsert_module(module, &Properties::new());

        let deploys = self
            .instances
            .get_mut(instance)
            .is_some_and(|i| i.deploys.insert(module.clone()));
        let deployed_by = self
            .modules
            .get_mut(module)
            .is_some_and(|m| m.deployed_by.insert(instance.clone()));
        deploys || deployed_by
    }

    /// Upsert the `DEPENDS_ON` edge `from -> to` and attribute it to `instance`.
    ///
    /// `since` and `properties` apply as follows: `since` is set only when the
    /// edge is created, properties merge with last-write-wins. Nothing is
    /// created when an endpoint is missing.
    pub fn link_dependency(
        &mut self,
        from: &ModuleId,
        to: &ModuleId,
        instance: &InstanceName,
        since: &str,
        properties: &Properties,
    ) -> LinkResult {
        let (from_node, to_node) = match (self.node_map.get(from), self.node_map.get(to)) {
            (Some(&f), Some(&t)) => (f, t),
            (f, t) => {
                let mut missing = Vec::new();
                if f.is_none() {
                    missing.push(from.clone());
                }
                if t.is_none() && from != to {
                    missing.push(to.clone());
                }
                return LinkResult::Dangling(missing);
            }
        };

        if let Some(edge) = self.graph.find_edge(from_node, to_node) {
            let dependency = &mut self.graph[edge];
            merge_properties(&mut dependency.properties, properties);
            if dependency.instances.insert(instance.clone()) {
                LinkResult::Attributed
            } else {
                LinkResult::Unchanged
            }
        } else {
            self.graph.add_edge(
                from_node,
                to_node,
                Dependency {
                    instances: BTreeSet::from([instance.clone()]),
                    since: since.to_string(),
                    properties: properties.clone(),
                },
            );
            LinkResult::Created
        }
    }

    /// Insert a fully formed dependency edge, replacing any existing one.
    ///
    /// Used when loading persisted graphs.
    ///
    /// # Errors
    ///
    /// Returns the missing endpoints if either module does not exist.
    pub fn insert_dependency(
        &mut self,
        from: &ModuleId,
        to: &ModuleId,
        dependency: Dependency,
    ) -> Result<(), Vec<ModuleId>> {
        let (Some(&from_node), Some(&to_node)) = (self.node_map.get(from), self.node_map.get(to))
        else {
            let missing = [from, to]
                .into_iter()
                .filter(|id| !self.node_map.contains_key(*id))
                .cloned()
                .collect::<BTreeSet<_>>();
            return Err(missing.into_iter().collect());
        };
        self.graph.update_edge(from_node, to_node, dependency);
        Ok(())
    }

    /// Execute a merge plan.
    pub fn apply(&mut self, plan: &MergePlan) -> MergeOutcome {
        let mut outcome = MergeOutcome::default();

        for op in &plan.ops {
            match op {
                GraphOp::UpsertInstance { instance } => {
                    self.upsert_instance(instance);
                }
                GraphOp::UpsertModule { id, properties } => {
                    self.upsert_module(id, properties);
                    outcome.modules_merged += 1;
                }
                GraphOp::EnsureDeployment { instance, module } => {
                    self.ensure_deployment(instance, module);
                    outcome.deployments += 1;
                }
                GraphOp::LinkDependency {
                    from,
                    to,
                    instance,
                    since,
                    properties,
                } => {
                    let result = self.link_dependency(from, to, instance, since, properties);
                    outcome.record_link(from, to, result);
                }
            }
        }

        outcome
    }

    /// Look up a module by ID.
    #[must_use]
    pub fn module(&self, id: &ModuleId) -> Option<&Module> {
        self.modules.get(id)
    }

    /// Look up an instance by name.
    #[must_use]
    pub fn instance(&self, name: &InstanceName) -> Option<&Instance> {
        self.instances.get(name)
    }

    /// All modules in ID order.
    pub fn modules(&self) -> impl Iterator<Item = &Module> {
        self.modules.values()
    }

    /// All instances in name order.
    pub fn instances(&self) -> impl Iterator<Item = &Instance> {
        self.instances.values()
    }

    /// Look up the dependency edge `from -> to`.
    #[must_use]
    pub fn dependency(&self, from: &ModuleId, to: &ModuleId) -> Option<&Dependency> {
        let from_node = *self.node_map.get(from)?;
        let to_node = *self.node_map.get(to)?;
        self.graph
            .find_edge(from_node, to_node)
            .map(|edge| &self.graph[edge])
    }

    /// All dependency edges, sorted by `(from, to)`.
    #[must_use]
    pub fn dependencies(&self) -> Vec<(&ModuleId, &ModuleId, &Dependency)> {
        let mut edges: Vec<_> = self
            .graph
            .edge_references()
            .map(|edge| {
                (
                    &self.graph[edge.source()],
                    &self.graph[edge.target()],
                    edge.weight(),
                )
            })
            .collect();
        edges.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));
        edges
    }

    /// Node and relationship counts.
    #[must_use]
    pub fn stats(&self) -> GraphStats {
        GraphStats {
            modules: self.modules.len(),
            instances: self.instances.len(),
            deployments: self.instances.values().map(|i| i.deploys.len()).sum(),
            dependencies: self.graph.edge_count(),
        }
    }

    /// Returns `true` if the graph has no nodes at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty() && self.instances.is_empty()
    }

    /// The underlying dependency graph.
    pub(crate) fn dependency_graph(&self) -> &DiGraph<ModuleId, Dependency> {
        &self.graph
    }
}

/// Graphs are equal when they hold the same nodes, deployments and edges,
/// regardless of insertion order.
impl PartialEq for ModuleGraph {
    fn eq(&self, other: &Self) -> bool {
        self.modules == other.modules
            && self.instances == other.instances
            && self.dependencies() == other.dependencies()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PropertyValue;

    fn id(s: &str) -> ModuleId {
        ModuleId::new(s)
    }

    fn inst(s: &str) -> InstanceName {
        InstanceName::new(s)
    }

    fn props(pairs: &[(&str, &str)]) -> Properties {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), PropertyValue::from(*v)))
            .collect()
    }

    fn graph_with_modules(ids: &[&str]) -> ModuleGraph {
        let mut graph = ModuleGraph::new();
        for m in ids {
            graph.upsert_module(&id(m), &Properties::new());
        }
        graph
    }

    #[test]
    fn test_upsert_module_merges_properties() {
        let mut graph = ModuleGraph::new();

        assert!(graph.upsert_module(&id("m1"), &props(&[("name", "Base"), ("version", "1.0")])));
        assert!(!graph.upsert_module(&id("m1"), &props(&[("version", "2.0")])));

        let module = graph.module(&id("m1")).unwrap();
        assert_eq!(module.properties["name"], PropertyValue::from("Base"));
        assert_eq!(module.properties["version"], PropertyValue::from("2.0"));
        assert_eq!(graph.stats().modules, 1);
    }

    #[test]
    fn test_deployment_pair_is_created_together() {
        let mut graph = ModuleGraph::new();
        graph.upsert_instance(&inst("prod"));
        graph.upsert_module(&id("m1"), &Properties::new());

        assert!(graph.ensure_deployment(&inst("prod"), &id("m1")));
        assert!(!graph.ensure_deployment(&inst("prod"), &id("m1")));

        assert!(graph.instance(&inst("prod")).unwrap().deploys.contains(&id("m1")));
        assert!(graph.module(&id("m1")).unwrap().deployed_by.contains(&inst("prod")));
        assert_eq!(graph.stats().deployments, 1);
    }

    #[test]
    fn test_link_widens_attribution_without_duplicating_edges() {
        let mut graph = graph_with_modules(&["m1", "m2"]);

        let first = graph.link_dependency(&id("m2"), &id("m1"), &inst("x"), "t1", &Properties::new());
        let second = graph.link_dependency(&id("m2"), &id("m1"), &inst("y"), "t2", &Properties::new());
        let third = graph.link_dependency(&id("m2"), &id("m1"), &inst("y"), "t3", &Properties::new());

        assert_eq!(first, LinkResult::Created);
        assert_eq!(second, LinkResult::Attributed);
        assert_eq!(third, LinkResult::Unchanged);

        let dep = graph.dependency(&id("m2"), &id("m1")).unwrap();
        assert_eq!(dep.instances, BTreeSet::from([inst("x"), inst("y")]));
        assert_eq!(dep.since, "t1");
        assert_eq!(graph.stats().dependencies, 1);
    }

    #[test]
    fn test_dangling_link_creates_nothing() {
        let mut graph = graph_with_modules(&["m1"]);

        let result = graph.link_dependency(&id("m1"), &id("ghost"), &inst("x"), "t", &Properties::new());

        assert_eq!(result, LinkResult::Dangling(vec![id("ghost")]));
        assert!(graph.module(&id("ghost")).is_none());
        assert_eq!(graph.stats().dependencies, 0);
    }

    #[test]
    fn test_dangling_self_loop_reports_endpoint_once() {
        let mut graph = ModuleGraph::new();
        let result = graph.link_dependency(&id("a"), &id("a"), &inst("x"), "t", &Properties::new());
        assert_eq!(result, LinkResult::Dangling(vec![id("a")]));
    }

    #[test]
    fn test_self_loop_is_stored() {
        let mut graph = graph_with_modules(&["a"]);
        let result = graph.link_dependency(&id("a"), &id("a"), &inst("x"), "t", &Properties::new());
        assert_eq!(result, LinkResult::Created);
        assert!(graph.dependency(&id("a"), &id("a")).is_some());
    }

    #[test]
    fn test_insert_dependency_reports_missing_endpoints() {
        let mut graph = graph_with_modules(&["a"]);
        let dep = Dependency {
            instances: BTreeSet::from([inst("x")]),
            since: "t".into(),
            properties: Properties::new(),
        };

        assert_eq!(
            graph.insert_dependency(&id("b"), &id("c"), dep.clone()),
            Err(vec![id("b"), id("c")])
        );
        graph.upsert_module(&id("b"), &Properties::new());
        assert!(graph.insert_dependency(&id("a"), &id("b"), dep).is_ok());
        assert_eq!(graph.stats().dependencies, 1);
    }

    #[test]
    fn test_equality_ignores_insertion_order() {
        let mut left = graph_with_modules(&["a", "b"]);
        let mut right = graph_with_modules(&["b", "a"]);
        left.link_dependency(&id("a"), &id("b"), &inst("x"), "t", &Properties::new());
        right.link_dependency(&id("a"), &id("b"), &inst("x"), "t", &Properties::new());

        assert_eq!(left, right);

        right.link_dependency(&id("b"), &id("a"), &inst("x"), "t", &Properties::new());
        assert_ne!(left, right);
    }

    #[test]
    fn test_dependencies_are_sorted() {
        let mut graph = graph_with_modules(&["c", "a", "b"]);
        graph.link_dependency(&id("c"), &id("a"), &inst("x"), "t", &Properties::new());
        graph.link_dependency(&id("a"), &id("c"), &inst("x"), "t", &Properties::new());
        graph.link_dependency(&id("a"), &id("b"), &inst("x"), "t", &Properties::new());

        let pairs: Vec<_> = graph
            .dependencies()
            .into_iter()
            .map(|(f, t, _)| (f.as_str(), t.as_str()))
            .collect();
        assert_eq!(pairs, vec![("a", "b"), ("a", "c"), ("c", "a")]);
    }
}
