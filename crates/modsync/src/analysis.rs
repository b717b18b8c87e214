//! Dependency cycle analysis.
//!
//! Runs Tarjan's SCC algorithm over the `DEPENDS_ON` edges of a
//! [`ModuleGraph`] and extracts representative elementary cycles from every
//! strongly connected component.
//!
//! # Representative cycles
//!
//! Enumerating every elementary cycle is exponential, so each multi-module
//! SCC is covered instead. The component's adjacency is restricted and
//! sorted once, then two BFS trees are grown from its smallest member (the
//! root): one along edges, one against them. A member's cycle joins its
//! tree path from the root with its tree path back to the root, cut at the
//! first node the two paths share, so every reported cycle is elementary.
//! Members already on a reported cycle are skipped. Self-loops are always
//! reported as one-module cycles.
//!
//! The cost is `O(V + E log E)` per component plus the length of the
//! reported cycles.
//!
//! Every cycle starts at its smallest module ID and follows edge direction;
//! the closing edge back to the first module is implied. The cycle list is
//! sorted, so repeated runs over an unchanged graph give identical results.

use crate::domain::{Dependency, InstanceName, ModuleId};
use crate::graph::ModuleGraph;
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, EdgeIndex, NodeIndex};
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

/// One detected dependency cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Cycle {
    /// Modules in edge order, starting at the smallest ID
    pub modules: Vec<ModuleId>,
    /// Union of the attribution sets of every edge in the cycle
    pub instances: BTreeSet<InstanceName>,
}

/// Result of a cycle analysis run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleAnalysisResult {
    /// Whether any cycle was found
    pub has_cycles: bool,
    /// Module ID sequences, one per cycle
    pub cycles: Vec<Vec<String>>,
    /// Instances contributing an edge to any cycle, sorted
    pub affected_instances: Vec<String>,
    /// Human-readable summary
    pub message: String,
}

/// Summary used when the graph is acyclic.
pub const NO_CYCLES_MESSAGE: &str = "No dependency cycles detected";

type DependencyGraph = DiGraph<ModuleId, Dependency>;

/// Find representative dependency cycles.
#[must_use]
pub fn find_cycles(module_graph: &ModuleGraph) -> Vec<Cycle> {
    let graph = module_graph.dependency_graph();
    let mut cycles = Vec::new();

    for node in graph.node_indices() {
        if let Some(edge) = graph.find_edge(node, node) {
            cycles.push(Cycle {
                modules: vec![graph[node].clone()],
                instances: graph[edge].instances.clone(),
            });
        }
    }

    for scc in tarjan_scc(graph) {
        if scc.len() < 2 {
            continue;
        }
        let component = Component::new(graph, &scc);
        cycles.extend(component.cover().iter().map(|path| component.cycle(path)));
    }

    cycles.sort_by(|a, b| a.modules.cmp(&b.modules));

    tracing::debug!(cycle_count = cycles.len(), "Cycle detection complete");
    cycles
}

/// Run the cycle analysis and build the summary result.
#[must_use]
pub fn analyze(module_graph: &ModuleGraph) -> CycleAnalysisResult {
    let cycles = find_cycles(module_graph);

    if cycles.is_empty() {
        return CycleAnalysisResult {
            has_cycles: false,
            cycles: Vec::new(),
            affected_instances: Vec::new(),
            message: NO_CYCLES_MESSAGE.to_string(),
        };
    }

    let modules: BTreeSet<&ModuleId> = cycles.iter().flat_map(|c| &c.modules).collect();
    let affected: BTreeSet<&InstanceName> = cycles.iter().flat_map(|c| &c.instances).collect();

    let message = format!(
        "Found {} dependency cycle(s) involving {} module(s) across {} instance(s)",
        cycles.len(),
        modules.len(),
        affected.len()
    );

    CycleAnalysisResult {
        has_cycles: true,
        affected_instances: affected.into_iter().map(ToString::to_string).collect(),
        cycles: cycles
            .iter()
            .map(|c| c.modules.iter().map(ToString::to_string).collect())
            .collect(),
        message,
    }
}

/// One strongly connected component with its internal edges, excluding
/// self-loops. Neighbour lists are sorted by module ID.
struct Component<'g> {
    graph: &'g DependencyGraph,
    root: NodeIndex,
    members: Vec<NodeIndex>,
    successors: HashMap<NodeIndex, Vec<NodeIndex>>,
    predecessors: HashMap<NodeIndex, Vec<NodeIndex>>,
    edges: HashMap<(NodeIndex, NodeIndex), EdgeIndex>,
}

impl<'g> Component<'g> {
    fn new(graph: &'g DependencyGraph, scc: &[NodeIndex]) -> Self {
        let by_id = |a: &NodeIndex, b: &NodeIndex| graph[*a].cmp(&graph[*b]);
        let member_set: HashSet<NodeIndex> = scc.iter().copied().collect();

        let mut members = scc.to_vec();
        members.sort_by(by_id);

        let mut successors: HashMap<NodeIndex, Vec<NodeIndex>> = HashMap::new();
        let mut predecessors: HashMap<NodeIndex, Vec<NodeIndex>> = HashMap::new();
        let mut edges = HashMap::new();

        for &from in &members {
            for edge in graph.edges(from) {
                let to = edge.target();
                if to == from || !member_set.contains(&to) {
                    continue;
                }
                successors.entry(from).or_default().push(to);
                predecessors.entry(to).or_default().push(from);
                edges.insert((from, to), edge.id());
            }
        }
        for neighbours in successors.values_mut().chain(predecessors.values_mut()) {
            neighbours.sort_by(by_id);
        }

        Self {
            graph,
            root: members[0],
            members,
            successors,
            predecessors,
            edges,
        }
    }

    /// BFS tree from the root over `adjacency`, as a map from each reached
    /// member to the neighbour it was reached from.
    fn bfs_tree(
        &self,
        adjacency: &HashMap<NodeIndex, Vec<NodeIndex>>,
    ) -> HashMap<NodeIndex, NodeIndex> {
        let mut reached_from = HashMap::with_capacity(self.members.len());
        let mut queue = VecDeque::from([self.root]);

        while let Some(current) = queue.pop_front() {
            for &next in adjacency.get(&current).into_iter().flatten() {
                if next != self.root && !reached_from.contains_key(&next) {
                    reached_from.insert(next, current);
                    queue.push_back(next);
                }
            }
        }

        reached_from
    }

    /// Elementary cycles covering every member, as node paths.
    fn cover(&self) -> Vec<Vec<NodeIndex>> {
        // from_root[v]: predecessor of v on a shortest path root -> v.
        // to_root[v]: successor of v on a shortest path v -> root.
        let from_root = self.bfs_tree(&self.successors);
        let to_root = self.bfs_tree(&self.predecessors);

        let mut covered: HashSet<NodeIndex> = HashSet::new();
        let mut cycles = Vec::new();

        for &start in &self.members {
            if covered.contains(&start) {
                continue;
            }
            let cycle = if start == self.root {
                self.root_cycle(&to_root)
            } else {
                cycle_through(start, &from_root, &to_root)
            };
            if let Some(cycle) = cycle {
                covered.extend(cycle.iter().copied());
                cycles.push(cycle);
            }
        }

        cycles
    }

    /// The root's first successor followed by its path back to the root.
    fn root_cycle(&self, to_root: &HashMap<NodeIndex, NodeIndex>) -> Option<Vec<NodeIndex>> {
        let first = *self.successors.get(&self.root)?.first()?;
        let mut cycle = vec![self.root];
        let mut cursor = Some(first);
        while let Some(node) = cursor {
            cycle.push(node);
            cursor = to_root.get(&node).copied().filter(|next| *next != self.root);
        }
        Some(cycle)
    }

    fn cycle(&self, path: &[NodeIndex]) -> Cycle {
        let mut instances = BTreeSet::new();
        for (i, &from) in path.iter().enumerate() {
            let to = path[(i + 1) % path.len()];
            if let Some(&edge) = self.edges.get(&(from, to)) {
                instances.extend(self.graph[edge].instances.iter().cloned());
            }
        }

        let ids: Vec<ModuleId> = path.iter().map(|&node| self.graph[node].clone()).collect();
        Cycle {
            modules: normalize_cycle(&ids),
            instances,
        }
    }
}

/// Elementary cycle through a non-root member `start`.
///
/// Walks up the `from_root` tree and along the `to_root` tree in lockstep
/// until the walks meet. Both walks end at the root, so they always meet,
/// and the work done is bounded by twice the length of the cycle returned.
fn cycle_through(
    start: NodeIndex,
    from_root: &HashMap<NodeIndex, NodeIndex>,
    to_root: &HashMap<NodeIndex, NodeIndex>,
) -> Option<Vec<NodeIndex>> {
    let mut upstream = vec![start];
    let mut downstream = vec![start];
    let mut upstream_at: HashMap<NodeIndex, usize> = HashMap::from([(start, 0)]);
    let mut downstream_at: HashMap<NodeIndex, usize> = HashMap::from([(start, 0)]);

    loop {
        let up = upstream.last().and_then(|node| from_root.get(node)).copied();
        if let Some(node) = up {
            if let Some(&meet) = downstream_at.get(&node) {
                return Some(join(node, &upstream, &downstream[1..meet]));
            }
            upstream_at.insert(node, upstream.len());
            upstream.push(node);
        }

        let down = downstream.last().and_then(|node| to_root.get(node)).copied();
        if let Some(node) = down {
            if let Some(&meet) = upstream_at.get(&node) {
                return Some(join(node, &upstream[..meet], &downstream[1..]));
            }
            downstream_at.insert(node, downstream.len());
            downstream.push(node);
        }

        if up.is_none() && down.is_none() {
            return None;
        }
    }
}

/// `meet`, then `upstream` reversed (ending at the start node), then `downstream`.
fn join(meet: NodeIndex, upstream: &[NodeIndex], downstream: &[NodeIndex]) -> Vec<NodeIndex> {
    let mut cycle = Vec::with_capacity(1 + upstream.len() + downstream.len());
    cycle.push(meet);
    cycle.extend(upstream.iter().rev());
    cycle.extend_from_slice(downstream);
    cycle
}

/// Rotate a cycle so its smallest module comes first.
fn normalize_cycle<T: Ord + Clone>(cycle: &[T]) -> Vec<T> {
    let Some(min_idx) = cycle
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.cmp(b.1))
        .map(|(idx, _)| idx)
    else {
        return Vec::new();
    };

    let mut normalized = Vec::with_capacity(cycle.len());
    normalized.extend_from_slice(&cycle[min_idx..]);
    normalized.extend_from_slice(&cycle[..min_idx]);
    normalized
}
