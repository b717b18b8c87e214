//! Property tests for merge idempotence and commutativity.

use modsync::domain::{InstanceName, ModuleId, Properties, PropertyValue};
use modsync::graph::ModuleGraph;
use modsync::merge::MergePlan;
use modsync::snapshot::{EdgeRecord, ModuleRecord, Snapshot};
use proptest::prelude::*;

const OBSERVED_AT: &str = "2024-01-01T00:00:00Z";

fn module_id() -> impl Strategy<Value = ModuleId> {
    (0..6u8).prop_map(|i| ModuleId::new(format!("m{i}")))
}

fn properties() -> impl Strategy<Value = Properties> {
    prop::collection::btree_map(
        prop::sample::select(vec!["name", "version", "state"]),
        "[a-z0-9.]{1,6}",
        0..3,
    )
    .prop_map(|map| {
        map.into_iter()
            .map(|(k, v)| (k.to_string(), PropertyValue::String(v)))
            .collect()
    })
}

fn snapshot(instance: &'static str, with_properties: bool) -> impl Strategy<Value = Snapshot> {
    let module = (module_id(), properties()).prop_map(move |(id, properties)| ModuleRecord {
        id,
        properties: if with_properties {
            properties
        } else {
            Properties::new()
        },
    });
    let edge = (module_id(), module_id()).prop_map(|(from, to)| EdgeRecord {
        from,
        to,
        since: None,
        properties: Properties::new(),
    });

    (
        prop::collection::vec(module, 0..8),
        prop::collection::vec(edge, 0..12),
    )
        .prop_map(move |(modules, edges)| Snapshot {
            instance: InstanceName::new(instance),
            modules,
            edges,
        })
}

fn merged(snapshots: &[&Snapshot]) -> ModuleGraph {
    let mut graph = ModuleGraph::new();
    for snapshot in snapshots {
        graph.apply(&MergePlan::from_snapshot(snapshot, OBSERVED_AT));
    }
    graph
}

proptest! {
    #[test]
    fn ingesting_twice_equals_ingesting_once(snapshot in snapshot("X", true)) {
        let once = merged(&[&snapshot]);
        let twice = merged(&[&snapshot, &snapshot]);
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn instance_order_does_not_change_structure(
        a in snapshot("A", false),
        b in snapshot("B", false),
    ) {
        let ab = merged(&[&a, &b]);
        let ba = merged(&[&b, &a]);
        prop_assert_eq!(ab, ba);
    }

    #[test]
    fn dangling_edges_never_create_modules(snapshot in snapshot("X", false)) {
        let graph = merged(&[&snapshot]);
        let declared: std::collections::BTreeSet<_> =
            snapshot.modules.iter().map(|m| m.id.clone()).collect();

        prop_assert_eq!(graph.stats().modules, declared.len());
        for (from, to, dep) in graph.dependencies() {
            prop_assert!(declared.contains(from));
            prop_assert!(declared.contains(to));
            prop_assert!(dep.instances.contains(&InstanceName::new("X")));
        }
    }
}
