//! End-to-end ingest and analysis scenarios against the in-memory store.

use modsync::domain::{InstanceName, ModuleId};
use modsync::service::{InstanceReport, ServiceOptions, SyncService};
use modsync::snapshot::{IngestRequest, InstancePayload};
use modsync::store::{GraphStore, new_in_memory_store};
use rstest::rstest;
use serde_json::{Value, json};
use std::collections::BTreeSet;
use std::sync::Arc;

fn service() -> SyncService {
    SyncService::new(Arc::new(new_in_memory_store()), ServiceOptions::default())
}

fn batch(value: Value) -> Vec<InstancePayload> {
    serde_json::from_value::<IngestRequest>(value)
        .unwrap()
        .into_payloads()
}

fn instance(name: &str, nodes: &[&str], edges: &[(&str, &str)]) -> Value {
    json!({
        "instance": name,
        "status": "success",
        "data": {
            "nodes": nodes.iter().map(|id| json!({"id": id})).collect::<Vec<_>>(),
            "edges": edges.iter().map(|(f, t)| json!({"from": f, "to": t})).collect::<Vec<_>>(),
        }
    })
}

fn set(names: &[&str]) -> BTreeSet<InstanceName> {
    names.iter().map(|n| InstanceName::new(*n)).collect()
}

#[tokio::test]
async fn prod_instance_end_to_end() {
    let service = service();

    let report = service
        .ingest(batch(json!({
            "instances_data": [{
                "instance": "prod-1",
                "status": "success",
                "data": {
                    "nodes": [
                        {"id": "m1", "name": "Base", "version": "1.0"},
                        {"id": "m2", "name": "Sales", "version": "1.0"}
                    ],
                    "edges": [{"from": "m2", "to": "m1"}]
                }
            }]
        })))
        .await
        .unwrap();

    assert_eq!(report.status, "success");
    assert!(report.message.starts_with("Data from 1 instances ingested successfully"));
    assert_eq!(report.nodes_merged, 2);
    assert_eq!(report.edges_merged, 1);

    let graph = service.store().load_graph().await.unwrap();
    let stats = graph.stats();
    assert_eq!(stats.instances, 1);
    assert_eq!(stats.modules, 2);
    assert_eq!(stats.deployments, 2);
    assert_eq!(stats.dependencies, 1);

    let dep = graph
        .dependency(&ModuleId::new("m2"), &ModuleId::new("m1"))
        .unwrap();
    assert_eq!(dep.instances, set(&["prod-1"]));
    assert!(!dep.since.is_empty());

    let analysis = service.analyze().await.unwrap();
    assert!(!analysis.has_cycles);
    assert!(analysis.cycles.is_empty());
    assert!(analysis.affected_instances.is_empty());
}

#[tokio::test]
async fn attribution_is_the_union_of_observing_instances() {
    let service = service();

    service
        .ingest(batch(json!([instance("X", &["m1", "m2"], &[("m2", "m1")])])))
        .await
        .unwrap();
    service
        .ingest(batch(json!([instance("Y", &["m1", "m2"], &[("m2", "m1")])])))
        .await
        .unwrap();

    let graph = service.store().load_graph().await.unwrap();
    assert_eq!(graph.stats().dependencies, 1);
    let dep = graph
        .dependency(&ModuleId::new("m2"), &ModuleId::new("m1"))
        .unwrap();
    assert_eq!(dep.instances, set(&["X", "Y"]));
}

#[tokio::test]
async fn dangling_edge_creates_no_module() {
    let service = service();

    let report = service
        .ingest(batch(json!([instance("X", &["m1"], &[("m1", "m9")])])))
        .await
        .unwrap();

    let InstanceReport::Merged { dangling_edges, .. } = &report.instances[0] else {
        panic!("expected merged instance, got {:?}", report.instances[0]);
    };
    assert_eq!(dangling_edges.len(), 1);
    assert_eq!(dangling_edges[0].from, ModuleId::new("m1"));
    assert_eq!(dangling_edges[0].to, ModuleId::new("m9"));

    let graph = service.store().load_graph().await.unwrap();
    assert!(graph.module(&ModuleId::new("m9")).is_none());
    assert_eq!(graph.stats().dependencies, 0);
}

#[tokio::test]
async fn edge_endpoint_from_earlier_ingest_resolves() {
    let service = service();

    service
        .ingest(batch(json!([instance("X", &["m1"], &[])])))
        .await
        .unwrap();
    let report = service
        .ingest(batch(json!([instance("Y", &["m2"], &[("m2", "m1")])])))
        .await
        .unwrap();

    assert_eq!(report.edges_merged, 1);
}

#[tokio::test]
async fn reingesting_the_same_batch_is_idempotent() {
    let service = service();
    let payload = json!([
        instance("X", &["a", "b", "c"], &[("a", "b"), ("b", "c")]),
        instance("Y", &["b", "c"], &[("b", "c")])
    ]);

    service.ingest(batch(payload.clone())).await.unwrap();
    let first = service.store().load_graph().await.unwrap();

    service.ingest(batch(payload)).await.unwrap();
    let second = service.store().load_graph().await.unwrap();

    assert_eq!(first.stats(), second.stats());
    for (from, to, dep) in first.dependencies() {
        assert_eq!(second.dependency(from, to).map(|d| &d.instances), Some(&dep.instances));
    }
}

#[tokio::test]
async fn failed_instance_does_not_block_siblings() {
    let service = service();

    let report = service
        .ingest(batch(json!([
            {"instance": "broken", "status": "error", "error": "odoo unreachable"},
            instance("ok", &["m1"], &[])
        ])))
        .await
        .unwrap();

    assert_eq!(report.instances_received, 2);
    assert_eq!(report.instances_processed, 1);
    assert!(matches!(
        &report.instances[0],
        InstanceReport::Skipped { reason, .. } if reason.contains("odoo unreachable")
    ));

    let graph = service.store().load_graph().await.unwrap();
    assert!(graph.instance(&InstanceName::new("broken")).is_none());
    assert!(graph.instance(&InstanceName::new("ok")).is_some());
}

#[rstest]
#[case::three_cycle(
    &[("A", "B"), ("B", "C"), ("C", "A")],
    vec![vec!["A", "B", "C"]]
)]
#[case::dag(&[("A", "B"), ("B", "C"), ("A", "C")], vec![])]
#[case::self_loop(&[("A", "A")], vec![vec!["A"]])]
#[case::two_disjoint_cycles(
    &[("A", "B"), ("B", "A"), ("C", "D"), ("D", "C")],
    vec![vec!["A", "B"], vec!["C", "D"]]
)]
#[tokio::test]
async fn cycle_analysis_scenarios(
    #[case] edges: &[(&str, &str)],
    #[case] expected: Vec<Vec<&str>>,
) {
    let service = service();
    service
        .ingest(batch(json!([instance("inst-1", &["A", "B", "C", "D"], edges)])))
        .await
        .unwrap();

    let result = service.analyze().await.unwrap();

    assert_eq!(result.has_cycles, !expected.is_empty());
    assert_eq!(result.cycles, expected);
    if result.has_cycles {
        assert_eq!(result.affected_instances, vec!["inst-1"]);
    } else {
        assert_eq!(result.message, "No dependency cycles detected");
    }
}

#[tokio::test]
async fn cycle_spanning_instances_lists_every_contributor() {
    let service = service();
    service
        .ingest(batch(json!([
            instance("inst-1", &["A", "B"], &[("A", "B")]),
            instance("inst-2", &["A", "B"], &[("B", "A")]),
            instance("inst-3", &["C"], &[])
        ])))
        .await
        .unwrap();

    let result = service.analyze().await.unwrap();

    assert!(result.has_cycles);
    assert_eq!(result.cycles, vec![vec!["A", "B"]]);
    assert_eq!(result.affected_instances, vec!["inst-1", "inst-2"]);
    assert_eq!(
        result.message,
        "Found 1 dependency cycle(s) involving 2 module(s) across 2 instance(s)"
    );
}

#[tokio::test]
async fn properties_merge_last_write_wins() {
    let service = service();
    service
        .ingest(batch(json!([{
            "instance": "X",
            "status": "success",
            "data": {"nodes": [{"id": "m1", "name": "Base", "version": "1.0"}]}
        }])))
        .await
        .unwrap();
    service
        .ingest(batch(json!([{
            "instance": "Y",
            "status": "success",
            "data": {"nodes": [{"id": "m1", "version": "2.0", "author": "core"}]}
        }])))
        .await
        .unwrap();

    let graph = service.store().load_graph().await.unwrap();
    let module = graph.module(&ModuleId::new("m1")).unwrap();
    let props = serde_json::to_value(&module.properties).unwrap();
    assert_eq!(props, json!({"name": "Base", "version": "2.0", "author": "core"}));
    assert_eq!(module.deployed_by, set(&["X", "Y"]));
}

#[tokio::test]
async fn concurrent_batch_merges_every_instance() {
    let service = SyncService::new(
        Arc::new(new_in_memory_store()),
        ServiceOptions {
            max_concurrent_merges: 8,
        },
    );
    let payloads: Vec<Value> = (0..32)
        .map(|i| instance(&format!("inst-{i:02}"), &["core", "web"], &[("web", "core")]))
        .collect();

    let report = service.ingest(batch(Value::Array(payloads))).await.unwrap();

    assert_eq!(report.instances_processed, 32);
    assert_eq!(report.instances[0].instance(), "inst-00");
    assert_eq!(report.instances[31].instance(), "inst-31");

    let stats = service.stats().await.unwrap();
    assert_eq!(stats.instances, 32);
    assert_eq!(stats.dependencies, 1);
}
