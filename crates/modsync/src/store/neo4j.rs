//! Neo4j graph store.
//!
//! Merge plans are translated into Cypher and executed inside one explicit
//! transaction per plan. Identity is enforced by uniqueness constraints on
//! `Module.id` and `Instance.name`; attribution is kept as a list property
//! `instances` on each `DEPENDS_ON` relationship.

use super::GraphStore;
use crate::domain::{
    Dependency, EDGE_INSTANCES_KEY, EDGE_SINCE_KEY, GraphStats, INSTANCE_LABEL, InstanceName,
    MODULE_ID_KEY, MODULE_LABEL, ModuleId, Properties, PropertyValue, RelationshipKind,
};
use crate::error::{Error, Result, StoreError};
use crate::graph::ModuleGraph;
use crate::merge::{GraphOp, LinkResult, MergeOutcome, MergePlan};
use async_trait::async_trait;
use neo4rs::{BoltType, Graph, Query, Row, Txn, query};
use std::collections::HashMap;
use std::sync::LazyLock;

const DEPLOYS: &str = RelationshipKind::Deploys.type_name();
const DEPLOYED_BY: &str = RelationshipKind::DeployedBy.type_name();
const DEPENDS_ON: &str = RelationshipKind::DependsOn.type_name();

/// Key identifying an instance node.
const INSTANCE_NAME_KEY: &str = "name";

static STATEMENTS: LazyLock<Statements> = LazyLock::new(Statements::new);

/// Every Cypher statement the store runs, built from the domain labels.
#[derive(Debug)]
struct Statements {
    constraints: [String; 2],
    upsert_instance: String,
    upsert_module: String,
    ensure_deployment: String,
    check_endpoints: String,
    link_dependency: String,
    load_modules: String,
    load_instances: String,
    load_dependencies: String,
    count_modules: String,
    count_instances: String,
    count_deployments: String,
    count_dependencies: String,
}

impl Statements {
    fn new() -> Self {
        let (module, instance, id, name) =
            (MODULE_LABEL, INSTANCE_LABEL, MODULE_ID_KEY, INSTANCE_NAME_KEY);
        let (since, instances) = (EDGE_SINCE_KEY, EDGE_INSTANCES_KEY);

        Self {
            constraints: [
                format!(
                    "CREATE CONSTRAINT module_id_unique IF NOT EXISTS \
                     FOR (m:{module}) REQUIRE m.{id} IS UNIQUE"
                ),
                format!(
                    "CREATE CONSTRAINT instance_name_unique IF NOT EXISTS \
                     FOR (i:{instance}) REQUIRE i.{name} IS UNIQUE"
                ),
            ],
            upsert_instance: format!("MERGE (:{instance} {{{name}: $name}})"),
            upsert_module: format!("MERGE (m:{module} {{{id}: $id}}) SET m += $props"),
            ensure_deployment: format!(
                "MATCH (i:{instance} {{{name}: $name}}), (m:{module} {{{id}: $id}})
                 MERGE (i)-[:{DEPLOYS}]->(m)
                 MERGE (m)-[:{DEPLOYED_BY}]->(i)"
            ),
            check_endpoints: format!(
                "OPTIONAL MATCH (a:{module} {{{id}: $from}})
                 OPTIONAL MATCH (b:{module} {{{id}: $to}})
                 RETURN a IS NOT NULL AS has_from, b IS NOT NULL AS has_to"
            ),
            // A freshly merged edge is the only one with an empty attribution list
            link_dependency: format!(
                "MATCH (a:{module} {{{id}: $from}}), (b:{module} {{{id}: $to}})
                 MERGE (a)-[r:{DEPENDS_ON}]->(b)
                 ON CREATE SET r.{since} = $since, r.{instances} = []
                 WITH r, size(r.{instances}) = 0 AS created, $instance IN r.{instances} AS known
                 SET r += $props
                 SET r.{instances} = CASE WHEN known THEN r.{instances} ELSE r.{instances} + $instance END
                 RETURN created, known"
            ),
            load_modules: format!("MATCH (m:{module}) RETURN m.{id} AS id, properties(m) AS props"),
            load_instances: format!(
                "MATCH (i:{instance})
                 OPTIONAL MATCH (i)-[:{DEPLOYS}]->(m:{module})
                 RETURN i.{name} AS name, collect(m.{id}) AS modules"
            ),
            load_dependencies: format!(
                "MATCH (a:{module})-[r:{DEPENDS_ON}]->(b:{module})
                 RETURN a.{id} AS from, b.{id} AS to,
                        coalesce(r.{instances}, []) AS instances,
                        coalesce(r.{since}, '') AS since,
                        properties(r) AS props"
            ),
            count_modules: format!("MATCH (m:{module}) RETURN count(m) AS count"),
            count_instances: format!("MATCH (i:{instance}) RETURN count(i) AS count"),
            count_deployments: format!(
                "MATCH (:{instance})-[r:{DEPLOYS}]->(:{module}) RETURN count(r) AS count"
            ),
            count_dependencies: format!(
                "MATCH (:{module})-[r:{DEPENDS_ON}]->(:{module}) RETURN count(r) AS count"
            ),
        }
    }
}

/// Graph store backed by a Neo4j database.
pub struct Neo4jStore {
    graph: Graph,
}

impl std::fmt::Debug for Neo4jStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Neo4jStore").finish_non_exhaustive()
    }
}

impl Neo4jStore {
    /// Connect to the database.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Unavailable` if the connection pool cannot be
    /// created.
    pub async fn connect(uri: &str, username: &str, password: &str) -> Result<Self> {
        let graph = Graph::new(uri, username, password)
            .await
            .map_err(|e| StoreError::Unavailable(format!("{uri}: {e}")))?;
        tracing::info!(uri = %uri, "Connected to Neo4j");
        Ok(Self { graph })
    }

    async fn fetch_all(&self, q: Query) -> Result<Vec<Row>> {
        let mut stream = self.graph.execute(q).await.map_err(store_error)?;
        let mut rows = Vec::new();
        while let Some(row) = stream.next().await.map_err(store_error)? {
            rows.push(row);
        }
        Ok(rows)
    }

    async fn count(&self, cypher: &str) -> Result<usize> {
        let rows = self.fetch_all(query(cypher)).await?;
        let count = match rows.first() {
            Some(row) => get::<i64>(row, "count")?,
            None => 0,
        };
        Ok(usize::try_from(count).unwrap_or_default())
    }
}

#[async_trait]
impl GraphStore for Neo4jStore {
    async fn ensure_schema(&self) -> Result<()> {
        for constraint in &STATEMENTS.constraints {
            self.graph.run(query(constraint)).await.map_err(store_error)?;
        }
        tracing::info!("Ensured Neo4j uniqueness constraints");
        Ok(())
    }

    async fn apply(&self, plan: &MergePlan) -> Result<MergeOutcome> {
        let mut txn = self.graph.start_txn().await.map_err(store_error)?;

        match apply_ops(&mut txn, plan).await {
            Ok(outcome) => {
                txn.commit().await.map_err(store_error)?;
                Ok(outcome)
            }
            Err(e) => {
                tracing::warn!(instance = %plan.instance, error = %e, "Rolling back merge");
                txn.rollback().await.map_err(store_error)?;
                Err(e)
            }
        }
    }

    async fn load_graph(&self) -> Result<ModuleGraph> {
        let mut graph = ModuleGraph::new();

        let modules = self
            .fetch_all(query(&STATEMENTS.load_modules))
            .await?;
        for row in &modules {
            let id = ModuleId::new(get::<String>(row, "id")?);
            let props = get::<HashMap<String, BoltType>>(row, "props")?;
            graph.upsert_module(&id, &from_bolt_map(&props, &[MODULE_ID_KEY]));
        }

        let instances = self
            .fetch_all(query(&STATEMENTS.load_instances))
            .await?;
        for row in &instances {
            let name = InstanceName::new(get::<String>(row, "name")?);
            graph.upsert_instance(&name);
            for module in get::<Vec<String>>(row, "modules")? {
                graph.ensure_deployment(&name, &ModuleId::new(module));
            }
        }

        let edges = self
            .fetch_all(query(&STATEMENTS.load_dependencies))
            .await?;
        for row in &edges {
            let from = ModuleId::new(get::<String>(row, "from")?);
            let to = ModuleId::new(get::<String>(row, "to")?);
            let props = get::<HashMap<String, BoltType>>(row, "props")?;
            let dependency = Dependency {
                instances: get::<Vec<String>>(row, "instances")?
                    .into_iter()
                    .map(InstanceName::new)
                    .collect(),
                since: get::<String>(row, "since")?,
                properties: from_bolt_map(&props, &[EDGE_SINCE_KEY, EDGE_INSTANCES_KEY]),
            };
            if graph.insert_dependency(&from, &to, dependency).is_err() {
                tracing::warn!(from = %from, to = %to, "Skipping DEPENDS_ON with unknown endpoint");
            }
        }

        tracing::debug!(
            modules = modules.len(),
            instances = instances.len(),
            dependencies = edges.len(),
            "Loaded graph from Neo4j"
        );
        Ok(graph)
    }

    async fn stats(&self) -> Result<GraphStats> {
        Ok(GraphStats {
            modules: self.count(&STATEMENTS.count_modules).await?,
            instances: self.count(&STATEMENTS.count_instances).await?,
            deployments: self.count(&STATEMENTS.count_deployments).await?,
            dependencies: self.count(&STATEMENTS.count_dependencies).await?,
        })
    }

    async fn ping(&self) -> Result<()> {
        self.fetch_all(query("RETURN 1 AS ok")).await.map(|_| ())
    }
}

async fn apply_ops(txn: &mut Txn, plan: &MergePlan) -> Result<MergeOutcome> {
    let mut outcome = MergeOutcome::default();

    for op in &plan.ops {
        match op {
            GraphOp::UpsertInstance { instance } => {
                let q = query(&STATEMENTS.upsert_instance).param("name", instance.as_str());
                txn.run(q).await.map_err(store_error)?;
            }
            GraphOp::UpsertModule { id, properties } => {
                let q = query(&STATEMENTS.upsert_module)
                    .param("id", id.as_str())
                    .param("props", to_bolt_map(properties));
                txn.run(q).await.map_err(store_error)?;
                outcome.modules_merged += 1;
            }
            GraphOp::EnsureDeployment { instance, module } => {
                let q = query(&STATEMENTS.ensure_deployment)
                    .param("name", instance.as_str())
                    .param("id", module.as_str());
                txn.run(q).await.map_err(store_error)?;
                outcome.deployments += 1;
            }
            GraphOp::LinkDependency {
                from,
                to,
                instance,
                since,
                properties,
            } => {
                let result = link_dependency(txn, from, to, instance, since, properties).await?;
                outcome.record_link(from, to, result);
            }
        }
    }

    Ok(outcome)
}

async fn link_dependency(
    txn: &mut Txn,
    from: &ModuleId,
    to: &ModuleId,
    instance: &InstanceName,
    since: &str,
    properties: &Properties,
) -> Result<LinkResult> {
    let check = query(&STATEMENTS.check_endpoints)
        .param("from", from.as_str())
        .param("to", to.as_str());
    let row = fetch_one(txn, check).await?;
    let has_from = get::<bool>(&row, "has_from")?;
    let has_to = get::<bool>(&row, "has_to")?;

    if !(has_from && has_to) {
        let mut missing = Vec::new();
        if !has_from {
            missing.push(from.clone());
        }
        if !has_to && from != to {
            missing.push(to.clone());
        }
        return Ok(LinkResult::Dangling(missing));
    }

    let link = query(&STATEMENTS.link_dependency)
        .param("from", from.as_str())
        .param("to", to.as_str())
        .param("since", since)
        .param("instance", instance.as_str())
        .param("props", to_bolt_map(properties));
    let row = fetch_one(txn, link).await?;

    Ok(match (get::<bool>(&row, "created")?, get::<bool>(&row, "known")?) {
        (true, _) => LinkResult::Created,
        (false, false) => LinkResult::Attributed,
        (false, true) => LinkResult::Unchanged,
    })
}

async fn fetch_one(txn: &mut Txn, q: Query) -> Result<Row> {
    let mut stream = txn.execute(q).await.map_err(store_error)?;
    let row = stream.next(txn.handle()).await.map_err(store_error)?;
    row.ok_or_else(|| StoreError::Backend("query returned no rows".to_string()).into())
}

fn get<T: serde::de::DeserializeOwned>(row: &Row, key: &str) -> Result<T> {
    row.get::<T>(key)
        .map_err(|e| StoreError::InvalidFormat(format!("column '{key}': {e}")).into())
}

fn store_error(e: neo4rs::Error) -> Error {
    match e {
        neo4rs::Error::IOError { .. } | neo4rs::Error::ConnectionError => {
            StoreError::Unavailable(e.to_string()).into()
        }
        other => StoreError::Backend(other.to_string()).into(),
    }
}

fn to_bolt(value: &PropertyValue) -> BoltType {
    match value {
        PropertyValue::Bool(b) => (*b).into(),
        PropertyValue::Int(i) => (*i).into(),
        PropertyValue::Float(f) => (*f).into(),
        PropertyValue::String(s) => s.clone().into(),
    }
}

fn to_bolt_map(properties: &Properties) -> HashMap<String, BoltType> {
    properties
        .iter()
        .map(|(k, v)| (k.clone(), to_bolt(v)))
        .collect()
}

fn from_bolt(value: &BoltType) -> Option<PropertyValue> {
    match value {
        BoltType::Boolean(b) => Some(PropertyValue::Bool(b.value)),
        BoltType::Integer(i) => Some(PropertyValue::Int(i.value)),
        BoltType::Float(f) => Some(PropertyValue::Float(f.value)),
        BoltType::String(s) => Some(PropertyValue::String(s.value.clone())),
        _ => None,
    }
}

fn from_bolt_map(props: &HashMap<String, BoltType>, reserved: &[&str]) -> Properties {
    props
        .iter()
        .filter(|(k, _)| !reserved.contains(&k.as_str()))
        .filter_map(|(k, v)| from_bolt(v).map(|value| (k.clone(), value)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statements_use_domain_labels() {
        let statements = Statements::new();

        assert_eq!(
            statements.upsert_instance,
            "MERGE (:Instance {name: $name})"
        );
        assert_eq!(
            statements.upsert_module,
            "MERGE (m:Module {id: $id}) SET m += $props"
        );
        assert!(statements.ensure_deployment.contains("MERGE (i)-[:DEPLOYS]->(m)"));
        assert!(statements.ensure_deployment.contains("MERGE (m)-[:DEPLOYED_BY]->(i)"));
        assert!(statements.link_dependency.contains("MERGE (a)-[r:DEPENDS_ON]->(b)"));
        assert!(
            statements
                .link_dependency
                .contains("ON CREATE SET r.since = $since, r.instances = []")
        );
        assert!(statements.constraints[0].contains("FOR (m:Module) REQUIRE m.id IS UNIQUE"));
        assert!(statements.constraints[1].contains("FOR (i:Instance) REQUIRE i.name IS UNIQUE"));
        assert_eq!(
            statements.count_dependencies,
            "MATCH (:Module)-[r:DEPENDS_ON]->(:Module) RETURN count(r) AS count"
        );
    }

    #[test]
    fn test_property_values_round_trip_through_bolt() {
        let mut props = Properties::new();
        props.insert("name".into(), "Base".into());
        props.insert("sequence".into(), 10.into());
        props.insert("installable".into(), true.into());
        props.insert("weight".into(), PropertyValue::Float(0.5));

        let bolt = to_bolt_map(&props);
        assert_eq!(from_bolt_map(&bolt, &[]), props);
    }

    #[test]
    fn test_reserved_keys_are_filtered_on_load() {
        let mut bolt = HashMap::new();
        bolt.insert("id".to_string(), BoltType::from("m1".to_string()));
        bolt.insert("name".to_string(), BoltType::from("Base".to_string()));

        let props = from_bolt_map(&bolt, &[MODULE_ID_KEY]);
        assert_eq!(props.len(), 1);
        assert!(props.contains_key("name"));
    }
}
