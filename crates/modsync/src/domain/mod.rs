//! Domain types for the global module dependency graph.
//!
//! This module contains the identity keys, property bags and node/edge
//! payloads shared by the normalizer, the merger, the analyzer and every
//! store backend.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Node label for modules in the persisted graph.
pub const MODULE_LABEL: &str = "Module";

/// Node label for instances in the persisted graph.
pub const INSTANCE_LABEL: &str = "Instance";

/// Key reserved for a module's identity in node records.
pub const MODULE_ID_KEY: &str = "id";

/// Keys reserved on edge records.
pub const EDGE_FROM_KEY: &str = "from";
/// See [`EDGE_FROM_KEY`].
pub const EDGE_TO_KEY: &str = "to";
/// Observed-at metadata, applied only when the edge is created.
pub const EDGE_SINCE_KEY: &str = "since";
/// Attribution set, owned by the merger.
pub const EDGE_INSTANCES_KEY: &str = "instances";

/// Globally unique identifier of a module.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModuleId(pub String);

impl ModuleId {
    /// Create a new module ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ModuleId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ModuleId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Unique name of a deployed instance.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceName(pub String);

impl InstanceName {
    /// Create a new instance name
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Borrow the raw name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for InstanceName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for InstanceName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Scalar property value carried by modules and dependency edges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    /// Boolean flag
    Bool(bool),
    /// Signed integer
    Int(i64),
    /// Floating point number
    Float(f64),
    /// Text
    String(String),
}

impl PropertyValue {
    /// Convert a JSON value into a property value.
    ///
    /// Returns `None` for `null`, arrays and objects; callers decide whether
    /// that is an error.
    #[must_use]
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Bool(b) => Some(Self::Bool(*b)),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(Self::Int)
                .or_else(|| n.as_f64().map(Self::Float)),
            serde_json::Value::String(s) => Some(Self::String(s.clone())),
            serde_json::Value::Null
            | serde_json::Value::Array(_)
            | serde_json::Value::Object(_) => None,
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::String(s) => write!(f, "{s}"),
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<i64> for PropertyValue {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<bool> for PropertyValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

/// Property bag with deterministic key order.
pub type Properties = BTreeMap<String, PropertyValue>;

/// Merge `incoming` onto `target` with last-write-wins per key.
///
/// Returns `true` if any value was added or changed.
pub fn merge_properties(target: &mut Properties, incoming: &Properties) -> bool {
    let mut changed = false;
    for (key, value) in incoming {
        if target.get(key) != Some(value) {
            target.insert(key.clone(), value.clone());
            changed = true;
        }
    }
    changed
}

/// A software unit in the global graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Module {
    /// Identity key
    pub id: ModuleId,

    /// Merged properties (name, version, ...)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: Properties,

    /// Instances deploying this module (the `DEPLOYED_BY` side).
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub deployed_by: BTreeSet<InstanceName>,
}

impl Module {
    /// Create a module with no properties and no deployments.
    pub fn new(id: impl Into<ModuleId>) -> Self {
        Self {
            id: id.into(),
            properties: Properties::new(),
            deployed_by: BTreeSet::new(),
        }
    }
}

/// A deployment hosting a set of modules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    /// Identity key
    pub name: InstanceName,

    /// Modules deployed by this instance (the `DEPLOYS` side).
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub deploys: BTreeSet<ModuleId>,
}

impl Instance {
    /// Create an instance with no deployments.
    pub fn new(name: impl Into<InstanceName>) -> Self {
        Self {
            name: name.into(),
            deploys: BTreeSet::new(),
        }
    }
}

/// Payload of a `DEPENDS_ON` relationship.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dependency {
    /// Instances that observed this dependency.
    pub instances: BTreeSet<InstanceName>,

    /// When the dependency was first observed.
    pub since: String,

    /// Additional edge properties, last write wins.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: Properties,
}

/// Relationship kinds of the persisted graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationshipKind {
    /// Instance -> Module
    Deploys,
    /// Module -> Instance
    DeployedBy,
    /// Module -> Module
    DependsOn,
}

impl RelationshipKind {
    /// Relationship type name used by graph databases.
    #[must_use]
    pub const fn type_name(self) -> &'static str {
        match self {
            Self::Deploys => "DEPLOYS",
            Self::DeployedBy => "DEPLOYED_BY",
            Self::DependsOn => "DEPENDS_ON",
        }
    }
}

impl fmt::Display for RelationshipKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

/// Node and relationship counts of a graph.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphStats {
    /// Number of `Module` nodes
    pub modules: usize,
    /// Number of `Instance` nodes
    pub instances: usize,
    /// Number of Deploys/DeployedBy pairs
    pub deployments: usize,
    /// Number of `DEPENDS_ON` relationships
    pub dependencies: usize,
}
