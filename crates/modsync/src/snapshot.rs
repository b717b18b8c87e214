//! Snapshot normalization.
//!
//! Incoming ingest payloads are loosely typed: every instance reports its own
//! status and, on success, arbitrary JSON node and edge records. This module
//! turns a batch of such payloads into validated [`Snapshot`]s and keeps a
//! record of every instance it had to skip or reject.
//!
//! Normalization never fails as a whole. A failed or invalid instance only
//! affects its own entry in the result.

use crate::domain::{
    EDGE_FROM_KEY, EDGE_INSTANCES_KEY, EDGE_SINCE_KEY, EDGE_TO_KEY, InstanceName, MODULE_ID_KEY,
    ModuleId, Properties, PropertyValue,
};
use crate::error::{RecordRef, ValidationError, ValidationErrorKind};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Status value marking a successful upstream collection.
pub const STATUS_SUCCESS: &str = "success";

/// One instance's entry in an ingest batch, as sent over the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstancePayload {
    /// Instance name
    pub instance: String,

    /// `"success"` or any failure marker
    pub status: String,

    /// Collected graph data, absent for failed collections
    #[serde(default)]
    pub data: Option<GraphData>,

    /// Upstream error message for failed collections
    #[serde(default)]
    pub error: Option<String>,
}

/// Raw node and edge records of one instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphData {
    /// Node records: `{"id": ..., ...properties}`
    #[serde(default)]
    pub nodes: Vec<Value>,

    /// Edge records: `{"from": ..., "to": ..., ...properties}`
    #[serde(default)]
    pub edges: Vec<Value>,
}

/// Request body accepted by the ingest operation.
///
/// Both the bare list and the `{"instances_data": [...]}` wrapper are accepted.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum IngestRequest {
    /// `{"instances_data": [...]}`
    Wrapped {
        /// The batch
        instances_data: Vec<InstancePayload>,
    },
    /// `[...]`
    Bare(Vec<InstancePayload>),
}

impl IngestRequest {
    /// Parse a batch from JSON text in either accepted shape.
    ///
    /// # Errors
    ///
    /// Returns `Error::Json` if the text is not a valid batch.
    pub fn from_json(content: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    /// Unwrap into the batch of payloads.
    #[must_use]
    pub fn into_payloads(self) -> Vec<InstancePayload> {
        match self {
            Self::Wrapped { instances_data } => instances_data,
            Self::Bare(payloads) => payloads,
        }
    }
}

/// A validated module record.
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleRecord {
    /// Module identity
    pub id: ModuleId,
    /// Non-reserved scalar properties
    pub properties: Properties,
}

/// A validated dependency record.
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeRecord {
    /// Dependent module
    pub from: ModuleId,
    /// Required module
    pub to: ModuleId,
    /// Observed-at metadata supplied by the payload
    pub since: Option<String>,
    /// Non-reserved scalar properties
    pub properties: Properties,
}

/// A validated instance snapshot, ready for merging.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    /// Reporting instance
    pub instance: InstanceName,
    /// Module records in payload order
    pub modules: Vec<ModuleRecord>,
    /// Edge records in payload order
    pub edges: Vec<EdgeRecord>,
}

/// An instance that was not merged because it reported its own failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedInstance {
    /// Instance name as reported
    pub instance: String,
    /// Position in the batch
    #[serde(skip)]
    pub position: usize,
    /// Why it was skipped
    pub reason: String,
}

/// An instance that was not merged because its records failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectedInstance {
    /// Instance name as reported
    pub instance: String,
    /// Position in the batch
    #[serde(skip)]
    pub position: usize,
    /// Every validation error found in the payload
    pub errors: Vec<ValidationError>,
}

/// A snapshot together with its position in the batch.
#[derive(Debug, Clone, PartialEq)]
pub struct AcceptedSnapshot {
    /// Position in the batch
    pub position: usize,
    /// The validated snapshot
    pub snapshot: Snapshot,
}

/// Result of normalizing one batch.
#[derive(Debug, Clone, Default)]
pub struct Normalization {
    /// Validated snapshots in input order
    pub snapshots: Vec<AcceptedSnapshot>,
    /// Instances skipped because of their own reported failure
    pub skipped: Vec<SkippedInstance>,
    /// Instances rejected because of validation errors
    pub rejected: Vec<RejectedInstance>,
}

impl Normalization {
    /// Total number of payloads that were looked at.
    #[must_use]
    pub fn total(&self) -> usize {
        self.snapshots.len() + self.skipped.len() + self.rejected.len()
    }
}

/// Normalize a batch of payloads.
///
/// Payloads whose status is not [`STATUS_SUCCESS`] or that carry no data are
/// skipped. Payloads with invalid records are rejected with all of their
/// validation errors. Everything else becomes a [`Snapshot`].
#[must_use]
pub fn normalize(payloads: Vec<InstancePayload>) -> Normalization {
    let mut result = Normalization::default();

    for (position, payload) in payloads.into_iter().enumerate() {
        let InstancePayload {
            instance,
            status,
            data,
            error,
        } = payload;

        let data = match (status == STATUS_SUCCESS, data) {
            (true, Some(data)) => data,
            (succeeded, _) => {
                let reason = skip_reason(&status, succeeded, error.as_deref());
                tracing::warn!(instance = %instance, status = %status, "Skipping instance: {reason}");
                result.skipped.push(SkippedInstance {
                    instance,
                    position,
                    reason,
                });
                continue;
            }
        };

        match normalize_instance(&instance, data) {
            Ok(snapshot) => result.snapshots.push(AcceptedSnapshot { position, snapshot }),
            Err(errors) => {
                tracing::warn!(
                    instance = %instance,
                    error_count = errors.len(),
                    "Rejecting instance with invalid records"
                );
                result.rejected.push(RejectedInstance {
                    instance,
                    position,
                    errors,
                });
            }
        }
    }

    result
}

fn skip_reason(status: &str, succeeded: bool, error: Option<&str>) -> String {
    match (succeeded, error) {
        (true, _) => "no graph data reported".to_string(),
        (false, Some(error)) => format!("status '{status}': {error}"),
        (false, None) => format!("status '{status}'"),
    }
}

/// Validate one successful payload.
///
/// All validation errors are collected so the caller can report every problem
/// of the instance at once.
///
/// # Errors
///
/// Returns the list of validation errors if any record is invalid.
pub fn normalize_instance(
    instance: &str,
    data: GraphData,
) -> Result<Snapshot, Vec<ValidationError>> {
    let mut errors = Vec::new();

    if instance.trim().is_empty() {
        errors.push(ValidationError::new(
            RecordRef::Instance,
            ValidationErrorKind::EmptyInstanceName,
            "instance name must not be empty",
        ));
    }

    let mut modules = Vec::with_capacity(data.nodes.len());
    for (index, node) in data.nodes.iter().enumerate() {
        match parse_node(RecordRef::Node(index), node) {
            Ok(record) => modules.push(record),
            Err(mut record_errors) => errors.append(&mut record_errors),
        }
    }

    let mut edges = Vec::with_capacity(data.edges.len());
    for (index, edge) in data.edges.iter().enumerate() {
        match parse_edge(RecordRef::Edge(index), edge) {
            Ok(record) => edges.push(record),
            Err(mut record_errors) => errors.append(&mut record_errors),
        }
    }

    if errors.is_empty() {
        Ok(Snapshot {
            instance: InstanceName::new(instance),
            modules,
            edges,
        })
    } else {
        Err(errors)
    }
}

fn parse_node(record: RecordRef, value: &Value) -> Result<ModuleRecord, Vec<ValidationError>> {
    let object = as_object(record, value)?;
    let mut errors = Vec::new();

    let id = required_string(record, object, MODULE_ID_KEY).map_err(|e| errors.push(e));
    let properties = collect_properties(record, object, &[MODULE_ID_KEY], &mut errors);

    match id {
        Ok(id) if errors.is_empty() => Ok(ModuleRecord {
            id: ModuleId::new(id),
            properties,
        }),
        _ => Err(errors),
    }
}

fn parse_edge(record: RecordRef, value: &Value) -> Result<EdgeRecord, Vec<ValidationError>> {
    let object = as_object(record, value)?;
    let mut errors = Vec::new();

    let from = required_string(record, object, EDGE_FROM_KEY).map_err(|e| errors.push(e));
    let to = required_string(record, object, EDGE_TO_KEY).map_err(|e| errors.push(e));

    if object.contains_key(EDGE_INSTANCES_KEY) {
        errors.push(ValidationError::new(
            record,
            ValidationErrorKind::ReservedKey,
            format!("'{EDGE_INSTANCES_KEY}' is managed by the merger and cannot be supplied"),
        ));
    }

    let since = match object.get(EDGE_SINCE_KEY) {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(other) => match PropertyValue::from_json(other) {
            Some(scalar) => Some(scalar.to_string()),
            None => {
                errors.push(ValidationError::invalid_field(
                    record,
                    EDGE_SINCE_KEY,
                    "must be a scalar",
                ));
                None
            }
        },
    };

    let properties = collect_properties(
        record,
        object,
        &[EDGE_FROM_KEY, EDGE_TO_KEY, EDGE_SINCE_KEY, EDGE_INSTANCES_KEY],
        &mut errors,
    );

    match (from, to) {
        (Ok(from), Ok(to)) if errors.is_empty() => Ok(EdgeRecord {
            from: ModuleId::new(from),
            to: ModuleId::new(to),
            since,
            properties,
        }),
        _ => Err(errors),
    }
}

fn as_object(record: RecordRef, value: &Value) -> Result<&Map<String, Value>, Vec<ValidationError>> {
    value.as_object().ok_or_else(|| {
        vec![ValidationError::new(
            record,
            ValidationErrorKind::NotAnObject,
            "record must be a JSON object",
        )]
    })
}

fn required_string(
    record: RecordRef,
    object: &Map<String, Value>,
    field: &str,
) -> Result<String, ValidationError> {
    match object.get(field) {
        None | Some(Value::Null) => Err(ValidationError::missing_field(record, field)),
        Some(Value::String(s)) if s.trim().is_empty() => Err(ValidationError::invalid_field(
            record,
            field,
            "must not be empty",
        )),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(ValidationError::invalid_field(
            record,
            field,
            "must be a string",
        )),
    }
}

fn collect_properties(
    record: RecordRef,
    object: &Map<String, Value>,
    reserved: &[&str],
    errors: &mut Vec<ValidationError>,
) -> Properties {
    let mut properties = Properties::new();
    for (key, value) in object {
        if reserved.contains(&key.as_str()) || value.is_null() {
            continue;
        }
        match PropertyValue::from_json(value) {
            Some(scalar) => {
                properties.insert(key.clone(), scalar);
            }
            None => errors.push(ValidationError::new(
                record,
                ValidationErrorKind::NonScalarProperty,
                format!("property '{key}' must be a string, number or boolean"),
            )),
        }
    }
    properties
}
