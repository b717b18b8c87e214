//! Error types for modsync operations.
//!
//! Errors are split the same way the ingest pipeline treats them:
//!
//! - **`Error`**: service-level failures that abort an ingest or analyze call
//!   (the graph store is unreachable, configuration is broken, I/O failed)
//! - **`ValidationError`**: record-level problems in one instance snapshot.
//!   These are collected into the ingest report and never thrown.
//!
//! Dangling edges are reported through [`crate::merge::DanglingEdge`] rather
//! than through an error type, because they never stop a merge.

use std::fmt;
use std::io;
use thiserror::Error;

/// A specialized Result type for modsync operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type for modsync operations.
#[derive(Debug, Error)]
pub enum Error {
    /// IO error occurred.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON (de)serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Graph store error.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl Error {
    /// Returns `true` when the failure means the graph store could not be reached.
    #[must_use]
    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, Self::Store(StoreError::Unavailable(_)))
    }
}

/// Errors raised by graph store backends.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached at all.
    #[error("graph store unavailable: {0}")]
    Unavailable(String),

    /// The store was reachable but rejected or failed an operation.
    #[error("graph store error: {0}")]
    Backend(String),

    /// Persisted data could not be interpreted.
    #[error("invalid store data: {0}")]
    InvalidFormat(String),

    /// A record could not be serialized for persistence.
    #[error("failed to serialize store record: {0}")]
    Serialization(#[source] serde_json::Error),
}

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Read {
        /// Path that was being read.
        path: String,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },

    /// The configuration file is not valid YAML for [`crate::config::ServiceConfig`].
    #[error("failed to parse config: {0}")]
    Parse(String),

    /// A setting has an unusable value.
    #[error("invalid value for {key}: '{value}' ({reason})")]
    InvalidValue {
        /// Setting name (YAML path or environment variable).
        key: String,
        /// The rejected value.
        value: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The configured store backend name is not known.
    #[error("unknown store backend '{0}'. Valid values: memory, jsonl, neo4j")]
    UnknownBackend(String),

    /// The configured backend needs a cargo feature that was not compiled in.
    #[error("store backend '{backend}' requires building with the '{feature}' feature")]
    FeatureDisabled {
        /// Backend name.
        backend: String,
        /// Cargo feature that enables it.
        feature: &'static str,
    },
}

/// Position of a record inside an instance snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(tag = "kind", content = "index", rename_all = "snake_case")]
pub enum RecordRef {
    /// The payload itself (instance-level problem).
    Instance,
    /// Node record at the given zero-based index.
    Node(usize),
    /// Edge record at the given zero-based index.
    Edge(usize),
}

impl fmt::Display for RecordRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Instance => write!(f, "instance"),
            Self::Node(index) => write!(f, "node #{index}"),
            Self::Edge(index) => write!(f, "edge #{index}"),
        }
    }
}

/// Validation problem in one record of an instance snapshot.
///
/// Collected by the normalizer; the owning instance is rejected but the rest
/// of the batch continues.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ValidationError {
    /// Which record failed.
    pub record: RecordRef,
    /// Category of the failure.
    pub kind: ValidationErrorKind,
    /// Human-readable message.
    pub message: String,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} ({})", self.record, self.message, self.kind)
    }
}

impl std::error::Error for ValidationError {}

/// Categorization of snapshot validation errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationErrorKind {
    /// Instance name is empty.
    EmptyInstanceName,
    /// Record is not a JSON object.
    NotAnObject,
    /// A required field (`id`, `from`, `to`) is absent or null.
    MissingField,
    /// A required field is present but not a non-empty string.
    InvalidField,
    /// A property value is an array or object.
    NonScalarProperty,
    /// The record uses a key owned by the merger.
    ReservedKey,
}

impl fmt::Display for ValidationErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyInstanceName => write!(f, "empty instance name"),
            Self::NotAnObject => write!(f, "not an object"),
            Self::MissingField => write!(f, "missing field"),
            Self::InvalidField => write!(f, "invalid field"),
            Self::NonScalarProperty => write!(f, "non-scalar property"),
            Self::ReservedKey => write!(f, "reserved key"),
        }
    }
}

impl ValidationError {
    /// Create a new validation error.
    #[must_use]
    pub fn new(record: RecordRef, kind: ValidationErrorKind, message: impl Into<String>) -> Self {
        Self {
            record,
            kind,
            message: message.into(),
        }
    }

    /// A required field is absent or null.
    #[must_use]
    pub fn missing_field(record: RecordRef, field: &str) -> Self {
        Self::new(
            record,
            ValidationErrorKind::MissingField,
            format!("missing required field '{field}'"),
        )
    }

    /// A required field is present but unusable.
    #[must_use]
    pub fn invalid_field(record: RecordRef, field: &str, reason: &str) -> Self {
        Self::new(
            record,
            ValidationErrorKind::InvalidField,
            format!("field '{field}' {reason}"),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_display_includes_record_and_kind() {
        let error = ValidationError::missing_field(RecordRef::Edge(3), "from");

        let display = error.to_string();
        assert!(display.contains("edge #3"));
        assert!(display.contains("'from'"));
        assert!(display.contains("missing field"));
    }

    #[test]
    fn store_unavailable_is_detected() {
        let err = Error::from(StoreError::Unavailable("connection refused".into()));
        assert!(err.is_store_unavailable());

        let err = Error::from(StoreError::Backend("syntax error".into()));
        assert!(!err.is_store_unavailable());
    }

    #[test]
    fn record_ref_serializes_with_index() {
        let json = serde_json::to_value(RecordRef::Node(2)).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "node", "index": 2}));

        let json = serde_json::to_value(RecordRef::Instance).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "instance"}));
    }
}
