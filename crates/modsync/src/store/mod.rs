//! Graph store abstraction.
//!
//! This module provides the store trait consumed by the sync service and a
//! factory for the available backends:
//!
//! - **memory**: ephemeral [`ModuleGraph`] behind an async mutex
//! - **jsonl**: the in-memory graph persisted to a JSON Lines file after
//!   every merge
//! - **neo4j**: Cypher translation of merge plans (requires the `neo4j`
//!   cargo feature)
//!
//! # Architecture
//!
//! All merge logic is expressed as [`MergePlan`]s. Backends only decide how a
//! plan is executed atomically. The trait is object-safe so the service can
//! hold an `Arc<dyn GraphStore>`.
//!
//! # Test Utilities
//!
//! With the `test-util` feature, [`UnreachableStore`] is available for
//! exercising store-down error paths:
//!
//! ```toml
//! [dev-dependencies]
//! modsync = { version = "...", features = ["test-util"] }
//! ```

use crate::config::StoreConfig;
use crate::domain::GraphStats;
use crate::error::{ConfigError, Result};
use crate::graph::ModuleGraph;
use crate::merge::{MergeOutcome, MergePlan};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub mod in_memory;
pub mod jsonl;
#[cfg(feature = "neo4j")]
pub mod neo4j;

pub use in_memory::{InMemoryStore, new_in_memory_store};
pub use jsonl::{JsonlStore, LoadWarning};

/// Persistence contract for the global module graph.
///
/// Methods take `&self`; implementations use interior mutability so a single
/// handle can be shared across concurrent merges.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Create uniqueness constraints for Module ids and Instance names.
    ///
    /// A no-op for backends that enforce identity structurally.
    async fn ensure_schema(&self) -> Result<()>;

    /// Apply one merge plan atomically.
    ///
    /// Either every operation of the plan is committed or none is.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Unavailable` if the store cannot be reached and
    /// `StoreError::Backend` if it rejects the operation.
    async fn apply(&self, plan: &MergePlan) -> Result<MergeOutcome>;

    /// Load the full graph for analysis.
    async fn load_graph(&self) -> Result<ModuleGraph>;

    /// Node and relationship counts.
    async fn stats(&self) -> Result<GraphStats>;

    /// Run a trivial query to check that the store is reachable.
    async fn ping(&self) -> Result<()>;
}

/// Store backend selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    /// In-memory graph (ephemeral)
    Memory,

    /// In-memory graph persisted to a JSONL file
    Jsonl(PathBuf),

    /// Neo4j database
    Neo4j {
        /// Bolt URI, e.g. `neo4j://localhost:7687`
        uri: String,
        /// Username
        username: String,
        /// Password
        password: String,
    },
}

impl StoreBackend {
    /// Backend name as used in configuration.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Jsonl(_) => "jsonl",
            Self::Neo4j { .. } => "neo4j",
        }
    }

    /// Returns the data file path for file-based backends.
    #[must_use]
    pub fn data_path(&self) -> Option<&Path> {
        match self {
            Self::Jsonl(path) => Some(path),
            Self::Memory | Self::Neo4j { .. } => None,
        }
    }

    /// Resolve the backend described by a store configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::UnknownBackend` for unrecognized names.
    pub fn from_config(config: &StoreConfig) -> std::result::Result<Self, ConfigError> {
        match config.backend.as_str() {
            "memory" => Ok(Self::Memory),
            "jsonl" => Ok(Self::Jsonl(config.data_file.clone())),
            "neo4j" => Ok(Self::Neo4j {
                uri: config.neo4j.uri.clone(),
                username: config.neo4j.username.clone(),
                password: config.neo4j.password.clone(),
            }),
            other => Err(ConfigError::UnknownBackend(other.to_string())),
        }
    }
}

/// Create a store for the given backend.
///
/// # Errors
///
/// - `Error::Io` if the JSONL file exists but cannot be read
/// - `StoreError::Unavailable` if the Neo4j connection cannot be established
/// - `ConfigError::FeatureDisabled` if the Neo4j backend was not compiled in
pub async fn create_store(backend: StoreBackend) -> Result<Arc<dyn GraphStore>> {
    match backend {
        StoreBackend::Memory => Ok(Arc::new(new_in_memory_store())),
        StoreBackend::Jsonl(path) => {
            let (store, warnings) = JsonlStore::open(path).await?;
            for warning in &warnings {
                // Log but continue; the store is still usable
                tracing::warn!(warning = ?warning, "JSONL load warning");
            }
            Ok(Arc::new(store))
        }
        #[cfg(feature = "neo4j")]
        StoreBackend::Neo4j {
            uri,
            username,
            password,
        } => {
            let store = neo4j::Neo4jStore::connect(&uri, &username, &password).await?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "neo4j"))]
        StoreBackend::Neo4j { .. } => Err(ConfigError::FeatureDisabled {
            backend: "neo4j".to_string(),
            feature: "neo4j",
        }
        .into()),
    }
}

// ========== Test Utilities ==========

/// A store that is never reachable.
///
/// Every operation fails with `StoreError::Unavailable`, which lets callers
/// test how they surface a store outage without running a real backend.
#[cfg(any(test, feature = "test-util"))]
#[derive(Debug, Clone, Copy, Default)]
#[non_exhaustive]
pub struct UnreachableStore;

#[cfg(any(test, feature = "test-util"))]
impl UnreachableStore {
    /// Message carried by every error.
    pub const MESSAGE: &'static str = "connection refused";

    /// Create a new unreachable store.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn error() -> crate::error::Error {
        crate::error::StoreError::Unavailable(Self::MESSAGE.to_string()).into()
    }
}

#[cfg(any(test, feature = "test-util"))]
#[async_trait]
impl GraphStore for UnreachableStore {
    async fn ensure_schema(&self) -> Result<()> {
        Err(Self::error())
    }

    async fn apply(&self, _plan: &MergePlan) -> Result<MergeOutcome> {
        Err(Self::error())
    }

    async fn load_graph(&self) -> Result<ModuleGraph> {
        Err(Self::error())
    }

    async fn stats(&self) -> Result<GraphStats> {
        Err(Self::error())
    }

    async fn ping(&self) -> Result<()> {
        Err(Self::error())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServiceConfig;
    use crate::error::Error;

    #[tokio::test]
    async fn test_create_memory_store() {
        let store = create_store(StoreBackend::Memory).await.unwrap();
        assert!(store.ping().await.is_ok());
        assert_eq!(store.stats().await.unwrap(), GraphStats::default());
    }

    #[tokio::test]
    async fn test_create_jsonl_store_without_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.jsonl");

        let store = create_store(StoreBackend::Jsonl(path.clone())).await.unwrap();

        assert!(store.load_graph().await.unwrap().is_empty());
        assert!(!path.exists());
    }

    #[cfg(not(feature = "neo4j"))]
    #[tokio::test]
    async fn test_neo4j_backend_requires_feature() {
        let result = create_store(StoreBackend::Neo4j {
            uri: "neo4j://localhost:7687".into(),
            username: "neo4j".into(),
            password: "neo".into(),
        })
        .await;

        assert!(matches!(
            result,
            Err(Error::Config(ConfigError::FeatureDisabled { .. }))
        ));
    }

    #[test]
    fn test_backend_from_config() {
        let mut config = ServiceConfig::default().store;
        assert_eq!(StoreBackend::from_config(&config).unwrap(), StoreBackend::Memory);

        config.backend = "jsonl".into();
        let backend = StoreBackend::from_config(&config).unwrap();
        assert_eq!(backend.data_path(), Some(config.data_file.as_path()));

        config.backend = "neo4j".into();
        assert_eq!(StoreBackend::from_config(&config).unwrap().name(), "neo4j");

        config.backend = "postgres".into();
        assert!(matches!(
            StoreBackend::from_config(&config),
            Err(ConfigError::UnknownBackend(name)) if name == "postgres"
        ));
    }

    #[tokio::test]
    async fn test_unreachable_store_reports_unavailable() {
        let store: Arc<dyn GraphStore> = Arc::new(UnreachableStore::new());
        let err = store.ping().await.unwrap_err();
        assert!(err.is_store_unavailable());
        assert!(store.load_graph().await.unwrap_err().is_store_unavailable());
    }
}
