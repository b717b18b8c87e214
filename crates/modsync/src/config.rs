//! Service configuration.
//!
//! Settings are resolved in three layers, each overriding the previous one:
//!
//! 1. Built-in defaults
//! 2. An optional YAML file
//! 3. Environment variables (`MODSYNC_*`, `NEO4J_*`)
//!
//! Command-line flags are applied on top by the binaries.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

/// Default listen host.
pub const DEFAULT_HOST: &str = "0.0.0.0";
/// Default listen port.
pub const DEFAULT_PORT: u16 = 8001;
/// Default store backend.
pub const DEFAULT_BACKEND: &str = "memory";
/// Default JSONL data file.
pub const DEFAULT_DATA_FILE: &str = "modsync-graph.jsonl";
/// Default Neo4j URI.
pub const DEFAULT_NEO4J_URI: &str = "neo4j://localhost:7687";
/// Default Neo4j user.
pub const DEFAULT_NEO4J_USERNAME: &str = "neo4j";
/// Default Neo4j password.
pub const DEFAULT_NEO4J_PASSWORD: &str = "neo";
/// Default number of instance merges in flight at once.
pub const DEFAULT_MAX_CONCURRENT_MERGES: usize = 4;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// HTTP listener settings
    pub server: ServerConfig,
    /// Graph store settings
    pub store: StoreConfig,
    /// Ingest pipeline settings
    pub ingest: IngestConfig,
}

/// HTTP listener settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen host
    pub host: String,
    /// Listen port
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

/// Graph store settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Backend name: `memory`, `jsonl` or `neo4j`
    pub backend: String,
    /// Data file for the `jsonl` backend
    pub data_file: PathBuf,
    /// Connection settings for the `neo4j` backend
    pub neo4j: Neo4jConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: DEFAULT_BACKEND.to_string(),
            data_file: PathBuf::from(DEFAULT_DATA_FILE),
            neo4j: Neo4jConfig::default(),
        }
    }
}

/// Neo4j connection settings.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Neo4jConfig {
    /// Bolt URI
    pub uri: String,
    /// Username
    pub username: String,
    /// Password
    pub password: String,
}

impl std::fmt::Debug for Neo4jConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Neo4jConfig")
            .field("uri", &self.uri)
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

impl Default for Neo4jConfig {
    fn default() -> Self {
        Self {
            uri: DEFAULT_NEO4J_URI.to_string(),
            username: DEFAULT_NEO4J_USERNAME.to_string(),
            password: DEFAULT_NEO4J_PASSWORD.to_string(),
        }
    }
}

/// Ingest pipeline settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Maximum number of instance merges applied concurrently
    pub max_concurrent_merges: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_concurrent_merges: DEFAULT_MAX_CONCURRENT_MERGES,
        }
    }
}

impl ServiceConfig {
    /// Load configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Read` if the file cannot be read and
    /// `ConfigError::Parse` if it is not valid configuration YAML.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.display().to_string(),
                source,
            })?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML text.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Parse` on invalid YAML.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Resolve the effective configuration: defaults, then the optional
    /// file, then the process environment.
    ///
    /// # Errors
    ///
    /// Returns any load, override or validation error.
    pub async fn resolve(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::load(path).await?,
            None => Self::default(),
        };
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides using `lookup` to read variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if a numeric variable does not parse.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("MODSYNC_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("MODSYNC_PORT") {
            self.server.port = parse_env("MODSYNC_PORT", &port)?;
        }
        if let Some(backend) = lookup("MODSYNC_STORE") {
            self.store.backend = backend;
        }
        if let Some(data_file) = lookup("MODSYNC_DATA_FILE") {
            self.store.data_file = PathBuf::from(data_file);
        }
        if let Some(merges) = lookup("MODSYNC_MAX_CONCURRENT_MERGES") {
            self.ingest.max_concurrent_merges = parse_env("MODSYNC_MAX_CONCURRENT_MERGES", &merges)?;
        }
        if let Some(uri) = lookup("NEO4J_URI") {
            self.store.neo4j.uri = uri;
        }
        if let Some(username) = lookup("NEO4J_USERNAME") {
            self.store.neo4j.username = username;
        }
        if let Some(password) = lookup("NEO4J_PASSWORD") {
            self.store.neo4j.password = password;
        }
        Ok(())
    }

    /// Check settings that cannot be expressed in the types.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` for a zero port or zero concurrency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::InvalidValue {
                key: "server.port".to_string(),
                value: "0".to_string(),
                reason: "must be between 1 and 65535".to_string(),
            });
        }
        if self.ingest.max_concurrent_merges == 0 {
            return Err(ConfigError::InvalidValue {
                key: "ingest.max_concurrent_merges".to_string(),
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        reason: e.to_string(),
    })
}
