//! Runtime configuration.
//!
//! Loaded once at startup and shared read-only behind an `Arc`. Every field
//! has a default, so a partial file (or none at all) is fine.

use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use strata_indexer::IndexScope;
use thiserror::Error;
use tracing::debug;

/// Directory holding per-project state.
pub const STATE_DIR: &str = ".strata";
pub const CONFIG_FILE: &str = "config.json";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// A repository the orchestrator may index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryConfig {
    pub id: String,
    pub root: PathBuf,
    #[serde(default)]
    pub scope: IndexScope,
}

impl RepositoryConfig {
    pub fn new(id: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            root: root.into(),
            scope: IndexScope::Solution,
        }
    }

    pub fn with_scope(mut self, scope: IndexScope) -> Self {
        self.scope = scope;
        self
    }
}

/// Caps and defaults for graph queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueryLimits {
    pub max_depth: usize,
    pub max_nodes: usize,
    pub max_edges: usize,
    pub default_depth: usize,
    pub default_nodes: usize,
    pub default_edges: usize,
}

impl Default for QueryLimits {
    fn default() -> Self {
        Self {
            max_depth: 10,
            max_nodes: 2_000,
            max_edges: 10_000,
            default_depth: 2,
            default_nodes: 100,
            default_edges: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StrataConfig {
    /// Where the JSON-RPC server listens.
    pub addr: SocketAddr,
    /// sled archive for Completed snapshots; in-memory only when absent.
    pub archive_path: Option<PathBuf>,
    pub search_limit: usize,
    pub query: QueryLimits,
    pub watch_debounce_ms: u64,
    pub repositories: Vec<RepositoryConfig>,
}

impl Default for StrataConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 7432)),
            archive_path: Some(PathBuf::from(STATE_DIR).join("archive")),
            search_limit: 50,
            query: QueryLimits::default(),
            watch_debounce_ms: 1_000,
            repositories: Vec::new(),
        }
    }
}

impl StrataConfig {
    /// Loads `.strata/config.json` under `dir`, then the user config file,
    /// then falls back to defaults.
    pub fn load(dir: &Path) -> Result<Self, ConfigError> {
        let candidates = std::iter::once(dir.join(STATE_DIR).join(CONFIG_FILE))
            .chain(user_config_path());
        for path in candidates {
            if path.is_file() {
                return Self::from_file(&path);
            }
        }
        debug!("No config file found, using defaults");
        Ok(Self::default())
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = serde_json::from_str(&text).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let io = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, json).map_err(io)
    }

    pub fn repository(&self, id: &str) -> Option<&RepositoryConfig> {
        self.repositories.iter().find(|r| r.id == id)
    }

    pub fn watch_debounce(&self) -> Duration {
        Duration::from_millis(self.watch_debounce_ms)
    }
}

fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("strata").join(CONFIG_FILE))
}
