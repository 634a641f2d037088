//! Backend configuration.
//!
//! Deserializable so the embedding application can keep it next to its
//! other settings; every field has a default.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Options for a [`SqliteBackend`](crate::sqlite::SqliteBackend).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SqliteConfig {
    /// Database file. Created if missing.
    pub path: PathBuf,
    /// Pool size.
    pub max_connections: u32,
    /// How long a connection waits on a locked database.
    pub busy_timeout_secs: u64,
    /// Maximum total size of stored values per namespace, in bytes.
    pub quota_bytes: Option<u64>,
}

impl SqliteConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn with_quota(mut self, bytes: u64) -> Self {
        self.quota_bytes = Some(bytes);
        self
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_secs(self.busy_timeout_secs)
    }
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("newtab.db"),
            max_connections: 5,
            busy_timeout_secs: 30,
            quota_bytes: None,
        }
    }
}

/// Which backend a store persists to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BackendConfig {
    Memory,
    Sqlite(SqliteConfig),
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig::Sqlite(SqliteConfig::default())
    }
}

/// Backends of both application stores.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub settings: BackendConfig,
    pub cache: BackendConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            settings: BackendConfig::default(),
            cache: BackendConfig::default(),
        }
    }
}

impl StorageConfig {
    /// Both stores in memory. Nothing is persisted.
    pub fn in_memory() -> Self {
        Self {
            settings: BackendConfig::Memory,
            cache: BackendConfig::Memory,
        }
    }
}
