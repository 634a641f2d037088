//! SQLite backend.
//!
//! One database file holds every namespace; each store opens its own
//! namespace. Values are stored as JSON text blobs.
//!
//! Features:
//! - WAL mode for concurrent readers
//! - Optional per-namespace quota, reported as `StorageFull`

use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

use crate::backend::{Backend, Payload};
use crate::config::SqliteConfig;
use crate::error::{BackendError, Result};

/// SQLite implementation of [`Backend`] for one namespace.
pub struct SqliteBackend {
    pool: SqlitePool,
    namespace: String,
    quota_bytes: Option<u64>,
}

impl SqliteBackend {
    /// Open or create the database in `config` and select `namespace`.
    pub async fn open(config: &SqliteConfig, namespace: impl Into<String>) -> Result<Self> {
        let namespace = namespace.into();
        info!(path = ?config.path, namespace = %namespace, "Opening SQLite backend");

        let options =
            SqliteConnectOptions::from_str(&format!("sqlite:{}", config.path.display()))
                .map_err(|e| BackendError::ConnectionError(e.to_string()))?
                .create_if_missing(true)
                .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
                .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
                .busy_timeout(config.busy_timeout());

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .map_err(|e| BackendError::ConnectionError(e.to_string()))?;

        let backend = Self {
            pool,
            namespace,
            quota_bytes: config.quota_bytes,
        };
        backend.init_schema().await?;
        Ok(backend)
    }

    /// Create an in-memory SQLite backend (for testing).
    pub async fn in_memory(namespace: impl Into<String>) -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| BackendError::ConnectionError(e.to_string()))?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| BackendError::ConnectionError(e.to_string()))?;

        let backend = Self {
            pool,
            namespace: namespace.into(),
            quota_bytes: None,
        };
        backend.init_schema().await?;
        Ok(backend)
    }

    /// Apply a quota to an already opened backend.
    pub fn with_quota(mut self, bytes: u64) -> Self {
        self.quota_bytes = Some(bytes);
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kv_store (
                namespace TEXT NOT NULL,
                key TEXT NOT NULL,
                value BLOB NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (namespace, key)
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        debug!(namespace = %self.namespace, "SQLite schema initialized");
        Ok(())
    }

    /// Bytes used by this namespace, not counting `except_key`.
    async fn used_bytes(&self, except_key: &str) -> Result<u64> {
        let (used,): (i64,) = sqlx::query_as(
            "SELECT COALESCE(SUM(LENGTH(value)), 0) FROM kv_store WHERE namespace = ? AND key != ?",
        )
        .bind(&self.namespace)
        .bind(except_key)
        .fetch_one(&self.pool)
        .await?;
        Ok(used.max(0) as u64)
    }

    fn now_unix() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0)
    }
}

#[async_trait]
impl Backend for SqliteBackend {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn load_all(&self) -> Result<Payload> {
        let rows: Vec<(String, Vec<u8>)> =
            sqlx::query_as("SELECT key, value FROM kv_store WHERE namespace = ? ORDER BY key")
                .bind(&self.namespace)
                .fetch_all(&self.pool)
                .await?;

        let mut payload = Payload::new();
        for (key, bytes) in rows {
            let value = serde_json::from_slice(&bytes).map_err(|e| BackendError::Corrupt {
                key: key.clone(),
                reason: e.to_string(),
            })?;
            payload.insert(key, value);
        }

        debug!(namespace = %self.namespace, keys = payload.len(), "Loaded namespace");
        Ok(payload)
    }

    async fn put(&self, key: &str, value: &Value) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;

        if let Some(quota) = self.quota_bytes {
            let used = self.used_bytes(key).await?;
            if used + bytes.len() as u64 > quota {
                return Err(BackendError::StorageFull(format!(
                    "writing {} bytes to `{}` would exceed the quota of {} bytes",
                    bytes.len(),
                    key,
                    quota
                )));
            }
        }

        sqlx::query(
            r#"
            INSERT INTO kv_store (namespace, key, value, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(namespace, key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&self.namespace)
        .bind(key)
        .bind(&bytes)
        .bind(Self::now_unix())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM kv_store WHERE namespace = ? AND key = ?")
            .bind(&self.namespace)
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
