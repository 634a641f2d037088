//! In-memory backend.
//!
//! Used for the cache when persistence is unwanted, and as the fallback
//! once a durable backend failed to open. Starts empty, every write
//! succeeds, and nothing survives the process.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;

use crate::backend::{Backend, Payload};
use crate::error::Result;

/// In-memory implementation of [`Backend`].
///
/// Keeps what was written so tests can inspect it; `load_all` still
/// returns whatever was put before it.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    data: RwLock<Payload>,
}

impl MemoryBackend {
    /// Create a new empty in-memory backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a stored value.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.data.read().get(key).cloned()
    }

    /// Get the number of stored keys.
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Check if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    async fn load_all(&self) -> Result<Payload> {
        Ok(self.data.read().clone())
    }

    async fn put(&self, key: &str, value: &Value) -> Result<()> {
        self.data.write().insert(key.to_string(), value.clone());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.data.write().remove(key);
        Ok(())
    }
}
