//! Scripted backend for tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;

use crate::backend::{Backend, Payload};
use crate::error::{BackendError, Result};

/// Records every call and fails on request.
#[derive(Default)]
pub struct RecordingBackend {
    initial: Payload,
    fail_load: bool,
    failing_keys: HashSet<String>,
    puts: Mutex<Vec<(String, Value)>>,
    deletes: Mutex<Vec<String>>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Data returned by `load_all`.
    pub fn with_data(mut self, initial: Value) -> Self {
        if let Value::Object(map) = initial {
            self.initial = map.into_iter().collect();
        }
        self
    }

    pub fn failing_load(mut self) -> Self {
        self.fail_load = true;
        self
    }

    /// Puts of `key` fail with `StorageFull`.
    pub fn failing_put(mut self, key: &str) -> Self {
        self.failing_keys.insert(key.to_string());
        self
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn puts(&self) -> Vec<(String, Value)> {
        self.puts.lock().clone()
    }

    pub fn deletes(&self) -> Vec<String> {
        self.deletes.lock().clone()
    }
}

#[async_trait]
impl Backend for RecordingBackend {
    fn name(&self) -> &str {
        "recording"
    }

    async fn load_all(&self) -> Result<Payload> {
        if self.fail_load {
            return Err(BackendError::Unavailable("storage disabled".to_string()));
        }
        Ok(self.initial.clone())
    }

    async fn put(&self, key: &str, value: &Value) -> Result<()> {
        self.puts.lock().push((key.to_string(), value.clone()));
        if self.failing_keys.contains(key) {
            return Err(BackendError::StorageFull(format!("no room for {key}")));
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.deletes.lock().push(key.to_string());
        Ok(())
    }
}
