//! Backend trait - the persistence contract behind every store.
//!
//! A backend is one opened namespace of some asynchronous key-value
//! storage. Values are JSON; a backend only has to round-trip them.
//! Opening is the caller's future (see [`Store::open`]), so "could not
//! open" and "could not load" are both reported as `OpenFailed`.
//!
//! [`Store::open`]: crate::store::Store::open

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::Result;

/// Stored key/value pairs of one namespace, ordered by key.
pub type Payload = BTreeMap<String, Value>;

/// The persistence contract.
///
/// All backends (SQLite, memory) implement this trait. A store issues
/// `load_all` once, then `put`/`delete` from a single writer task in
/// the order the writes were made.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Short identifier for logs.
    fn name(&self) -> &str;

    /// Read every persisted pair of this namespace.
    async fn load_all(&self) -> Result<Payload>;

    /// Persist one value, replacing any previous one.
    async fn put(&self, key: &str, value: &Value) -> Result<()>;

    /// Remove a key. Returns `Ok(())` if the key didn't exist.
    async fn delete(&self, key: &str) -> Result<()>;
}

#[async_trait]
impl<B: Backend + ?Sized> Backend for Arc<B> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn load_all(&self) -> Result<Payload> {
        (**self).load_all().await
    }

    async fn put(&self, key: &str, value: &Value) -> Result<()> {
        (**self).put(key, value).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        (**self).delete(key).await
    }
}
