//! Compile-time key schemas.
//!
//! A schema is a zero-sized marker type implementing [`Schema`]. Its keys
//! are `const` [`Key`]s carrying the value type and a default, so a key
//! from one store cannot be used on another and `get` always has a value
//! to fall back to.

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;
use tracing::warn;

/// Declares the namespace and defaults of one store domain.
pub trait Schema: Send + Sync + 'static {
    /// Backend namespace, unique per store.
    const NAMESPACE: &'static str;

    /// Default value of every declared key.
    fn defaults() -> Defaults;
}

/// A typed key belonging to schema `S`.
pub struct Key<S, T> {
    name: &'static str,
    default: fn() -> T,
    _schema: PhantomData<fn() -> S>,
}

impl<S, T> Key<S, T> {
    /// Declare a key with its default.
    pub const fn new(name: &'static str, default: fn() -> T) -> Self {
        Self {
            name,
            default,
            _schema: PhantomData,
        }
    }

    /// The string identifier stored in the backend.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// A fresh copy of the declared default.
    pub fn default_value(&self) -> T {
        (self.default)()
    }
}

impl<S, T> Clone for Key<S, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<S, T> Copy for Key<S, T> {}

impl<S, T> fmt::Debug for Key<S, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Key").field(&self.name).finish()
    }
}

/// Encoded defaults for a schema, built key by key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Defaults {
    values: BTreeMap<String, Value>,
}

impl Defaults {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `key`'s default.
    ///
    /// A default that cannot be encoded is left out; `Store::get` still
    /// returns it, but nothing raw is recorded for the key.
    pub fn with<S, T: Serialize>(mut self, key: &Key<S, T>) -> Self {
        match serde_json::to_value(key.default_value()) {
            Ok(value) => {
                self.values.insert(key.name().to_string(), value);
            }
            Err(err) => {
                warn!(key = key.name(), error = %err, "Default cannot be encoded, skipping");
            }
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
