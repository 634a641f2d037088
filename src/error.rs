//! Error types for state storage.
//!
//! Three layers of failure:
//! - [`BackendError`]: what a backend operation returns.
//! - [`StorageError`]: what a store pushes onto its error stream. Never
//!   returned from `get`/`set`/`subscribe`.
//! - [`MigrationError`]: a migration step failed. Fatal to the sequence.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// Errors that can occur inside a persistence backend.
#[derive(Debug, Error)]
pub enum BackendError {
    /// Cannot connect to or communicate with storage backend.
    #[error("connection error: {0}")]
    ConnectionError(String),

    /// Storage quota reached, no space remaining.
    #[error("storage full: {0}")]
    StorageFull(String),

    /// A persisted value could not be read back.
    #[error("corrupt value for {key}: {reason}")]
    Corrupt { key: String, reason: String },

    /// Serialization or deserialization error.
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Backend has been disabled or is otherwise unusable.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// Database error from SQLx.
    #[error("database error: {0}")]
    DatabaseError(#[from] sqlx::Error),
}

/// Result type alias for backend operations.
pub type Result<T> = std::result::Result<T, BackendError>;

impl BackendError {
    /// Returns true if this error means the storage quota was exhausted.
    pub fn is_quota(&self) -> bool {
        matches!(self, BackendError::StorageFull(_))
    }
}

impl From<serde_json::Error> for BackendError {
    fn from(err: serde_json::Error) -> Self {
        BackendError::SerializationError(err.to_string())
    }
}

/// Which operation a [`StorageError`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The backend could not be opened or its data loaded.
    OpenFailed,
    /// A single key's durable write failed.
    WriteFailed,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::OpenFailed => f.write_str("open failed"),
            ErrorKind::WriteFailed => f.write_str("write failed"),
        }
    }
}

/// A persistence failure reported on a store's error stream.
///
/// The in-memory state is unaffected: the store keeps serving defaults
/// (open) or the optimistic value (write).
#[derive(Debug, Clone, Error)]
#[error("{kind} in `{namespace}`{}: {cause}", key_suffix(.key))]
pub struct StorageError {
    pub kind: ErrorKind,
    pub namespace: String,
    pub key: Option<String>,
    pub cause: Arc<BackendError>,
}

fn key_suffix(key: &Option<String>) -> String {
    match key {
        Some(key) => format!(" (key `{key}`)"),
        None => String::new(),
    }
}

impl StorageError {
    /// The backend for `namespace` could not be opened or loaded.
    pub fn open_failed(namespace: impl Into<String>, cause: BackendError) -> Self {
        Self {
            kind: ErrorKind::OpenFailed,
            namespace: namespace.into(),
            key: None,
            cause: Arc::new(cause),
        }
    }

    /// Persisting `key` failed.
    pub fn write_failed(
        namespace: impl Into<String>,
        key: impl Into<String>,
        cause: BackendError,
    ) -> Self {
        Self {
            kind: ErrorKind::WriteFailed,
            namespace: namespace.into(),
            key: Some(key.into()),
            cause: Arc::new(cause),
        }
    }
}

/// Errors that stop a migration sequence.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MigrationError {
    /// A step's transform returned an error.
    #[error("migration {from} -> {to} failed: {reason}")]
    StepFailed { from: u32, to: u32, reason: String },

    /// Re-applying a step to its own output changed the data.
    #[error("migration {from} -> {to} is not idempotent")]
    NotIdempotent { from: u32, to: u32 },
}

impl MigrationError {
    /// The version the failing step started from. The stored marker is
    /// left at this value.
    pub fn from_version(&self) -> u32 {
        match self {
            MigrationError::StepFailed { from, .. } | MigrationError::NotIdempotent { from, .. } => {
                *from
            }
        }
    }
}
