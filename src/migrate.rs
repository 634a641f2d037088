//! Schema migrations for persisted store data.
//!
//! Persisted data is read as a [`Persisted`] value: either versioned, or
//! unversioned when the `version` marker is missing or unreadable. The
//! unversioned case is treated as version 0, so every step runs again on
//! data whose marker was lost. Steps therefore have to be idempotent:
//! the declarative operations are idempotent by construction, and the
//! engine re-applies each step to its own output and refuses to commit
//! a step that changes data the second time.
//!
//! Step `n` migrates version `n` to `n + 1`. Each step's result is
//! written through [`Store`] (so subscribers see it) before the marker
//! advances; a failing step leaves the marker at the last version that
//! was actually reached.

use serde::Serialize;
use serde_json::{json, Value};
use std::fmt;
use std::marker::PhantomData;
use tracing::{debug, error, info, warn};

use crate::backend::Payload;
use crate::error::MigrationError;
use crate::schema::Schema;
use crate::store::Store;

/// Key holding the schema version inside every migrated namespace.
pub const VERSION_KEY: &str = "version";

/// Persisted data tagged with the version it was written at.
#[derive(Debug, Clone, PartialEq)]
pub enum Persisted {
    /// No readable version marker. Migrated as version 0.
    Unversioned(Payload),
    Versioned { version: u32, payload: Payload },
}

impl Persisted {
    /// Split the version marker from stored values.
    pub fn from_stored(mut stored: Payload) -> Self {
        let version = stored
            .remove(VERSION_KEY)
            .as_ref()
            .and_then(Value::as_u64)
            .and_then(|v| u32::try_from(v).ok());
        match version {
            Some(version) => Persisted::Versioned {
                version,
                payload: stored,
            },
            None => Persisted::Unversioned(stored),
        }
    }

    pub fn version(&self) -> u32 {
        match self {
            Persisted::Unversioned(_) => 0,
            Persisted::Versioned { version, .. } => *version,
        }
    }

    pub fn payload(&self) -> &Payload {
        match self {
            Persisted::Unversioned(payload) => payload,
            Persisted::Versioned { payload, .. } => payload,
        }
    }

    pub fn into_payload(self) -> Payload {
        match self {
            Persisted::Unversioned(payload) => payload,
            Persisted::Versioned { payload, .. } => payload,
        }
    }
}

type TransformFn = Box<dyn Fn(Payload) -> Result<Payload, String> + Send + Sync>;

enum Op {
    AddDefault {
        key: String,
        value: Result<Value, String>,
    },
    Rename { from: String, to: String },
    Remove { key: String },
    Transform(TransformFn),
}

impl Op {
    fn apply(&self, mut payload: Payload) -> Result<Payload, String> {
        match self {
            Op::AddDefault { key, value } => {
                let value = value
                    .as_ref()
                    .map_err(|err| format!("default for `{key}` cannot be encoded: {err}"))?;
                payload.entry(key.clone()).or_insert_with(|| value.clone());
            }
            Op::Rename { from, to } => {
                if let Some(value) = payload.remove(from) {
                    payload.entry(to.clone()).or_insert(value);
                }
            }
            Op::Remove { key } => {
                payload.remove(key);
            }
            Op::Transform(transform) => return transform(payload),
        }
        Ok(payload)
    }
}

/// One version step: a sequence of operations on the payload.
pub struct Step {
    description: String,
    ops: Vec<Op>,
}

impl Step {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            ops: Vec::new(),
        }
    }

    /// Insert `key` with `value` unless it is already present.
    ///
    /// A value that cannot be encoded fails the step when it runs.
    pub fn add_default(mut self, key: &str, value: impl Serialize) -> Self {
        self.ops.push(Op::AddDefault {
            key: key.to_string(),
            value: serde_json::to_value(value).map_err(|err| err.to_string()),
        });
        self
    }

    /// Move `from` to `to`. If `to` already exists, `from` is dropped.
    pub fn rename(mut self, from: &str, to: &str) -> Self {
        self.ops.push(Op::Rename {
            from: from.to_string(),
            to: to.to_string(),
        });
        self
    }

    /// Drop `key`.
    pub fn remove(mut self, key: &str) -> Self {
        self.ops.push(Op::Remove {
            key: key.to_string(),
        });
        self
    }

    /// Apply a custom pure function. It must leave already migrated data
    /// unchanged.
    pub fn transform<F>(mut self, transform: F) -> Self
    where
        F: Fn(Payload) -> Result<Payload, String> + Send + Sync + 'static,
    {
        self.ops.push(Op::Transform(Box::new(transform)));
        self
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Run every operation in order.
    pub fn apply(&self, payload: Payload) -> Result<Payload, String> {
        self.ops.iter().try_fold(payload, |payload, op| op.apply(payload))
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("description", &self.description)
            .field("ops", &self.ops.len())
            .finish()
    }
}

/// What a migration run changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub from: u32,
    pub to: u32,
    pub steps_applied: u32,
    pub keys_written: Vec<String>,
    pub keys_removed: Vec<String>,
}

/// Ordered migration steps for schema `S`.
pub struct Migrations<S> {
    steps: Vec<Step>,
    _schema: PhantomData<fn() -> S>,
}

impl<S: Schema> Migrations<S> {
    pub fn new() -> Self {
        Self {
            steps: Vec::new(),
            _schema: PhantomData,
        }
    }

    /// Append the step migrating `latest()` to `latest() + 1`.
    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    /// Version the data is at once every step ran.
    pub fn latest(&self) -> u32 {
        self.steps.len() as u32
    }

    /// Migrate `store` to the latest version.
    ///
    /// Call once the store is ready, before anything binds to it.
    pub fn run(&self, store: &Store<S>) -> Result<MigrationReport, MigrationError> {
        if !store.is_ready() {
            warn!(namespace = S::NAMESPACE, "Migrating a store that has not finished loading");
        }

        let persisted = Persisted::from_stored(store.stored());
        let unversioned = matches!(persisted, Persisted::Unversioned(_));
        let mut version = persisted.version();
        let latest = self.latest();
        let mut report = MigrationReport {
            from: version,
            to: version,
            ..MigrationReport::default()
        };

        if unversioned {
            info!(namespace = S::NAMESPACE, "No schema version recorded, migrating from 0");
        }
        if version > latest {
            warn!(
                namespace = S::NAMESPACE,
                version, latest, "Data is newer than the known schema, leaving it untouched"
            );
            return Ok(report);
        }

        let mut payload = persisted.into_payload();
        while version < latest {
            let step = &self.steps[version as usize];
            let next = self.apply_step(step, version, &payload)?;

            debug!(
                namespace = S::NAMESPACE,
                from = version,
                to = version + 1,
                step = step.description(),
                "Applying migration"
            );
            Self::commit(store, &payload, &next, &mut report);
            version += 1;
            store.set_value(VERSION_KEY, json!(version));

            payload = next;
            report.steps_applied += 1;
            report.to = version;
        }

        if unversioned && report.steps_applied == 0 {
            store.set_value(VERSION_KEY, json!(version));
        }
        if report.steps_applied > 0 {
            info!(
                namespace = S::NAMESPACE,
                from = report.from,
                to = report.to,
                "Migration complete"
            );
        }
        Ok(report)
    }

    fn apply_step(&self, step: &Step, from: u32, payload: &Payload) -> Result<Payload, MigrationError> {
        let to = from + 1;
        let fail = |reason: String| {
            error!(namespace = S::NAMESPACE, from, to, reason = %reason, "Migration step failed");
            MigrationError::StepFailed { from, to, reason }
        };

        let mut next = step.apply(payload.clone()).map_err(fail)?;
        next.remove(VERSION_KEY);

        let mut again = step.apply(next.clone()).map_err(fail)?;
        again.remove(VERSION_KEY);
        if again != next {
            error!(namespace = S::NAMESPACE, from, to, "Migration step is not idempotent");
            return Err(MigrationError::NotIdempotent { from, to });
        }
        Ok(next)
    }

    fn commit(store: &Store<S>, before: &Payload, after: &Payload, report: &mut MigrationReport) {
        for key in before.keys().filter(|key| !after.contains_key(*key)) {
            store.remove_value(key);
            report.keys_removed.push(key.clone());
        }
        for (key, value) in after {
            if before.get(key) != Some(value) {
                store.set_value(key, value.clone());
                report.keys_written.push(key.clone());
            }
        }
    }
}

impl<S: Schema> Default for Migrations<S> {
    fn default() -> Self {
        Self::new()
    }
}
