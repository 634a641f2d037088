//! Store - typed, observable, persisted key-value state.
//!
//! A [`Store`] holds the authoritative in-memory values of one schema
//! and mirrors every change to a [`Backend`] in the background:
//!
//! - `get` is synchronous and always yields a value: the last `set`, the
//!   loaded value, or the declared default.
//! - `set` updates memory, notifies the key's subscribers in
//!   registration order, then queues the durable write.
//! - Backend failures never surface from `get`/`set`/`subscribe`; they
//!   are pushed to [`Store::errors`].
//!
//! One background task per store opens the backend, loads it, and then
//! drains the write queue in order. A failed open leaves the store on its
//! defaults with an in-memory backend behind it.

use parking_lot::{Mutex, ReentrantMutex, RwLock};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::backend::{Backend, Payload};
use crate::error::{BackendError, Result, StorageError};
use crate::memory::MemoryBackend;
use crate::schema::{Defaults, Key, Schema};
use crate::stream::{Stream, Subscription};

enum Command {
    Put { key: String, value: Value },
    Delete { key: String },
    Flush(oneshot::Sender<()>),
}

#[derive(Debug, Clone)]
enum Readiness {
    Loading,
    Ready,
    Failed(StorageError),
}

struct Inner {
    namespace: &'static str,
    defaults: Defaults,
    values: RwLock<Payload>,
    loaded: AtomicBool,
    /// Keys written before the load finished; the load must not clobber them.
    touched: Mutex<HashSet<String>>,
    channels: Mutex<HashMap<String, Stream<Value>>>,
    /// Serializes update+notify across threads; reentrant so handlers may set.
    dispatch: ReentrantMutex<()>,
    commands: mpsc::UnboundedSender<Command>,
    errors: Stream<StorageError>,
    readiness: watch::Receiver<Readiness>,
}

impl Inner {
    fn value(&self, name: &str) -> Option<Value> {
        self.values
            .read()
            .get(name)
            .or_else(|| self.defaults.get(name))
            .cloned()
    }

    fn set_value(&self, name: &str, value: Value) {
        let _dispatch = self.dispatch.lock();
        self.values.write().insert(name.to_string(), value.clone());
        if !self.loaded.load(Ordering::Acquire) {
            self.touched.lock().insert(name.to_string());
        }
        self.notify(name, value);
        self.persist(name);
    }

    fn remove_value(&self, name: &str) {
        let _dispatch = self.dispatch.lock();
        self.values.write().remove(name);
        if !self.loaded.load(Ordering::Acquire) {
            self.touched.lock().insert(name.to_string());
        }
        let fallback = self.defaults.get(name).cloned().unwrap_or(Value::Null);
        self.notify(name, fallback);
        self.persist(name);
    }

    fn notify(&self, name: &str, value: Value) {
        let channel = self.channels.lock().get(name).cloned();
        if let Some(channel) = channel {
            channel.push(value);
        }
    }

    /// Queue a write of the key's current state. Reading memory here
    /// rather than taking the value from the caller means a handler that
    /// re-set the key during notification still wins durably.
    fn persist(&self, name: &str) {
        let command = match self.values.read().get(name) {
            Some(value) => Command::Put {
                key: name.to_string(),
                value: value.clone(),
            },
            None => Command::Delete {
                key: name.to_string(),
            },
        };
        // Ignore send errors (writer gone, runtime shutting down)
        let _ = self.commands.send(command);
    }

    fn channel(&self, name: &str) -> Stream<Value> {
        self.channels
            .lock()
            .entry(name.to_string())
            .or_default()
            .clone()
    }

    fn apply_loaded(&self, payload: Payload) {
        let _dispatch = self.dispatch.lock();
        let touched = std::mem::take(&mut *self.touched.lock());
        let mut changed = Vec::new();
        {
            let mut values = self.values.write();
            for (key, value) in payload {
                if touched.contains(&key) {
                    continue;
                }
                let current = values.get(&key).or_else(|| self.defaults.get(&key));
                if current != Some(&value) {
                    changed.push((key.clone(), value.clone()));
                }
                values.insert(key, value);
            }
            self.loaded.store(true, Ordering::Release);
        }
        for (key, value) in changed {
            self.notify(&key, value);
        }
    }
}

/// Background task owning the backend.
struct Writer {
    namespace: &'static str,
    store: Weak<Inner>,
    errors: Stream<StorageError>,
    ready: watch::Sender<Readiness>,
}

impl Writer {
    async fn run<B, F>(self, connect: F, mut queue: mpsc::UnboundedReceiver<Command>)
    where
        B: Backend + 'static,
        F: Future<Output = Result<B>> + Send + 'static,
    {
        let backend: Box<dyn Backend> = match Self::open_and_load(connect).await {
            Ok((backend, payload)) => {
                info!(
                    namespace = self.namespace,
                    backend = backend.name(),
                    keys = payload.len(),
                    "Store loaded"
                );
                self.apply_loaded(payload);
                self.ready.send_replace(Readiness::Ready);
                backend
            }
            Err(cause) => {
                warn!(
                    namespace = self.namespace,
                    error = %cause,
                    "Cannot open backend, continuing with defaults in memory"
                );
                let error = StorageError::open_failed(self.namespace, cause);
                self.apply_loaded(Payload::new());
                self.errors.push(error.clone());
                self.ready.send_replace(Readiness::Failed(error));
                Box::new(MemoryBackend::new())
            }
        };

        while let Some(command) = queue.recv().await {
            match command {
                Command::Put { key, value } => {
                    if let Err(cause) = backend.put(&key, &value).await {
                        self.write_failed(key, cause);
                    }
                }
                Command::Delete { key } => {
                    if let Err(cause) = backend.delete(&key).await {
                        self.write_failed(key, cause);
                    }
                }
                Command::Flush(done) => {
                    let _ = done.send(());
                }
            }
        }
        debug!(namespace = self.namespace, "Store writer stopped");
    }

    async fn open_and_load<B, F>(connect: F) -> Result<(Box<dyn Backend>, Payload)>
    where
        B: Backend + 'static,
        F: Future<Output = Result<B>>,
    {
        let backend = connect.await?;
        let payload = backend.load_all().await?;
        Ok((Box::new(backend), payload))
    }

    fn apply_loaded(&self, payload: Payload) {
        if let Some(store) = self.store.upgrade() {
            store.apply_loaded(payload);
        }
    }

    fn write_failed(&self, key: String, cause: BackendError) {
        warn!(namespace = self.namespace, key = %key, error = %cause, "Write failed");
        self.errors
            .push(StorageError::write_failed(self.namespace, key, cause));
    }
}

/// In-memory state of schema `S`, persisted in the background.
///
/// Cloning yields another handle to the same store.
pub struct Store<S> {
    inner: Arc<Inner>,
    _schema: PhantomData<fn() -> S>,
}

impl<S: Schema> Store<S> {
    /// Create a store on the backend `connect` resolves to.
    ///
    /// Returns immediately with every key at its default; opening and
    /// loading happen on a spawned task, so this must be called within a
    /// Tokio runtime.
    ///
    /// The open may fail before the caller gets to subscribe to
    /// [`Store::errors`]; [`Store::ready`] still returns that failure. Use
    /// [`Store::open_with_errors`] to have it on the error stream too.
    pub fn open<B, F>(connect: F) -> Self
    where
        B: Backend + 'static,
        F: Future<Output = Result<B>> + Send + 'static,
    {
        Self::spawn(connect, Stream::new())
    }

    /// Like [`Store::open`], with `on_error` subscribed to
    /// [`Store::errors`] before the backend is opened.
    ///
    /// `on_error` stays registered for the lifetime of the store.
    pub fn open_with_errors<B, F, H>(connect: F, on_error: H) -> Self
    where
        B: Backend + 'static,
        F: Future<Output = Result<B>> + Send + 'static,
        H: Fn(&StorageError) + Send + Sync + 'static,
    {
        let errors = Stream::new();
        errors.subscribe(on_error).detach();
        Self::spawn(connect, errors)
    }

    fn spawn<B, F>(connect: F, errors: Stream<StorageError>) -> Self
    where
        B: Backend + 'static,
        F: Future<Output = Result<B>> + Send + 'static,
    {
        let (commands, queue) = mpsc::unbounded_channel();
        let (ready, readiness) = watch::channel(Readiness::Loading);

        let inner = Arc::new(Inner {
            namespace: S::NAMESPACE,
            defaults: S::defaults(),
            values: RwLock::new(Payload::new()),
            loaded: AtomicBool::new(false),
            touched: Mutex::new(HashSet::new()),
            channels: Mutex::new(HashMap::new()),
            dispatch: ReentrantMutex::new(()),
            commands,
            errors,
            readiness,
        });

        let writer = Writer {
            namespace: S::NAMESPACE,
            store: Arc::downgrade(&inner),
            errors: inner.errors.clone(),
            ready,
        };
        tokio::spawn(writer.run(connect, queue));

        Self {
            inner,
            _schema: PhantomData,
        }
    }

    /// Create a store on an already opened backend.
    pub fn with_backend<B: Backend + 'static>(backend: B) -> Self {
        Self::open(async move { Ok(backend) })
    }

    /// Create a store that persists nothing.
    pub fn in_memory() -> Self {
        Self::with_backend(MemoryBackend::new())
    }

    /// Current value of `key`.
    pub fn get<T: DeserializeOwned>(&self, key: &Key<S, T>) -> T {
        let values = self.inner.values.read();
        let Some(value) = values.get(key.name()) else {
            return key.default_value();
        };
        match T::deserialize(value) {
            Ok(value) => value,
            Err(err) => {
                warn!(
                    namespace = self.inner.namespace,
                    key = key.name(),
                    error = %err,
                    "Stored value has the wrong shape, using default"
                );
                key.default_value()
            }
        }
    }

    /// Replace the value of `key`, notify its subscribers, queue the write.
    ///
    /// A value that cannot be encoded as JSON (e.g. a map with non-string
    /// keys) is rejected: the previous value stays, nobody is notified, and
    /// a `WriteFailed` is pushed to [`Store::errors`].
    pub fn set<T: Serialize>(&self, key: &Key<S, T>, value: T) {
        match serde_json::to_value(value) {
            Ok(value) => self.inner.set_value(key.name(), value),
            Err(err) => {
                let cause = BackendError::from(err);
                warn!(
                    namespace = self.inner.namespace,
                    key = key.name(),
                    error = %cause,
                    "Cannot encode value"
                );
                self.inner.errors.push(StorageError::write_failed(
                    self.inner.namespace,
                    key.name(),
                    cause,
                ));
            }
        }
    }

    /// Revert `key` to its default and delete it from the backend.
    pub fn remove<T>(&self, key: &Key<S, T>) {
        self.inner.remove_value(key.name());
    }

    /// Call `handler` with every new value of `key`.
    ///
    /// The current value is not delivered; read it with [`Store::get`].
    pub fn subscribe<T, F>(&self, key: &Key<S, T>, handler: F) -> Subscription
    where
        T: DeserializeOwned + 'static,
        F: Fn(T) + Send + Sync + 'static,
    {
        let key = *key;
        self.inner.channel(key.name()).subscribe(move |value: &Value| {
            let value = T::deserialize(value).unwrap_or_else(|_| key.default_value());
            handler(value)
        })
    }
}

impl<S> Store<S> {
    /// Backend namespace of this store.
    pub fn namespace(&self) -> &'static str {
        self.inner.namespace
    }

    /// Declared defaults of this store's schema.
    pub fn defaults(&self) -> &Defaults {
        &self.inner.defaults
    }

    /// Open and write failures of the backend.
    pub fn errors(&self) -> &Stream<StorageError> {
        &self.inner.errors
    }

    /// Wait until the backend was opened and loaded.
    ///
    /// Returns the open failure if there was one; the store is usable
    /// either way.
    pub async fn ready(&self) -> std::result::Result<(), StorageError> {
        let mut readiness = self.inner.readiness.clone();
        let state = match readiness
            .wait_for(|state| !matches!(state, Readiness::Loading))
            .await
        {
            Ok(state) => (*state).clone(),
            Err(_) => return Ok(()),
        };
        match state {
            Readiness::Failed(error) => Err(error),
            _ => Ok(()),
        }
    }

    /// Whether loading has finished (successfully or not).
    pub fn is_ready(&self) -> bool {
        !matches!(*self.inner.readiness.borrow(), Readiness::Loading)
    }

    /// Wait until every write queued so far has reached the backend.
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.inner.commands.send(Command::Flush(done)).is_ok() {
            let _ = wait.await;
        }
    }

    /// Effective raw value of `name`: stored, else default.
    pub(crate) fn value(&self, name: &str) -> Option<Value> {
        self.inner.value(name)
    }

    /// Raw values that were loaded or set, without defaults.
    pub(crate) fn stored(&self) -> Payload {
        self.inner.values.read().clone()
    }

    pub(crate) fn set_value(&self, name: &str, value: Value) {
        self.inner.set_value(name, value);
    }

    pub(crate) fn remove_value(&self, name: &str) {
        self.inner.remove_value(name);
    }
}

impl<S> Clone for Store<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            _schema: PhantomData,
        }
    }
}

impl<S> fmt::Debug for Store<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("namespace", &self.inner.namespace)
            .field("keys", &self.inner.values.read().len())
            .finish()
    }
}
