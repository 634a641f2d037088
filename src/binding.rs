//! Reactive bindings from one store key to a UI component.
//!
//! Built only on the public [`Store`] contract. A binding is bound from
//! construction until it is disposed or dropped; while bound it always
//! holds the key's latest value.
//!
//! - [`read`] / [`read_with`]: follow a key, optionally calling a render
//!   callback on every change.
//! - [`read_write`]: the same plus a setter. There is no local buffer;
//!   every write goes through the store and comes back as a notification.

use parking_lot::RwLock;
use serde::{de::DeserializeOwned, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::schema::{Key, Schema};
use crate::store::Store;
use crate::stream::Subscription;

/// Read-only binding to one key.
pub struct Binding<S, T> {
    key: Key<S, T>,
    latest: Arc<RwLock<T>>,
    subscription: Subscription,
}

impl<S, T> Binding<S, T>
where
    S: Schema,
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    fn bind<F>(store: &Store<S>, key: &Key<S, T>, render: F) -> Self
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let latest = Arc::new(RwLock::new(store.get(key)));
        let notified = Arc::new(AtomicBool::new(false));
        let subscription = {
            let latest = latest.clone();
            let notified = notified.clone();
            store.subscribe(key, move |value: T| {
                {
                    let mut latest = latest.write();
                    *latest = value.clone();
                    notified.store(true, Ordering::Release);
                }
                render(&value);
            })
        };
        // Catch a set between the first read and subscribing, unless a
        // notification already delivered something newer.
        let current = store.get(key);
        let mut guard = latest.write();
        if !notified.load(Ordering::Acquire) {
            *guard = current;
        }
        drop(guard);

        Self {
            key: *key,
            latest,
            subscription,
        }
    }
}

impl<S, T> Binding<S, T> {
    /// Latest value of the key.
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        self.latest.read().clone()
    }

    /// Borrow the latest value.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.latest.read())
    }

    pub fn key(&self) -> &Key<S, T> {
        &self.key
    }

    /// Stop following the key. Dropping the binding does the same.
    pub fn dispose(self) {
        self.subscription.unsubscribe();
    }
}

impl<S, T: fmt::Debug> fmt::Debug for Binding<S, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Binding")
            .field("key", &self.key.name())
            .field("latest", &*self.latest.read())
            .finish()
    }
}

/// Read-write binding to one key.
pub struct ReadWrite<S, T> {
    binding: Binding<S, T>,
    store: Store<S>,
}

impl<S, T> ReadWrite<S, T>
where
    S: Schema,
    T: DeserializeOwned + Serialize + Clone + Send + Sync + 'static,
{
    /// Latest value of the key.
    pub fn get(&self) -> T {
        self.binding.get()
    }

    /// Write through the store.
    pub fn set(&self, value: T) {
        self.store.set(&self.binding.key, value);
    }

    /// A detached setter for the key, e.g. for an event handler.
    pub fn setter(&self) -> impl Fn(T) + Send + Sync + 'static {
        let store = self.store.clone();
        let key = self.binding.key;
        move |value: T| store.set(&key, value)
    }

    /// The read side of this binding.
    pub fn binding(&self) -> &Binding<S, T> {
        &self.binding
    }

    /// Stop following the key. Dropping the binding does the same.
    pub fn dispose(self) {
        self.binding.dispose();
    }
}

/// Follow `key`.
pub fn read<S, T>(store: &Store<S>, key: &Key<S, T>) -> Binding<S, T>
where
    S: Schema,
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    Binding::bind(store, key, |_: &T| {})
}

/// Follow `key`, calling `render` with every new value.
pub fn read_with<S, T, F>(store: &Store<S>, key: &Key<S, T>, render: F) -> Binding<S, T>
where
    S: Schema,
    T: DeserializeOwned + Clone + Send + Sync + 'static,
    F: Fn(&T) + Send + Sync + 'static,
{
    Binding::bind(store, key, render)
}

/// Follow `key` and write it back.
pub fn read_write<S, T>(store: &Store<S>, key: &Key<S, T>) -> ReadWrite<S, T>
where
    S: Schema,
    T: DeserializeOwned + Serialize + Clone + Send + Sync + 'static,
{
    ReadWrite {
        binding: read(store, key),
        store: store.clone(),
    }
}

/// Like [`read_write`], calling `render` with every new value.
pub fn read_write_with<S, T, F>(store: &Store<S>, key: &Key<S, T>, render: F) -> ReadWrite<S, T>
where
    S: Schema,
    T: DeserializeOwned + Serialize + Clone + Send + Sync + 'static,
    F: Fn(&T) + Send + Sync + 'static,
{
    ReadWrite {
        binding: read_with(store, key, render),
        store: store.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Defaults;
    use crate::testing::RecordingBackend;
    use parking_lot::Mutex;
    use serde_json::json;

    struct Prefs;

    const LOCALE: Key<Prefs, String> = Key::new("locale", || "en".to_string());
    const THEME: Key<Prefs, String> = Key::new("theme", || "light".to_string());

    impl Schema for Prefs {
        const NAMESPACE: &'static str = "prefs";

        fn defaults() -> Defaults {
            Defaults::new().with(&LOCALE).with(&THEME)
        }
    }

    fn renders() -> (Arc<Mutex<Vec<String>>>, impl Fn(&String) + Send + Sync + 'static) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (seen, move |v: &String| sink.lock().push(v.clone()))
    }

    #[tokio::test]
    async fn test_read_starts_with_current_value() {
        let store: Store<Prefs> = Store::in_memory();
        store.set(&LOCALE, "fr".to_string());

        let locale = read(&store, &LOCALE);
        assert_eq!(locale.get(), "fr");
        assert_eq!(locale.key().name(), "locale");

        store.set(&LOCALE, "de".to_string());
        assert_eq!(locale.get(), "de");
        assert_eq!(locale.with(|v| v.len()), 2);
    }

    #[tokio::test]
    async fn test_read_write_theme_scenario() {
        let backend = RecordingBackend::new().shared();
        let store: Store<Prefs> = Store::with_backend(backend.clone());
        store.ready().await.unwrap();

        let (seen, render) = renders();
        let theme = read_write_with(&store, &THEME, render);
        assert_eq!(theme.get(), "light");

        store.set(&THEME, "dark".to_string());

        assert_eq!(*seen.lock(), vec!["dark".to_string()]);
        assert_eq!(theme.get(), "dark");
        assert_eq!(store.get(&THEME), "dark");
        store.flush().await;
        assert_eq!(backend.puts(), vec![("theme".to_string(), json!("dark"))]);
    }

    #[tokio::test]
    async fn test_all_bindings_see_same_sequence() {
        let store: Store<Prefs> = Store::in_memory();
        let (first_seen, first_render) = renders();
        let (second_seen, second_render) = renders();
        let first = read_write_with(&store, &THEME, first_render);
        let second = read_write_with(&store, &THEME, second_render);

        first.set("dark".to_string());
        let set_theme = second.setter();
        set_theme("sepia".to_string());
        first.set("light".to_string());

        let expected = vec!["dark".to_string(), "sepia".to_string(), "light".to_string()];
        assert_eq!(*first_seen.lock(), expected);
        assert_eq!(*second_seen.lock(), expected);
        assert_eq!(second.binding().get(), "light");
    }

    #[tokio::test]
    async fn test_dispose_stops_updates() {
        let store: Store<Prefs> = Store::in_memory();
        let (seen, render) = renders();
        let binding = read_with(&store, &THEME, render);

        store.set(&THEME, "dark".to_string());
        binding.dispose();
        store.set(&THEME, "light".to_string());

        assert_eq!(*seen.lock(), vec!["dark".to_string()]);
    }

    #[tokio::test]
    async fn test_drop_stops_updates() {
        let store: Store<Prefs> = Store::in_memory();
        let (seen, render) = renders();
        {
            let _binding = read_write_with(&store, &THEME, render);
            store.set(&THEME, "dark".to_string());
        }
        store.set(&THEME, "light".to_string());

        assert_eq!(*seen.lock(), vec!["dark".to_string()]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_bind_during_concurrent_sets_ends_on_latest() {
        let store: Store<Prefs> = Store::in_memory();
        store.ready().await.unwrap();

        for round in 0..200 {
            let writer = {
                let store = store.clone();
                std::thread::spawn(move || {
                    for i in 0..20 {
                        store.set(&THEME, format!("r{round}-{i}"));
                    }
                })
            };
            let theme = read(&store, &THEME);
            writer.join().unwrap();

            assert_eq!(theme.get(), store.get(&THEME));
            assert_eq!(theme.get(), format!("r{round}-19"));
        }
    }

    #[tokio::test]
    async fn test_binding_follows_load() {
        let store: Store<Prefs> =
            Store::with_backend(RecordingBackend::new().with_data(json!({"locale": "ja"})));
        let locale = read(&store, &LOCALE);
        assert_eq!(locale.get(), "en");

        store.ready().await.unwrap();
        assert_eq!(locale.get(), "ja");
    }
}
