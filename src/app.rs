//! Startup sequence for the dashboard's stores.
//!
//! Opens settings and cache, routes their failures to the application's
//! notice sink, waits for both to load, then migrates settings. The
//! returned [`Storage`] is what UI code receives; nothing else holds the
//! stores.

use std::sync::Arc;
use tracing::{info, warn};

use crate::config::{BackendConfig, StorageConfig};
use crate::error::{ErrorKind, MigrationError, StorageError};
use crate::memory::MemoryBackend;
use crate::migrate::MigrationReport;
use crate::schema::Schema;
use crate::settings::{settings_migrations, Cache, Settings};
use crate::sqlite::SqliteBackend;
use crate::store::Store;

/// A storage failure worded for the user.
#[derive(Debug, Clone)]
pub struct Notice {
    pub message: &'static str,
    /// Whether the UI should interrupt the user (settings) or only log
    /// (cache).
    pub blocking: bool,
    pub error: StorageError,
}

const SETTINGS_OPEN_FAILED: &str =
    "Cannot open settings storage. Your settings cannot be loaded or saved.";
const SETTINGS_WRITE_FAILED: &str =
    "Cannot save your settings. You may have hit the maximum storage capacity.";
const CACHE_OPEN_FAILED: &str = "Cannot open cache. Start up performance may be degraded.";
const CACHE_WRITE_FAILED: &str = "Cannot save cache. Start up performance may be degraded.";

impl Notice {
    fn for_settings(error: &StorageError) -> Self {
        let message = match error.kind {
            ErrorKind::OpenFailed => SETTINGS_OPEN_FAILED,
            ErrorKind::WriteFailed => SETTINGS_WRITE_FAILED,
        };
        Self {
            message,
            blocking: true,
            error: error.clone(),
        }
    }

    fn for_cache(error: &StorageError) -> Self {
        let message = match error.kind {
            ErrorKind::OpenFailed => CACHE_OPEN_FAILED,
            ErrorKind::WriteFailed => CACHE_WRITE_FAILED,
        };
        Self {
            message,
            blocking: false,
            error: error.clone(),
        }
    }
}

/// The application's stores.
pub struct Storage {
    pub db: Store<Settings>,
    pub cache: Store<Cache>,
    pub migration: MigrationReport,
}

impl Storage {
    /// Open, load and migrate both stores.
    ///
    /// Storage failures never fail startup; they reach `on_notice` and the
    /// stores carry on in memory. A failed settings migration does.
    pub async fn start<F>(config: &StorageConfig, on_notice: F) -> Result<Self, MigrationError>
    where
        F: Fn(Notice) + Send + Sync + 'static,
    {
        let on_notice = Arc::new(on_notice);
        let db: Store<Settings> = {
            let sink = on_notice.clone();
            open_store(&config.settings, move |error| sink(Notice::for_settings(error)))
        };
        let cache: Store<Cache> =
            open_store(&config.cache, move |error| on_notice(Notice::for_cache(error)));

        let (db_ready, cache_ready) = tokio::join!(db.ready(), cache.ready());
        for error in [db_ready.err(), cache_ready.err()].into_iter().flatten() {
            warn!(
                namespace = %error.namespace,
                error = %error,
                "Storage started without its backend"
            );
        }

        let migration = settings_migrations().run(&db)?;
        info!(settings_version = migration.to, "Storage ready");

        Ok(Self {
            db,
            cache,
            migration,
        })
    }
}

/// Open a store for `config`, with `on_error` attached before the open.
fn open_store<S, H>(config: &BackendConfig, on_error: H) -> Store<S>
where
    S: Schema,
    H: Fn(&StorageError) + Send + Sync + 'static,
{
    match config {
        BackendConfig::Memory => {
            Store::open_with_errors(async { Ok(MemoryBackend::new()) }, on_error)
        }
        BackendConfig::Sqlite(sqlite) => {
            let sqlite = sqlite.clone();
            Store::open_with_errors(
                async move { SqliteBackend::open(&sqlite, S::NAMESPACE).await },
                on_error,
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SqliteConfig;
    use crate::migrate::VERSION_KEY;
    use crate::settings::{ThemePreference, ICONS, LOCALE, THEME_PREFERENCE};
    use parking_lot::Mutex;
    use serde_json::json;

    fn notices() -> (Arc<Mutex<Vec<Notice>>>, impl Fn(Notice) + Send + Sync + 'static) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (seen, move |notice| sink.lock().push(notice))
    }

    #[tokio::test]
    async fn test_start_in_memory() {
        let (seen, sink) = notices();
        let storage = Storage::start(&StorageConfig::in_memory(), sink)
            .await
            .unwrap();

        assert_eq!(storage.migration.to, 2);
        assert_eq!(storage.db.get(&LOCALE), "en");
        assert_eq!(storage.db.value(VERSION_KEY), Some(json!(2)));
        assert!(storage.cache.get(&ICONS).is_empty());
        assert!(seen.lock().is_empty());
    }

    #[tokio::test]
    async fn test_start_persists_across_restarts() {
        let dir = tempfile::tempdir().unwrap();
        let config = StorageConfig {
            settings: BackendConfig::Sqlite(SqliteConfig::new(dir.path().join("state.db"))),
            cache: BackendConfig::Memory,
        };

        {
            let (_, sink) = notices();
            let storage = Storage::start(&config, sink).await.unwrap();
            storage.db.set(&THEME_PREFERENCE, ThemePreference::Dark);
            storage.db.flush().await;
        }

        let (seen, sink) = notices();
        let storage = Storage::start(&config, sink).await.unwrap();
        assert_eq!(storage.db.get(&THEME_PREFERENCE), ThemePreference::Dark);
        assert_eq!(storage.migration.steps_applied, 0);
        assert!(seen.lock().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_unopenable_settings_reports_blocking_notice() {
        let dir = tempfile::tempdir().unwrap();
        // A directory cannot be opened as a database file.
        let config = StorageConfig {
            settings: BackendConfig::Sqlite(SqliteConfig::new(dir.path())),
            cache: BackendConfig::Memory,
        };
        let (seen, sink) = notices();

        let storage = Storage::start(&config, sink).await.unwrap();

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].message, SETTINGS_OPEN_FAILED);
        assert!(seen[0].blocking);
        assert_eq!(seen[0].error.kind, ErrorKind::OpenFailed);
        assert_eq!(storage.db.get(&LOCALE), "en");
    }

    #[tokio::test]
    async fn test_cache_write_failure_is_not_blocking() {
        let dir = tempfile::tempdir().unwrap();
        let config = StorageConfig {
            settings: BackendConfig::Memory,
            cache: BackendConfig::Sqlite(
                SqliteConfig::new(dir.path().join("cache.db")).with_quota(8),
            ),
        };
        let (seen, sink) = notices();
        let storage = Storage::start(&config, sink).await.unwrap();

        storage
            .cache
            .set(&crate::settings::BACKGROUND, Some(json!({"url": "https://example.com/a.jpg"})));
        storage.cache.flush().await;

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].message, CACHE_WRITE_FAILED);
        assert!(!seen[0].blocking);
        assert_eq!(seen[0].error.key.as_deref(), Some("background"));
    }
}
