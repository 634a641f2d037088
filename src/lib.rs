//! # newtab-state
//!
//! Typed, observable, persisted key-value state for the new-tab dashboard.
//!
//! Every widget reads and writes its slice of configuration through a
//! [`Store`]. A store:
//!
//! - **Answers synchronously**: `get` always returns a value (last set,
//!   loaded, or the declared default), even while the backend is loading.
//! - **Notifies in order**: every subscriber of a key sees every `set` of
//!   that key, in call order, before `set` returns.
//! - **Persists in the background**: writes are queued to a [`Backend`]
//!   ([`SqliteBackend`] or [`MemoryBackend`]); failures go to an error
//!   [`Stream`] instead of the caller.
//! - **Migrates**: [`Migrations`] upgrade data written by older schema
//!   versions, idempotently.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use newtab_state::{Defaults, Key, Schema, Store};
//!
//! struct Prefs;
//!
//! const THEME: Key<Prefs, String> = Key::new("theme", || "light".to_string());
//!
//! impl Schema for Prefs {
//!     const NAMESPACE: &'static str = "prefs";
//!
//!     fn defaults() -> Defaults {
//!         Defaults::new().with(&THEME)
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let store: Store<Prefs> = Store::in_memory();
//!     let _errors = store.errors().subscribe(|err| eprintln!("{err}"));
//!
//!     let _sub = store.subscribe(&THEME, |theme| println!("theme is now {theme}"));
//!     store.set(&THEME, "dark".to_string());
//!     assert_eq!(store.get(&THEME), "dark");
//!
//!     store.ready().await.ok();
//!     store.flush().await;
//! }
//! ```
//!
//! ## Bindings
//!
//! ```rust,no_run
//! use newtab_state::binding;
//! use newtab_state::settings::{Settings, LOCALE};
//! use newtab_state::Store;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let store: Store<Settings> = Store::in_memory();
//! let locale = binding::read_write_with(&store, &LOCALE, |locale| println!("render {locale}"));
//! locale.set("fr".to_string());
//! assert_eq!(locale.get(), "fr");
//! # }
//! ```
//!
//! ## Startup
//!
//! ```rust,no_run
//! use newtab_state::{Storage, StorageConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), newtab_state::MigrationError> {
//!     let storage = Storage::start(&StorageConfig::default(), |notice| {
//!         eprintln!("{}: {}", notice.message, notice.error);
//!     })
//!     .await?;
//!     println!("settings at version {}", storage.migration.to);
//!     Ok(())
//! }
//! ```

pub mod app;
pub mod backend;
pub mod binding;
pub mod config;
pub mod error;
pub mod memory;
pub mod migrate;
pub mod schema;
pub mod settings;
pub mod sqlite;
pub mod store;
pub mod stream;
pub mod watch;

#[cfg(test)]
mod testing;

// Re-export main types
pub use app::{Notice, Storage};
pub use backend::{Backend, Payload};
pub use binding::{Binding, ReadWrite};
pub use config::{BackendConfig, SqliteConfig, StorageConfig};
pub use error::{BackendError, ErrorKind, MigrationError, Result, StorageError};
pub use memory::MemoryBackend;
pub use migrate::{MigrationReport, Migrations, Persisted, Step, VERSION_KEY};
pub use schema::{Defaults, Key, Schema};
pub use sqlite::SqliteBackend;
pub use store::Store;
pub use stream::{Stream, Subscription};
pub use watch::Listener;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::binding::{read, read_with, read_write, read_write_with, Binding, ReadWrite};
    pub use crate::error::{ErrorKind, MigrationError, StorageError};
    pub use crate::migrate::{Migrations, Step};
    pub use crate::schema::{Defaults, Key, Schema};
    pub use crate::store::Store;
    pub use crate::stream::{Stream, Subscription};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_settings_store_basic() {
        let store: Store<settings::Settings> = Store::in_memory();

        store.set(&settings::AUTO_HIDE_SETTINGS, true);
        assert!(store.get(&settings::AUTO_HIDE_SETTINGS));
        store.ready().await.unwrap();
    }

    #[tokio::test]
    async fn test_types_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}

        assert_send_sync::<Store<settings::Settings>>();
        assert_send_sync::<Stream<StorageError>>();
        assert_send_sync::<Subscription>();
        assert_send_sync::<SqliteBackend>();
        assert_send_sync::<Binding<settings::Settings, String>>();
    }
}
