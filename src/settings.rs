//! The dashboard's two stores: user settings and the disposable cache.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;

use crate::migrate::{Migrations, Step};
use crate::schema::{Defaults, Key, Schema};

/// User settings ("db").
pub struct Settings;

/// Derived data that can be rebuilt at any time ("cache").
pub struct Cache;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThemePreference {
    Light,
    Dark,
    System,
}

impl ThemePreference {
    /// Whether the dark theme applies, given the system preference.
    pub fn is_dark(self, system_is_dark: bool) -> bool {
        match self {
            ThemePreference::Light => false,
            ThemePreference::Dark => true,
            ThemePreference::System => system_is_dark,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IconPosition {
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

pub const LOCALE: Key<Settings, String> = Key::new("locale", || "en".to_string());
pub const TIME_ZONE: Key<Settings, Option<String>> = Key::new("timeZone", || None);
pub const HIGHLIGHTING_ENABLED: Key<Settings, bool> = Key::new("highlightingEnabled", || true);
pub const HIDE_SETTINGS_ICON: Key<Settings, bool> = Key::new("hideSettingsIcon", || false);
pub const SETTINGS_ICON_POSITION: Key<Settings, IconPosition> =
    Key::new("settingsIconPosition", || IconPosition::TopLeft);
pub const THEME_PREFERENCE: Key<Settings, ThemePreference> =
    Key::new("themePreference", || ThemePreference::System);
pub const AUTO_HIDE_SETTINGS: Key<Settings, bool> = Key::new("autoHideSettings", || false);

impl Schema for Settings {
    const NAMESPACE: &'static str = "settings";

    fn defaults() -> Defaults {
        Defaults::new()
            .with(&LOCALE)
            .with(&TIME_ZONE)
            .with(&HIGHLIGHTING_ENABLED)
            .with(&HIDE_SETTINGS_ICON)
            .with(&SETTINGS_ICON_POSITION)
            .with(&THEME_PREFERENCE)
            .with(&AUTO_HIDE_SETTINGS)
    }
}

/// Legacy boolean replaced by `themePreference`.
const LEGACY_DARK_MODE: &str = "darkMode";

/// Settings schema history.
///
/// - 0 -> 1: `darkMode` becomes `themePreference`; `locale` recorded.
/// - 1 -> 2: icon and highlighting options recorded with their defaults.
pub fn settings_migrations() -> Migrations<Settings> {
    Migrations::new()
        .step(
            Step::new("dark mode flag to theme preference")
                .transform(|mut payload| {
                    if let Some(dark) = payload.remove(LEGACY_DARK_MODE) {
                        let theme = match dark {
                            Value::Bool(true) => ThemePreference::Dark,
                            Value::Bool(false) | Value::Null => ThemePreference::Light,
                            other => return Err(format!("`{LEGACY_DARK_MODE}` is not a flag: {other}")),
                        };
                        payload
                            .entry(THEME_PREFERENCE.name().to_string())
                            .or_insert(json!(theme));
                    }
                    Ok(payload)
                })
                .add_default(LOCALE.name(), LOCALE.default_value()),
        )
        .step(
            Step::new("settings icon options")
                .add_default(HIDE_SETTINGS_ICON.name(), HIDE_SETTINGS_ICON.default_value())
                .add_default(
                    SETTINGS_ICON_POSITION.name(),
                    SETTINGS_ICON_POSITION.default_value(),
                )
                .add_default(
                    HIGHLIGHTING_ENABLED.name(),
                    HIGHLIGHTING_ENABLED.default_value(),
                ),
        )
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IconKind {
    Image,
    Svg,
    Ico,
}

/// An uploaded link icon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IconCacheItem {
    pub data: String,
    #[serde(rename = "type")]
    pub kind: IconKind,
    pub size: u64,
}

pub const ICONS: Key<Cache, BTreeMap<String, IconCacheItem>> = Key::new("icons", BTreeMap::new);
pub const BACKGROUND: Key<Cache, Option<Value>> = Key::new("background", || None);

impl Schema for Cache {
    const NAMESPACE: &'static str = "cache";

    fn defaults() -> Defaults {
        Defaults::new().with(&ICONS).with(&BACKGROUND)
    }
}
