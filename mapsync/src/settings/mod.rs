//! Per-layer user preferences.
//!
//! Each data source has two persisted preferences:
//!
//! - `show_<key>`: whether the layer is visible (bool, default `false`)
//! - `order_<key>`: the layer's z-order (int, default `0`)
//!
//! Stores are observable: every write is broadcast as a [`SettingChange`].
//! Stores do not deduplicate; [`SettingsSubscription`] does, per layer.

mod ini_store;
mod subscription;

pub use ini_store::{default_settings_path, IniSettingsStore, LAYERS_SECTION};
pub use subscription::{PreferenceChange, PreferenceFilter, SettingsSubscription};

use std::collections::HashMap;
use std::fmt;

use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::features::DataSourceKey;

/// Capacity of a store's change channel.
pub const SETTINGS_EVENT_CAPACITY: usize = 64;

/// Default z-order for a layer with no stored preference.
pub const DEFAULT_ORDER: i64 = 0;

/// Errors from loading or saving preferences.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse settings file: {0}")]
    Parse(String),

    #[error("invalid value '{value}' for [{section}] {key}: {reason}")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
        reason: String,
    },
}

impl From<ini::Error> for SettingsError {
    fn from(e: ini::Error) -> Self {
        match e {
            ini::Error::Io(io) => SettingsError::Io(io),
            ini::Error::Parse(parse) => SettingsError::Parse(parse.to_string()),
        }
    }
}

/// A stored preference value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingValue {
    Bool(bool),
    Int(i64),
}

impl fmt::Display for SettingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingValue::Bool(v) => write!(f, "{}", v),
            SettingValue::Int(v) => write!(f, "{}", v),
        }
    }
}

/// One write to a store.
#[derive(Debug, Clone, PartialEq)]
pub struct SettingChange {
    pub key: String,
    pub value: SettingValue,
}

/// Key holding a layer's visibility.
pub fn visibility_key(data_source: &DataSourceKey) -> String {
    format!("show_{}", data_source.as_str())
}

/// Key holding a layer's z-order.
pub fn order_key(data_source: &DataSourceKey) -> String {
    format!("order_{}", data_source.as_str())
}

/// Observable key-value preference store.
pub trait SettingsStore: Send + Sync {
    fn get(&self, key: &str) -> Option<SettingValue>;

    /// Store a value and broadcast the write, even if unchanged.
    fn set(&self, key: &str, value: SettingValue);

    fn subscribe(&self) -> broadcast::Receiver<SettingChange>;

    /// Stored visibility for a layer, defaulting to hidden.
    fn visibility(&self, data_source: &DataSourceKey) -> bool {
        match self.get(&visibility_key(data_source)) {
            Some(SettingValue::Bool(v)) => v,
            _ => false,
        }
    }

    /// Stored z-order for a layer, defaulting to [`DEFAULT_ORDER`].
    fn order(&self, data_source: &DataSourceKey) -> i64 {
        match self.get(&order_key(data_source)) {
            Some(SettingValue::Int(v)) => v,
            _ => DEFAULT_ORDER,
        }
    }
}

/// In-process observable store.
pub struct MemorySettingsStore {
    values: RwLock<HashMap<String, SettingValue>>,
    events: broadcast::Sender<SettingChange>,
}

impl fmt::Debug for MemorySettingsStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemorySettingsStore")
            .field("values", &*self.values.read())
            .finish()
    }
}

impl Default for MemorySettingsStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        Self::with_values(HashMap::new())
    }

    pub fn with_values(values: HashMap<String, SettingValue>) -> Self {
        let (events, _) = broadcast::channel(SETTINGS_EVENT_CAPACITY);
        Self {
            values: RwLock::new(values),
            events,
        }
    }

    /// Copy of every stored value.
    pub fn snapshot(&self) -> HashMap<String, SettingValue> {
        self.values.read().clone()
    }
}

impl SettingsStore for MemorySettingsStore {
    fn get(&self, key: &str) -> Option<SettingValue> {
        self.values.read().get(key).copied()
    }

    fn set(&self, key: &str, value: SettingValue) {
        self.values.write().insert(key.to_string(), value);
        let _ = self.events.send(SettingChange {
            key: key.to_string(),
            value,
        });
    }

    fn subscribe(&self) -> broadcast::Receiver<SettingChange> {
        self.events.subscribe()
    }
}
