//! INI-backed preference store.
//!
//! File layout:
//!
//! ```ini
//! [layers]
//! show_observations = true
//! order_observations = 2
//! ```
//!
//! Values are held in memory and written back with [`IniSettingsStore::save`].

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use ini::Ini;
use tokio::sync::broadcast;
use tracing::{debug, info};

use super::{MemorySettingsStore, SettingChange, SettingValue, SettingsError, SettingsStore};

/// Section holding layer preferences.
pub const LAYERS_SECTION: &str = "layers";

/// Default location of the preferences file (`<config dir>/mapsync/layers.ini`).
pub fn default_settings_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("mapsync").join("layers.ini"))
}

/// Observable store persisted to an INI file.
pub struct IniSettingsStore {
    path: PathBuf,
    inner: MemorySettingsStore,
}

impl fmt::Debug for IniSettingsStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IniSettingsStore")
            .field("path", &self.path)
            .field("inner", &self.inner)
            .finish()
    }
}

impl IniSettingsStore {
    /// Load preferences from `path`. A missing file yields an empty store.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, SettingsError> {
        let path = path.into();
        let values = if path.exists() {
            let ini = Ini::load_from_file(&path)?;
            parse_layers(&ini)?
        } else {
            debug!(path = %path.display(), "No settings file; starting empty");
            HashMap::new()
        };

        info!(path = %path.display(), entries = values.len(), "Loaded layer settings");
        Ok(Self {
            path,
            inner: MemorySettingsStore::with_values(values),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write all values back to the file, creating parent directories.
    pub fn save(&self) -> Result<(), SettingsError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut entries: Vec<_> = self.inner.snapshot().into_iter().collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        let mut ini = Ini::new();
        for (key, value) in entries {
            ini.set_to(Some(LAYERS_SECTION), key, value.to_string());
        }
        ini.write_to_file(&self.path)?;

        debug!(path = %self.path.display(), "Saved layer settings");
        Ok(())
    }
}

impl SettingsStore for IniSettingsStore {
    fn get(&self, key: &str) -> Option<SettingValue> {
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: SettingValue) {
        self.inner.set(key, value);
    }

    fn subscribe(&self) -> broadcast::Receiver<SettingChange> {
        self.inner.subscribe()
    }
}

fn parse_layers(ini: &Ini) -> Result<HashMap<String, SettingValue>, SettingsError> {
    let mut values = HashMap::new();
    let Some(section) = ini.section(Some(LAYERS_SECTION)) else {
        return Ok(values);
    };

    for (key, raw) in section.iter() {
        let raw = raw.trim();
        if key.starts_with("show_") {
            values.insert(key.to_string(), SettingValue::Bool(parse_bool(key, raw)?));
        } else if key.starts_with("order_") {
            let order = raw.parse().map_err(|_| invalid(key, raw, "must be an integer"))?;
            values.insert(key.to_string(), SettingValue::Int(order));
        } else {
            debug!(key, "Ignoring unknown layer setting");
        }
    }
    Ok(values)
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, SettingsError> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => Err(invalid(key, raw, "must be true or false")),
    }
}

fn invalid(key: &str, value: &str, reason: &str) -> SettingsError {
    SettingsError::InvalidValue {
        section: LAYERS_SECTION.to_string(),
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::DataSourceKey;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = IniSettingsStore::load(dir.path().join("layers.ini")).unwrap();
        assert!(!store.visibility(&DataSourceKey::new("obs")));
    }

    #[test]
    fn test_load_values() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("layers.ini");
        std::fs::write(
            &path,
            "[layers]\nshow_obs = yes\norder_obs = 3\nshow_feeds = false\ncolor = red\n",
        )
        .unwrap();

        let store = IniSettingsStore::load(&path).unwrap();
        assert!(store.visibility(&DataSourceKey::new("obs")));
        assert_eq!(store.order(&DataSourceKey::new("obs")), 3);
        assert!(!store.visibility(&DataSourceKey::new("feeds")));
        assert_eq!(store.get("color"), None);
    }

    #[test]
    fn test_invalid_bool() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("layers.ini");
        std::fs::write(&path, "[layers]\nshow_obs = maybe\n").unwrap();

        let err = IniSettingsStore::load(&path).unwrap_err();
        assert!(matches!(err, SettingsError::InvalidValue { ref key, .. } if key == "show_obs"));
    }

    #[test]
    fn test_invalid_order() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("layers.ini");
        std::fs::write(&path, "[layers]\norder_obs = top\n").unwrap();

        assert!(IniSettingsStore::load(&path).is_err());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("layers.ini");

        let store = IniSettingsStore::load(&path).unwrap();
        store.set("show_obs", SettingValue::Bool(true));
        store.set("order_obs", SettingValue::Int(-2));
        store.save().unwrap();

        let reloaded = IniSettingsStore::load(&path).unwrap();
        assert!(reloaded.visibility(&DataSourceKey::new("obs")));
        assert_eq!(reloaded.order(&DataSourceKey::new("obs")), -2);
    }

    #[test]
    fn test_default_settings_path_ends_with_file_name() {
        if let Some(path) = default_settings_path() {
            assert!(path.ends_with("mapsync/layers.ini"));
        }
    }
}
