//! Settings persistence with a volatile in-memory overlay.
//!
//! The persistent layer is a TOML file; the volatile layer is a partial
//! value kept in memory for page-lifetime state. `load` merges
//! defaults <- stored <- volatile, in that order.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde_json::Value;
use tracing::warn;

use crate::schema::Settings;
use sidecar_common::{ProviderKind, SettingsError};

/// Whether a settings update should be written to disk or kept in memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingScope {
    Persistent,
    Volatile,
}

/// Loads and saves [`Settings`].
///
/// Constructed without a path (no host storage available) the store still
/// works: loads return defaults plus the volatile overlay, and persistent
/// saves are refused.
pub struct SettingsStore {
    path: Option<PathBuf>,
    volatile: Mutex<Value>,
}

impl SettingsStore {
    /// Store backed by the platform default path
    /// (`~/.config/sidecar/settings.toml` on Linux).
    pub fn new() -> Self {
        let path = dirs::config_dir().map(|dir| dir.join("sidecar").join("settings.toml"));
        if path.is_none() {
            warn!("no config directory available, settings will not persist");
        }
        Self {
            path,
            volatile: Mutex::new(Value::Object(Default::default())),
        }
    }

    /// Store backed by a specific file path.
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            volatile: Mutex::new(Value::Object(Default::default())),
        }
    }

    /// Store with no persistent backing at all.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            volatile: Mutex::new(Value::Object(Default::default())),
        }
    }

    /// Load the effective settings. Never fails: unreadable or invalid
    /// storage degrades to defaults with a warning.
    pub fn load(&self) -> Settings {
        let mut merged = serde_json::to_value(Settings::default())
            .unwrap_or_else(|_| Value::Object(Default::default()));

        if let Some(stored) = self.read_stored() {
            deep_merge(&mut merged, &stored);
        }
        {
            let volatile = self.volatile.lock().expect("volatile settings poisoned");
            deep_merge(&mut merged, &volatile);
        }

        // A stale settings file may name a provider this build doesn't know;
        // fall back to the default rather than failing the whole load.
        if let Some(id) = merged["default_provider"].as_str() {
            if id.parse::<ProviderKind>().is_err() {
                warn!(provider = id, "unknown default_provider in settings, using default");
                merged["default_provider"] = Value::String(
                    Settings::default().default_provider.as_str().to_string(),
                );
            }
        }

        match serde_json::from_value(merged) {
            Ok(settings) => settings,
            Err(e) => {
                warn!("invalid settings, falling back to defaults: {e}");
                Settings::default()
            }
        }
    }

    /// Snapshot of the volatile overlay only.
    pub fn volatile(&self) -> Value {
        self.volatile.lock().expect("volatile settings poisoned").clone()
    }

    /// Apply a partial update. Persistent updates are deep-merged into the
    /// stored file and written atomically; volatile updates only touch the
    /// in-memory overlay.
    pub fn save(&self, partial: &Value, scope: SettingScope) -> Result<(), SettingsError> {
        match scope {
            SettingScope::Volatile => {
                let mut volatile = self.volatile.lock().expect("volatile settings poisoned");
                deep_merge(&mut volatile, partial);
                Ok(())
            }
            SettingScope::Persistent => {
                let path = self.path.as_ref().ok_or_else(|| {
                    SettingsError::Io("no settings path configured".to_string())
                })?;
                let mut stored = self
                    .read_stored()
                    .unwrap_or_else(|| Value::Object(Default::default()));
                deep_merge(&mut stored, partial);
                write_atomic(path, &stored)
            }
        }
    }

    fn read_stored(&self) -> Option<Value> {
        let path = self.path.as_ref()?;
        if !path.exists() {
            return None;
        }
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                warn!("failed to read settings from {}: {e}", path.display());
                return None;
            }
        };
        match toml::from_str::<Value>(&content) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("failed to parse settings TOML: {e}");
                None
            }
        }
    }
}

impl Default for SettingsStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Recursively merge `patch` into `target`. Objects merge key-by-key;
/// everything else (including arrays) replaces wholesale.
fn deep_merge(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(target_map), Value::Object(patch_map)) => {
            for (key, patch_value) in patch_map {
                deep_merge(
                    target_map.entry(key.clone()).or_insert(Value::Null),
                    patch_value,
                );
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}

/// Write TOML to `path` via a temp file rename so a crash mid-write never
/// leaves a truncated settings file.
fn write_atomic(path: &Path, value: &Value) -> Result<(), SettingsError> {
    let toml_str = toml::to_string_pretty(value)
        .map_err(|e| SettingsError::Parse(format!("failed to serialize settings: {e}")))?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            SettingsError::Io(format!(
                "failed to create settings directory {}: {e}",
                parent.display()
            ))
        })?;
    }

    let tmp_path = path.with_extension("toml.tmp");
    std::fs::write(&tmp_path, &toml_str).map_err(|e| {
        SettingsError::Io(format!("failed to write {}: {e}", tmp_path.display()))
    })?;

    if let Err(e) = std::fs::rename(&tmp_path, path) {
        warn!("atomic rename failed ({e}), falling back to direct write");
        std::fs::write(path, &toml_str).map_err(|e2| {
            SettingsError::Io(format!("failed to write {}: {e2}", path.display()))
        })?;
    }

    Ok(())
}
