//! Remembered "never ask again" answers.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PreferenceError {
    #[error("failed to save preferences to {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode preferences: {0}")]
    Encode(#[from] serde_json::Error),
}

pub trait PreferenceStore: Send + Sync {
    fn is_suppressed(&self, key: &str) -> bool;

    /// Remember that the prompt under `key` should not be shown again.
    fn suppress(&self, key: &str) -> Result<(), PreferenceError>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PreferencesFile {
    #[serde(default)]
    suppressed: BTreeSet<String>,
}

/// Preferences kept in a small JSON file, rewritten on every change.
#[derive(Debug)]
pub struct JsonPreferences {
    path: PathBuf,
    state: Mutex<PreferencesFile>,
}

impl JsonPreferences {
    /// Load from `path`. A missing or unreadable file starts out empty.
    #[must_use]
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let state = match std::fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|error| {
                warn!("Ignoring malformed preferences {}: {error}", path.display());
                PreferencesFile::default()
            }),
            Err(_) => PreferencesFile::default(),
        };
        Self {
            path,
            state: Mutex::new(state),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, state: &PreferencesFile) -> Result<(), PreferenceError> {
        let io_error = |source| PreferenceError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_error)?;
        }
        let content = serde_json::to_string_pretty(state)?;
        std::fs::write(&self.path, content).map_err(io_error)
    }
}

impl PreferenceStore for JsonPreferences {
    fn is_suppressed(&self, key: &str) -> bool {
        self.state
            .lock()
            .is_ok_and(|state| state.suppressed.contains(key))
    }

    fn suppress(&self, key: &str) -> Result<(), PreferenceError> {
        let Ok(mut state) = self.state.lock() else {
            return Ok(());
        };
        if state.suppressed.insert(key.to_string()) {
            self.persist(&state)?;
            debug!("Suppressed prompt {key}");
        }
        Ok(())
    }
}

/// Preferences that last for the life of the process.
#[derive(Debug, Default)]
pub struct MemoryPreferences {
    suppressed: Mutex<BTreeSet<String>>,
}

impl PreferenceStore for MemoryPreferences {
    fn is_suppressed(&self, key: &str) -> bool {
        self.suppressed
            .lock()
            .is_ok_and(|suppressed| suppressed.contains(key))
    }

    fn suppress(&self, key: &str) -> Result<(), PreferenceError> {
        if let Ok(mut suppressed) = self.suppressed.lock() {
            suppressed.insert(key.to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_preferences_survive_reload() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let path = temp.path().join("config").join("preferences.json");

        let prefs = JsonPreferences::load(&path);
        assert!(!prefs.is_suppressed("skip-upgrade-prompt"));
        prefs
            .suppress("skip-upgrade-prompt")
            .expect("suppression should be saved");
        assert!(prefs.is_suppressed("skip-upgrade-prompt"));

        let reloaded = JsonPreferences::load(&path);
        assert!(reloaded.is_suppressed("skip-upgrade-prompt"));
        assert!(!reloaded.is_suppressed("skip-version-warning"));
    }

    #[test]
    fn malformed_preferences_start_empty() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let path = temp.path().join("preferences.json");
        std::fs::write(&path, "{ not json").expect("seed file");

        let prefs = JsonPreferences::load(&path);
        assert!(!prefs.is_suppressed("skip-version-warning"));
    }

    #[test]
    fn memory_preferences_remember_keys() {
        let prefs = MemoryPreferences::default();
        prefs
            .suppress("skip-version-warning")
            .expect("memory store never fails");
        assert!(prefs.is_suppressed("skip-version-warning"));
        assert!(!prefs.is_suppressed("skip-upgrade-prompt"));
    }
}
