//! Persisted application settings.
//!
//! Settings live in a single JSON file. Loading merges whatever is on disk
//! with the defaults, so files written by older versions keep working.
//! Nothing is written until [`Settings::save`] is called explicitly.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::config::ControlSettings;
use crate::error::Result;
use crate::export::StockSite;
use crate::types::Credential;

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";
pub const SETTINGS_FILE: &str = "settings.json";
pub const API_KEY_ENV: &str = "GEMINI_API_KEY";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    pub api_keys: Vec<Credential>,
    pub model: String,
    pub selected_stock_site: StockSite,
    /// Replacement extension for exported file names; `"default"` keeps the original.
    pub file_extension: String,
    pub controls: ControlSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_keys: Vec::new(),
            model: DEFAULT_MODEL.to_string(),
            selected_stock_site: StockSite::General,
            file_extension: "default".to_string(),
            controls: ControlSettings::default(),
        }
    }
}

impl Settings {
    /// Default settings path: `settings.json` in the working directory.
    pub fn default_path() -> PathBuf {
        PathBuf::from(SETTINGS_FILE)
    }

    /// Load settings from `path`, falling back to defaults if the file is
    /// missing. A malformed file is reported and replaced by defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No settings file, using defaults");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        match serde_json::from_str::<Settings>(&raw) {
            Ok(settings) => Ok(settings),
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "Failed to parse settings");
                Ok(Self::default())
            }
        }
    }

    /// Write settings as pretty JSON, creating parent directories as needed.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        tracing::info!(path = %path.display(), "Settings saved");
        Ok(())
    }

    /// Add the key from `GEMINI_API_KEY` when no keys are stored.
    pub fn apply_env(&mut self) {
        if !self.api_keys.is_empty() {
            return;
        }
        if let Ok(key) = std::env::var(API_KEY_ENV) {
            let key = key.trim();
            if !key.is_empty() {
                self.api_keys.push(Credential::new(key));
            }
        }
    }

    /// Add a key unless it is already present. Returns `true` if added.
    pub fn add_key(&mut self, token: &str) -> bool {
        let token = token.trim();
        if token.is_empty() || self.api_keys.iter().any(|k| k.token() == token) {
            return false;
        }
        self.api_keys.push(Credential::new(token));
        true
    }

    /// Remove the key at `index`, returning it.
    pub fn remove_key(&mut self, index: usize) -> Option<Credential> {
        if index < self.api_keys.len() {
            Some(self.api_keys.remove(index))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GenerationMode;
    use tempfile::tempdir;

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let dir = tempdir().unwrap();
        let settings = Settings::load(&dir.path().join("nope.json")).unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.model, DEFAULT_MODEL);
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let mut settings = Settings::default();
        settings.add_key("key-one-123456");
        settings.controls.keywords_count = 12;
        settings.selected_stock_site = StockSite::AdobeStock;
        settings.save(&path).unwrap();

        let loaded = Settings::load(&path).unwrap();
        assert_eq!(loaded, settings);
    }

    #[test]
    fn test_partial_file_merges_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"apiKeys": ["abc"], "controls": {"activeTab": "prompt"}}"#,
        )
        .unwrap();
        let loaded = Settings::load(&path).unwrap();
        assert_eq!(loaded.api_keys.len(), 1);
        assert_eq!(loaded.model, DEFAULT_MODEL);
        assert_eq!(loaded.controls.active_tab, GenerationMode::Prompt);
        assert_eq!(loaded.controls.keywords_count, 30);
    }

    #[test]
    fn test_malformed_file_falls_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();
        assert_eq!(Settings::load(&path).unwrap(), Settings::default());
    }

    #[test]
    fn test_add_and_remove_keys() {
        let mut settings = Settings::default();
        assert!(settings.add_key("k1"));
        assert!(!settings.add_key("k1"));
        assert!(!settings.add_key("   "));
        assert!(settings.add_key("k2"));
        assert_eq!(settings.remove_key(0).unwrap().token(), "k1");
        assert!(settings.remove_key(5).is_none());
        assert_eq!(settings.api_keys.len(), 1);
    }
}
