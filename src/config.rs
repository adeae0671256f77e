use crate::errors::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tokio::time::Duration;

pub const SETTINGS_FILE: &str = "settings.yaml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SyncConfig {
    /// Debounce window for document bodies and every notes field.
    pub long_window_ms: u64,
    /// Debounce window for draft content.
    pub short_window_ms: u64,
    /// How long a `synced` indicator stays visible before the key goes absent.
    pub synced_display_ms: u64,
    /// Dead time after clicking an active draft during which a second click
    /// means rename.
    pub rename_grace_ms: u64,
    pub signal_capacity: usize,
    pub default_folder_name: String,
    pub default_document_name: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            long_window_ms: 2_000,
            short_window_ms: 500,
            synced_display_ms: 2_500,
            rename_grace_ms: 200,
            signal_capacity: 256,
            default_folder_name: "New Folder".to_string(),
            default_document_name: "Untitled Document".to_string(),
        }
    }
}

impl SyncConfig {
    /// Reads YAML settings. A missing file means defaults; a malformed one is
    /// reported rather than silently replaced.
    pub fn load(path: &Path) -> AppResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path).map_err(|error| AppError::Io(error.to_string()))?;
        Self::from_yaml_str(&raw)
    }

    pub fn from_yaml_str(raw: &str) -> AppResult<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> AppResult<()> {
        if self.long_window_ms == 0 || self.short_window_ms == 0 {
            return Err(AppError::Invalid(
                "debounce windows must be greater than zero".to_string(),
            ));
        }
        if self.signal_capacity == 0 {
            return Err(AppError::Invalid("signalCapacity must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn long_window(&self) -> Duration {
        Duration::from_millis(self.long_window_ms)
    }

    pub fn short_window(&self) -> Duration {
        Duration::from_millis(self.short_window_ms)
    }

    pub fn synced_display(&self) -> Duration {
        Duration::from_millis(self.synced_display_ms)
    }

    pub fn rename_grace(&self) -> Duration {
        Duration::from_millis(self.rename_grace_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::SyncConfig;

    #[test]
    fn partial_yaml_keeps_remaining_defaults() {
        let config = SyncConfig::from_yaml_str("shortWindowMs: 750\n").expect("parse");
        assert_eq!(config.short_window_ms, 750);
        assert_eq!(config.long_window_ms, 2_000);
        assert_eq!(config.default_folder_name, "New Folder");
    }

    #[test]
    fn zero_window_is_rejected() {
        let err = SyncConfig::from_yaml_str("longWindowMs: 0\n").expect_err("zero window");
        assert!(err.to_string().starts_with("INVALID"));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = SyncConfig::load(&dir.path().join("settings.yaml")).expect("load");
        assert_eq!(config, SyncConfig::default());
    }
}
