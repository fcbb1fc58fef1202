//! Persisted user settings (currently just the last chosen destination).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::errors::{BridgeError, BridgeResult};
use crate::filesystem::DestinationInfo;

const SETTINGS_FILENAME: &str = "settings.json";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default)]
    pub destination: Option<DestinationInfo>,
}

/// JSON settings file in the app's local data directory.
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new() -> BridgeResult<Self> {
        let data_dir = dirs::data_local_dir()
            .ok_or_else(|| BridgeError::Internal("Could not determine app data directory".into()))?;
        Ok(Self::with_path(data_dir.join("videobridge").join(SETTINGS_FILENAME)))
    }

    pub fn with_path(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the settings; a missing or unreadable file yields defaults.
    pub fn load(&self) -> Settings {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                log::warn!("Ignoring unreadable settings at {}: {}", self.path.display(), e);
                Settings::default()
            }),
            Err(_) => Settings::default(),
        }
    }

    pub fn load_destination(&self) -> Option<DestinationInfo> {
        self.load().destination
    }

    pub fn save_destination(&self, info: &DestinationInfo) -> BridgeResult<()> {
        let mut settings = self.load();
        settings.destination = Some(info.clone());
        self.save(&settings)
    }

    fn save(&self, settings: &Settings) -> BridgeResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let temp_file = self.path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(settings)?;
        std::fs::write(&temp_file, content)?;
        std::fs::rename(&temp_file, &self.path)?;
        Ok(())
    }
}
