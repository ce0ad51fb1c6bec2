use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{SyncError, SyncResult};

const SETTINGS_FILE: &str = "settings.json";
const API_KEY_ENV: &str = "MODIO_API_KEY";

/// Knobs for a reconciliation pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Maximum number of mods fetched/extracted in parallel.
    pub concurrency_limit: usize,
    /// Per-action timeout for fetch and extract, in seconds.
    pub action_timeout_secs: u64,
    /// Retry budget surfaced to the caller; the engine itself never
    /// retries a failed action.
    pub retry_count: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: 8,
            action_timeout_secs: 60,
            retry_count: 0,
        }
    }
}

impl SyncConfig {
    pub fn action_timeout(&self) -> Duration {
        Duration::from_secs(self.action_timeout_secs)
    }
}

/// Persisted application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub api_key: String,
    /// Numeric mod.io game id all mods belong to.
    pub game_id: u64,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default)]
    pub sync: SyncConfig,
}

fn default_api_base() -> String {
    "https://api.mod.io/v1".to_string()
}

impl Settings {
    /// Load settings from `<data_dir>/settings.json`, creating a default
    /// file when missing. The `MODIO_API_KEY` environment variable
    /// overrides the stored key.
    pub fn load_or_create(data_dir: &Path) -> SyncResult<Self> {
        std::fs::create_dir_all(data_dir).map_err(|source| SyncError::Io {
            path: data_dir.to_path_buf(),
            source,
        })?;

        let path = data_dir.join(SETTINGS_FILE);
        let mut settings = if path.exists() {
            let raw = std::fs::read_to_string(&path).map_err(|source| SyncError::Io {
                path: path.clone(),
                source,
            })?;
            serde_json::from_str(&raw)?
        } else {
            let settings = Settings {
                api_key: String::new(),
                game_id: 0,
                api_base: default_api_base(),
                sync: SyncConfig::default(),
            };
            settings.save(data_dir)?;
            info!("Wrote default settings to {:?}", path);
            settings
        };

        if let Ok(key) = std::env::var(API_KEY_ENV) {
            if !key.trim().is_empty() {
                settings.api_key = key.trim().to_string();
            }
        }

        Ok(settings)
    }

    pub fn save(&self, data_dir: &Path) -> SyncResult<()> {
        let path = data_dir.join(SETTINGS_FILE);
        let raw = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, raw).map_err(|source| SyncError::Io { path, source })?;
        Ok(())
    }

    /// mod.io API keys are long opaque tokens; anything shorter is a
    /// paste error, not a key.
    pub fn validate_api_key(&self) -> SyncResult<()> {
        if self.api_key.trim().len() < 32 {
            return Err(SyncError::InvalidApiKey);
        }
        Ok(())
    }
}
