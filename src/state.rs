use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::catalog::ModioCatalog;
use crate::config::Settings;
use crate::error::SyncResult;
use crate::extract::ZipExtractor;
use crate::fetch::HttpFetcher;
use crate::http::build_http_client;
use crate::profile::ProfileManager;
use crate::reconcile::{CancelFlag, ReconcileReport, Reconciler};

const APP_DIR_NAME: &str = "modsync";
const BOOTSTRAP_FILE: &str = "modsync_bootstrap.json";

/// Lets users relocate the data dir without touching settings inside it.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct BootstrapConfig {
    data_dir: PathBuf,
}

/// Fully wired engine session: settings, profiles, and the reconciler
/// with its production collaborators.
pub struct AppState {
    pub data_dir: PathBuf,
    pub settings: Settings,
    pub profiles: ProfileManager,
    pub reconciler: Reconciler,
}

impl AppState {
    pub fn init() -> SyncResult<Self> {
        let data_dir = default_data_dir();
        Self::init_at(data_dir)
    }

    pub fn init_at(data_dir: PathBuf) -> SyncResult<Self> {
        let settings = Settings::load_or_create(&data_dir)?;
        let profiles = ProfileManager::load_or_create(&data_dir)?;

        let http_client = build_http_client()?;
        let catalog = Arc::new(ModioCatalog::new(
            http_client.clone(),
            settings.api_base.clone(),
            settings.game_id,
            settings.api_key.clone(),
        ));
        let fetcher = Arc::new(HttpFetcher::new(
            http_client,
            settings.api_base.clone(),
            settings.game_id,
            settings.api_key.clone(),
        ));
        let reconciler = Reconciler::new(
            catalog,
            fetcher,
            Arc::new(ZipExtractor),
            settings.sync.clone(),
        );

        info!("modsync initialized with data dir {:?}", data_dir);
        Ok(Self {
            data_dir,
            settings,
            profiles,
            reconciler,
        })
    }

    /// Run one reconciliation pass against the active profile.
    pub async fn reconcile_active(&self, cancel: &CancelFlag) -> SyncResult<ReconcileReport> {
        let (profile, handle) = self.profiles.active()?;
        self.reconciler.reconcile(&profile, &handle, cancel).await
    }
}

fn default_base_dir() -> PathBuf {
    dirs::data_dir().unwrap_or_else(|| PathBuf::from("."))
}

fn default_data_dir() -> PathBuf {
    let base = default_base_dir();
    let bootstrap_path = base.join(BOOTSTRAP_FILE);

    if let Ok(raw) = std::fs::read_to_string(&bootstrap_path) {
        if let Ok(cfg) = serde_json::from_str::<BootstrapConfig>(&raw) {
            if !cfg.data_dir.exists() {
                let _ = std::fs::create_dir_all(&cfg.data_dir);
            }
            return cfg.data_dir;
        }
    }

    let dir = base.join(APP_DIR_NAME);
    if !dir.exists() {
        let _ = std::fs::create_dir_all(&dir);
    }
    dir
}
