use std::collections::BTreeSet;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::registry::ModId;

/// Named pairing of a mod directory and its registry.
///
/// Layout under `root_dir`:
/// - mod files, at the paths their archives dictate
/// - `.disabledmods/` — manifest files of disabled mods, mirrored paths
/// - `.modsync/registry.json` — the profile's registry
/// - `.modsync/staging/` — per-action extraction scratch space
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    pub root_dir: PathBuf,
    pub created_at: DateTime<Utc>,
    /// Mods the user wants present, including ones not yet installed.
    #[serde(default)]
    pub tracked: BTreeSet<ModId>,
}

impl Profile {
    pub fn new(name: &str, root_dir: PathBuf) -> Self {
        Self {
            name: name.to_string(),
            root_dir,
            created_at: Utc::now(),
            tracked: BTreeSet::new(),
        }
    }

    pub fn meta_dir(&self) -> PathBuf {
        self.root_dir.join(".modsync")
    }

    pub fn registry_path(&self) -> PathBuf {
        self.meta_dir().join("registry.json")
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.meta_dir().join("staging")
    }

    pub fn disabled_dir(&self) -> PathBuf {
        self.root_dir.join(".disabledmods")
    }

    /// Where a record's manifest files live, depending on its flag.
    pub fn content_root(&self, enabled: bool) -> PathBuf {
        if enabled {
            self.root_dir.clone()
        } else {
            self.disabled_dir()
        }
    }
}
