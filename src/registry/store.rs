use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::model::{ModId, ModRecord};
use crate::error::{SyncError, SyncResult};

/// Per-profile registry of installed mods, persisted as pretty JSON.
///
/// Every mutating call durably writes before returning success. When the
/// write fails, the in-memory map is rolled back to the prior state so a
/// record is never half-stored.
#[derive(Debug, Clone)]
pub struct Registry {
    path: PathBuf,
    mods: BTreeMap<ModId, ModRecord>,
}

impl Registry {
    /// Load the registry at `path`, falling back to the `.bak` sibling
    /// when the primary file is corrupt. Missing file means an empty
    /// registry; nothing is written until the first mutation.
    pub fn load_or_create(path: &Path) -> SyncResult<Self> {
        if !path.exists() {
            return Ok(Self {
                path: path.to_path_buf(),
                mods: BTreeMap::new(),
            });
        }

        let raw = fs::read_to_string(path).map_err(|source| SyncError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let mods = match serde_json::from_str::<BTreeMap<ModId, ModRecord>>(&raw) {
            Ok(mods) => mods,
            Err(err) => {
                warn!("Corrupt registry at {:?}: {}; trying backup", path, err);
                let backup = backup_path(path);
                let raw = fs::read_to_string(&backup).map_err(|source| SyncError::Io {
                    path: backup.clone(),
                    source,
                })?;
                serde_json::from_str(&raw)?
            }
        };

        Ok(Self {
            path: path.to_path_buf(),
            mods,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, mod_id: ModId) -> Option<&ModRecord> {
        self.mods.get(&mod_id)
    }

    pub fn contains(&self, mod_id: ModId) -> bool {
        self.mods.contains_key(&mod_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ModRecord> {
        self.mods.values()
    }

    pub fn mod_ids(&self) -> Vec<ModId> {
        self.mods.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.mods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mods.is_empty()
    }

    /// Insert or replace a record. Atomic: on persist failure the prior
    /// record (or absence) is restored and the error returned.
    pub fn upsert(&mut self, record: ModRecord) -> SyncResult<()> {
        let mod_id = record.mod_id;
        let prior = self.mods.insert(mod_id, record);
        if let Err(err) = self.persist() {
            match prior {
                Some(prior) => {
                    self.mods.insert(mod_id, prior);
                }
                None => {
                    self.mods.remove(&mod_id);
                }
            }
            return Err(err);
        }
        Ok(())
    }

    /// Remove a record, returning it. Atomic like `upsert`.
    pub fn remove(&mut self, mod_id: ModId) -> SyncResult<ModRecord> {
        let record = self
            .mods
            .remove(&mod_id)
            .ok_or(SyncError::RecordNotFound(mod_id))?;
        if let Err(err) = self.persist() {
            self.mods.insert(mod_id, record);
            return Err(err);
        }
        Ok(record)
    }

    /// Flip only the enabled flag.
    pub fn set_enabled(&mut self, mod_id: ModId, enabled: bool) -> SyncResult<()> {
        let prior = {
            let record = self
                .mods
                .get_mut(&mod_id)
                .ok_or(SyncError::RecordNotFound(mod_id))?;
            let prior = record.enabled;
            record.enabled = enabled;
            prior
        };
        if let Err(err) = self.persist() {
            if let Some(record) = self.mods.get_mut(&mod_id) {
                record.enabled = prior;
            }
            return Err(err);
        }
        Ok(())
    }

    /// Mark a record so the next pass resumes deletion from its manifest.
    pub fn mark_removal_pending(&mut self, mod_id: ModId) -> SyncResult<()> {
        {
            let record = self
                .mods
                .get_mut(&mod_id)
                .ok_or(SyncError::RecordNotFound(mod_id))?;
            if record.pending_removal {
                return Ok(());
            }
            record.pending_removal = true;
        }
        if let Err(err) = self.persist() {
            if let Some(record) = self.mods.get_mut(&mod_id) {
                record.pending_removal = false;
            }
            return Err(err);
        }
        Ok(())
    }

    /// Write the registry durably: back up the current file, write a temp
    /// sibling, fsync, then rename over the primary.
    fn persist(&self) -> SyncResult<()> {
        let store_err = |reason: String| SyncError::Store {
            path: self.path.clone(),
            reason,
        };

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| store_err(e.to_string()))?;
        }

        if self.path.exists() {
            if let Err(err) = fs::copy(&self.path, backup_path(&self.path)) {
                warn!("Registry backup failed for {:?}: {}", self.path, err);
            }
        }

        let raw = serde_json::to_string_pretty(&self.mods)
            .map_err(|e| store_err(e.to_string()))?;

        let tmp = self.path.with_extension("json.tmp");
        {
            let mut file = File::create(&tmp).map_err(|e| store_err(e.to_string()))?;
            file.write_all(raw.as_bytes())
                .map_err(|e| store_err(e.to_string()))?;
            file.sync_all().map_err(|e| store_err(e.to_string()))?;
        }
        fs::rename(&tmp, &self.path).map_err(|e| store_err(e.to_string()))?;

        debug!("Persisted registry ({} mods) to {:?}", self.mods.len(), self.path);
        Ok(())
    }
}

fn backup_path(path: &Path) -> PathBuf {
    path.with_extension("json.bak")
}
