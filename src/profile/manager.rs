use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{info, warn};

use super::model::Profile;
use super::move_file;
use crate::error::{SyncError, SyncResult};
use crate::registry::{ModId, Registry};

const PROFILES_FILE: &str = "profiles.json";

/// Shared per-profile session state: the registry behind a brief mutex,
/// and the guard that keeps reconciliation passes from overlapping.
pub struct ProfileHandle {
    pub registry: Mutex<Registry>,
    pass_guard: Mutex<()>,
}

impl ProfileHandle {
    pub(crate) fn open(profile: &Profile) -> SyncResult<Self> {
        let registry = Registry::load_or_create(&profile.registry_path())?;
        Ok(Self {
            registry: Mutex::new(registry),
            pass_guard: Mutex::new(()),
        })
    }

    /// Claim the profile for one reconciliation pass. A second caller
    /// gets `Busy` instead of interleaving with the first.
    pub fn try_begin_pass(&self, profile_name: &str) -> SyncResult<MutexGuard<'_, ()>> {
        self.pass_guard
            .try_lock()
            .map_err(|_| SyncError::Busy(profile_name.to_string()))
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ProfilesFile {
    active: Option<String>,
    profiles: Vec<Profile>,
}

struct ProfileEntry {
    profile: Profile,
    handle: Arc<ProfileHandle>,
}

/// Owns all profiles and routes operations to the active one. Exactly one
/// profile is active at a time within a session.
pub struct ProfileManager {
    data_dir: PathBuf,
    profiles: BTreeMap<String, ProfileEntry>,
    active: Option<String>,
}

impl ProfileManager {
    /// Load the profiles manifest from `<data_dir>/profiles.json`. A
    /// profile whose registry cannot be opened is skipped with a warning
    /// rather than taking the whole manager down.
    pub fn load_or_create(data_dir: &Path) -> SyncResult<Self> {
        std::fs::create_dir_all(data_dir).map_err(|source| SyncError::Io {
            path: data_dir.to_path_buf(),
            source,
        })?;

        let path = data_dir.join(PROFILES_FILE);
        let mut manager = Self {
            data_dir: data_dir.to_path_buf(),
            profiles: BTreeMap::new(),
            active: None,
        };

        if !path.exists() {
            return Ok(manager);
        }

        let raw = std::fs::read_to_string(&path).map_err(|source| SyncError::Io {
            path: path.clone(),
            source,
        })?;
        let file: ProfilesFile = serde_json::from_str(&raw)?;

        for profile in file.profiles {
            match ProfileHandle::open(&profile) {
                Ok(handle) => {
                    manager.profiles.insert(
                        profile.name.clone(),
                        ProfileEntry {
                            profile,
                            handle: Arc::new(handle),
                        },
                    );
                }
                Err(err) => {
                    warn!("Skipping profile '{}': {}", profile.name, err);
                }
            }
        }

        manager.active = file
            .active
            .filter(|name| manager.profiles.contains_key(name));

        Ok(manager)
    }

    fn save(&self) -> SyncResult<()> {
        let file = ProfilesFile {
            active: self.active.clone(),
            profiles: self.profiles.values().map(|e| e.profile.clone()).collect(),
        };
        let raw = serde_json::to_string_pretty(&file)?;
        let path = self.data_dir.join(PROFILES_FILE);
        std::fs::write(&path, raw).map_err(|source| SyncError::Io { path, source })?;
        Ok(())
    }

    /// Create a profile over `root_dir`. The first profile created
    /// becomes active.
    pub fn create(&mut self, name: &str, root_dir: &Path) -> SyncResult<Profile> {
        let name = name.trim();
        if name.is_empty() {
            return Err(SyncError::Other("profile name cannot be empty".into()));
        }
        if self.profiles.contains_key(name) {
            return Err(SyncError::ProfileExists(name.to_string()));
        }
        if root_dir.exists() && !root_dir.is_dir() {
            return Err(SyncError::InvalidPath(root_dir.to_path_buf()));
        }

        let profile = Profile::new(name, root_dir.to_path_buf());
        for dir in [&profile.root_dir, &profile.meta_dir(), &profile.staging_dir()] {
            std::fs::create_dir_all(dir)
                .map_err(|_| SyncError::InvalidPath(root_dir.to_path_buf()))?;
        }

        let handle = Arc::new(ProfileHandle::open(&profile)?);
        self.profiles.insert(
            name.to_string(),
            ProfileEntry {
                profile: profile.clone(),
                handle,
            },
        );
        if self.active.is_none() {
            self.active = Some(name.to_string());
        }
        self.save()?;

        info!("Created profile '{}' at {:?}", name, profile.root_dir);
        Ok(profile)
    }

    pub fn activate(&mut self, name: &str) -> SyncResult<()> {
        if !self.profiles.contains_key(name) {
            return Err(SyncError::ProfileNotFound(name.to_string()));
        }
        self.active = Some(name.to_string());
        self.save()
    }

    pub fn active_name(&self) -> Option<&str> {
        self.active.as_deref()
    }

    /// The active profile and its session handle. All reconciler calls
    /// route through this.
    pub fn active(&self) -> SyncResult<(Profile, Arc<ProfileHandle>)> {
        let name = self
            .active
            .as_deref()
            .ok_or_else(|| SyncError::ProfileNotFound("<no active profile>".to_string()))?;
        self.get(name)
    }

    pub fn get(&self, name: &str) -> SyncResult<(Profile, Arc<ProfileHandle>)> {
        let entry = self
            .profiles
            .get(name)
            .ok_or_else(|| SyncError::ProfileNotFound(name.to_string()))?;
        Ok((entry.profile.clone(), Arc::clone(&entry.handle)))
    }

    pub fn list(&self) -> Vec<&Profile> {
        self.profiles.values().map(|e| &e.profile).collect()
    }

    /// Detach a profile. Never deletes mod files; cleaning the directory
    /// is an explicit reconciliation pass with an empty tracked set.
    pub fn delete(&mut self, name: &str, confirm: bool) -> SyncResult<()> {
        if !confirm {
            return Err(SyncError::ConfirmationRequired(format!(
                "delete profile '{name}'"
            )));
        }
        if self.profiles.remove(name).is_none() {
            return Err(SyncError::ProfileNotFound(name.to_string()));
        }
        if self.active.as_deref() == Some(name) {
            self.active = None;
        }
        self.save()?;
        info!("Detached profile '{}' (files left on disk)", name);
        Ok(())
    }

    pub fn rename(&mut self, old: &str, new: &str) -> SyncResult<()> {
        let new = new.trim();
        if new.is_empty() {
            return Err(SyncError::Other("profile name cannot be empty".into()));
        }
        if self.profiles.contains_key(new) {
            return Err(SyncError::ProfileExists(new.to_string()));
        }
        let mut entry = self
            .profiles
            .remove(old)
            .ok_or_else(|| SyncError::ProfileNotFound(old.to_string()))?;
        entry.profile.name = new.to_string();
        self.profiles.insert(new.to_string(), entry);
        if self.active.as_deref() == Some(old) {
            self.active = Some(new.to_string());
        }
        self.save()
    }

    /// Add a mod to a profile's tracked set. Returns false when it was
    /// already tracked.
    pub fn track(&mut self, name: &str, mod_id: ModId) -> SyncResult<bool> {
        let entry = self
            .profiles
            .get_mut(name)
            .ok_or_else(|| SyncError::ProfileNotFound(name.to_string()))?;
        let inserted = entry.profile.tracked.insert(mod_id);
        if inserted {
            self.save()?;
        }
        Ok(inserted)
    }

    pub fn untrack(&mut self, name: &str, mod_id: ModId) -> SyncResult<bool> {
        let entry = self
            .profiles
            .get_mut(name)
            .ok_or_else(|| SyncError::ProfileNotFound(name.to_string()))?;
        let removed = entry.profile.tracked.remove(&mod_id);
        if removed {
            self.save()?;
        }
        Ok(removed)
    }

    /// Enable or disable an installed mod: move its manifest files
    /// between the live root and `.disabledmods/`, then flip the flag.
    /// Files already moved are put back if a later move fails.
    pub async fn set_mod_enabled(
        &self,
        name: &str,
        mod_id: ModId,
        enabled: bool,
    ) -> SyncResult<()> {
        let (profile, handle) = self.get(name)?;
        let mut registry = handle.registry.lock().await;

        let record = registry
            .get(mod_id)
            .ok_or(SyncError::RecordNotFound(mod_id))?;
        if record.enabled == enabled {
            return Ok(());
        }

        let from_root = profile.content_root(record.enabled);
        let to_root = profile.content_root(enabled);
        let manifest = record.file_manifest.clone();

        let mut moved: Vec<&String> = Vec::new();
        for path in &manifest {
            let src = from_root.join(path);
            if !src.exists() {
                continue;
            }
            if let Err(err) = move_file(&src, &to_root.join(path)) {
                for done in moved {
                    let _ = move_file(&to_root.join(done), &from_root.join(done));
                }
                return Err(err);
            }
            moved.push(path);
        }

        registry.set_enabled(mod_id, enabled)?;
        info!(
            "Mod {} in profile '{}' is now {}",
            mod_id,
            name,
            if enabled { "enabled" } else { "disabled" }
        );
        Ok(())
    }
}
