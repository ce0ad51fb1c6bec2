use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Numeric mod.io mod id.
pub type ModId = u64;
/// Numeric mod.io modfile id.
pub type VersionId = u64;

/// Authoritative record of one installed mod.
///
/// `file_manifest` always reflects exactly the files written by the last
/// successful extraction: paths relative to the profile root, in the
/// order the archive listed them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModRecord {
    pub mod_id: ModId,
    pub name: String,
    pub installed_version: VersionId,
    pub enabled: bool,
    pub file_manifest: Vec<String>,
    /// MD5 of the installed archive as published by the catalog.
    pub checksum: Option<String>,
    /// Set when file deletion partially failed during a remove; the next
    /// pass resumes deletion from the manifest instead of re-fetching.
    #[serde(default)]
    pub pending_removal: bool,
    pub installed_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub source_url: Option<String>,
}

impl ModRecord {
    pub fn new(
        mod_id: ModId,
        name: String,
        installed_version: VersionId,
        file_manifest: Vec<String>,
        checksum: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            mod_id,
            name,
            installed_version,
            enabled: true,
            file_manifest,
            checksum,
            pending_removal: false,
            installed_at: now,
            updated_at: now,
            source_url: None,
        }
    }
}
