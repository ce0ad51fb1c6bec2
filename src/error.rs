use std::path::PathBuf;
use thiserror::Error;

/// Central error type for the entire sync engine.
/// Every module returns `Result<T, SyncError>`.
#[derive(Debug, Error)]
pub enum SyncError {
    // ── IO ──────────────────────────────────────────────
    #[error("IO error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    // ── Network ─────────────────────────────────────────
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Download failed for {url}: HTTP {status}")]
    DownloadFailed { url: String, status: u16 },

    #[error("Action timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("Catalog unreachable: {0}")]
    CatalogUnreachable(String),

    // ── Integrity ───────────────────────────────────────
    #[error("MD5 mismatch for {name}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        name: String,
        expected: String,
        actual: String,
    },

    #[error("Zip extraction error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Archive entry escapes the extraction root: {0}")]
    UnsafeArchivePath(String),

    // ── Catalog ─────────────────────────────────────────
    #[error("Mod not found: {0}")]
    ModNotFound(u64),

    #[error("Mod {0} has no downloadable file")]
    ModFileNotFound(u64),

    #[error("Invalid mod.io URL: {0}")]
    InvalidModUrl(String),

    #[error("Invalid or expired API key")]
    InvalidApiKey,

    // ── Registry ────────────────────────────────────────
    #[error("No registry record for mod {0}")]
    RecordNotFound(u64),

    #[error("Registry store failure at {path:?}: {reason}")]
    Store { path: PathBuf, reason: String },

    // ── JSON ────────────────────────────────────────────
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // ── Profiles ────────────────────────────────────────
    #[error("Profile not found: {0}")]
    ProfileNotFound(String),

    #[error("Profile already exists: {0}")]
    ProfileExists(String),

    #[error("Unusable profile directory: {0:?}")]
    InvalidPath(PathBuf),

    #[error("Operation requires explicit confirmation: {0}")]
    ConfirmationRequired(String),

    // ── Pass control ────────────────────────────────────
    #[error("A reconciliation pass is already running for profile {0}")]
    Busy(String),

    #[error("Reconciliation pass cancelled")]
    Cancelled,

    #[error("Dependency {dependency} of mod {mod_id} did not complete")]
    DependencyFailed { mod_id: u64, dependency: u64 },

    // ── Generic ─────────────────────────────────────────
    #[error("{0}")]
    Other(String),
}

/// Convenience alias used throughout the crate.
pub type SyncResult<T> = Result<T, SyncError>;

impl From<std::io::Error> for SyncError {
    fn from(source: std::io::Error) -> Self {
        SyncError::Io {
            path: PathBuf::new(),
            source,
        }
    }
}

impl SyncError {
    /// Errors that abort a whole reconciliation pass instead of being
    /// recorded per mod. Continuing past a store failure would leave the
    /// registry describing files that are not on disk.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SyncError::Store { .. } | SyncError::CatalogUnreachable(_)
        )
    }

    /// Transient network-level failure; the caller may retry the pass.
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            SyncError::Http(_) | SyncError::DownloadFailed { .. } | SyncError::Timeout { .. }
        )
    }
}
