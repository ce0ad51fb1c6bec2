pub mod manager;
pub mod model;

use std::path::Path;

use crate::error::{SyncError, SyncResult};

pub use manager::{ProfileHandle, ProfileManager};
pub use model::Profile;

/// Move a file, falling back to copy+delete when rename fails (e.g.
/// across filesystems). Creates the destination's parent directories.
pub(crate) fn move_file(src: &Path, dst: &Path) -> SyncResult<()> {
    if let Some(parent) = dst.parent() {
        std::fs::create_dir_all(parent).map_err(|source| SyncError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    if std::fs::rename(src, dst).is_ok() {
        return Ok(());
    }

    std::fs::copy(src, dst).map_err(|source| SyncError::Io {
        path: dst.to_path_buf(),
        source,
    })?;
    std::fs::remove_file(src).map_err(|source| SyncError::Io {
        path: src.to_path_buf(),
        source,
    })?;
    Ok(())
}

/// Delete a file, treating "already gone" as success.
pub(crate) fn remove_file_if_exists(path: &Path) -> SyncResult<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(source) => Err(SyncError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}
