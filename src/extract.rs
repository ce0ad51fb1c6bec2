use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use crate::error::{SyncError, SyncResult};

/// Unpacks a payload into a staging directory and reports the manifest of
/// files written, relative to the staging root, in archive order.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, bytes: Vec<u8>, staging_dir: &Path) -> SyncResult<Vec<String>>;
}

/// Zip-based extractor. The zip crate is synchronous, so the work runs on
/// the blocking pool.
pub struct ZipExtractor;

#[async_trait]
impl Extractor for ZipExtractor {
    async fn extract(&self, bytes: Vec<u8>, staging_dir: &Path) -> SyncResult<Vec<String>> {
        let staging = staging_dir.to_path_buf();
        tokio::task::spawn_blocking(move || extract_zip(&bytes, &staging))
            .await
            .map_err(|e| SyncError::Other(format!("extraction task panicked: {e}")))?
    }
}

fn extract_zip(bytes: &[u8], staging: &Path) -> SyncResult<Vec<String>> {
    std::fs::create_dir_all(staging).map_err(|source| SyncError::Io {
        path: staging.to_path_buf(),
        source,
    })?;

    let cursor = Cursor::new(bytes);
    let mut archive = zip::ZipArchive::new(cursor)?;

    let mut manifest = Vec::new();
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        if entry.is_dir() {
            continue;
        }
        // Stale disabled-mod copies sometimes end up inside re-zipped
        // archives; never install those.
        if entry.name().contains(".disabledmods") {
            continue;
        }

        let relative: PathBuf = entry
            .enclosed_name()
            .ok_or_else(|| SyncError::UnsafeArchivePath(entry.name().to_string()))?;

        let target = staging.join(&relative);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(|source| SyncError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let mut out = std::fs::File::create(&target).map_err(|source| SyncError::Io {
            path: target.clone(),
            source,
        })?;
        copy_entry(&mut entry, &mut out, &target)?;

        manifest.push(path_to_manifest(&relative));
    }

    debug!("Extracted {} file(s) into {:?}", manifest.len(), staging);
    Ok(manifest)
}

fn copy_entry<R: Read>(entry: &mut R, out: &mut std::fs::File, target: &Path) -> SyncResult<()> {
    std::io::copy(entry, out).map_err(|source| SyncError::Io {
        path: target.to_path_buf(),
        source,
    })?;
    Ok(())
}

/// Manifest paths always use forward slashes, matching zip entry names.
fn path_to_manifest(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
