use std::time::Duration;

use async_trait::async_trait;
use md5::{Digest, Md5};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::debug;

use crate::error::{SyncError, SyncResult};
use crate::registry::{ModId, VersionId};

/// A fetched mod payload plus its integrity metadata.
#[derive(Debug, Clone)]
pub struct ModArchive {
    pub bytes: Vec<u8>,
    pub file_name: String,
    /// MD5 of `bytes`, hex encoded.
    pub md5: String,
}

/// Retrieves a mod's binary payload for a given version id.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(
        &self,
        mod_id: ModId,
        version_id: VersionId,
        timeout: Duration,
    ) -> SyncResult<ModArchive>;
}

/// Modfile lookup response, reduced to what the download needs.
#[derive(Debug, Deserialize)]
struct ModfileObject {
    filename: String,
    download: DownloadRef,
    #[serde(default)]
    filehash: Option<FilehashRef>,
}

#[derive(Debug, Deserialize)]
struct DownloadRef {
    binary_url: String,
}

#[derive(Debug, Deserialize)]
struct FilehashRef {
    md5: String,
}

/// Fetcher backed by the mod.io Files endpoint: resolve the modfile by
/// version id, download the binary, validate the published MD5 before
/// handing the bytes on.
pub struct HttpFetcher {
    client: Client,
    api_base: String,
    game_id: u64,
    api_key: String,
}

impl HttpFetcher {
    pub fn new(client: Client, api_base: String, game_id: u64, api_key: String) -> Self {
        Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            game_id,
            api_key,
        }
    }

    async fn fetch_inner(&self, mod_id: ModId, version_id: VersionId) -> SyncResult<ModArchive> {
        let file_url = format!(
            "{}/games/{}/mods/{}/files/{}",
            self.api_base, self.game_id, mod_id, version_id
        );
        let response = self
            .client
            .get(&file_url)
            .query(&[("api_key", self.api_key.as_str())])
            .send()
            .await?;

        let status = response.status();
        match status {
            StatusCode::NOT_FOUND => return Err(SyncError::ModNotFound(mod_id)),
            StatusCode::UNAUTHORIZED => return Err(SyncError::InvalidApiKey),
            status if !status.is_success() => {
                return Err(SyncError::DownloadFailed {
                    url: file_url,
                    status: status.as_u16(),
                })
            }
            _ => {}
        }
        let modfile: ModfileObject = response.json().await?;

        let response = self.client.get(&modfile.download.binary_url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::DownloadFailed {
                url: modfile.download.binary_url,
                status: status.as_u16(),
            });
        }
        let bytes = response.bytes().await?.to_vec();

        // Validate before anything downstream touches the payload.
        let mut hasher = Md5::new();
        hasher.update(&bytes);
        let actual = hex::encode(hasher.finalize());
        if let Some(expected) = modfile.filehash.map(|h| h.md5) {
            if !expected.eq_ignore_ascii_case(&actual) {
                return Err(SyncError::ChecksumMismatch {
                    name: modfile.filename,
                    expected,
                    actual,
                });
            }
        }

        debug!(
            "Fetched {} ({} bytes) for mod {} version {}",
            modfile.filename,
            bytes.len(),
            mod_id,
            version_id
        );

        Ok(ModArchive {
            bytes,
            file_name: modfile.filename,
            md5: actual,
        })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(
        &self,
        mod_id: ModId,
        version_id: VersionId,
        timeout: Duration,
    ) -> SyncResult<ModArchive> {
        match tokio::time::timeout(timeout, self.fetch_inner(mod_id, version_id)).await {
            Ok(result) => result,
            Err(_) => Err(SyncError::Timeout {
                seconds: timeout.as_secs(),
            }),
        }
    }
}
