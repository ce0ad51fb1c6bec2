// ─── mod.io catalog client ───
// Wraps the mod.io v1 REST API: mod object + dependency list per mod.

use std::collections::BTreeSet;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, info};

use super::{Catalog, CatalogEntry, ModRef};
use crate::error::{SyncError, SyncResult};
use crate::registry::ModId;

/// Catalog backed by the mod.io v1 API for a single game.
pub struct ModioCatalog {
    client: Client,
    api_base: String,
    game_id: u64,
    api_key: String,
}

/// mod.io mod object, reduced to the fields the engine needs.
#[derive(Debug, Deserialize)]
struct ModObject {
    id: u64,
    name: String,
    #[serde(default)]
    modfile: Option<Modfile>,
}

#[derive(Debug, Deserialize)]
struct Modfile {
    id: u64,
    filename: String,
    #[serde(default)]
    filesize: Option<u64>,
    download: Download,
    #[serde(default)]
    filehash: Option<Filehash>,
}

#[derive(Debug, Deserialize)]
struct Download {
    binary_url: String,
}

#[derive(Debug, Deserialize)]
struct Filehash {
    md5: String,
}

#[derive(Debug, Deserialize)]
struct DependencyList {
    data: Vec<Dependency>,
}

#[derive(Debug, Deserialize)]
struct Dependency {
    mod_id: u64,
}

impl ModioCatalog {
    pub fn new(client: Client, api_base: String, game_id: u64, api_key: String) -> Self {
        Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            game_id,
            api_key,
        }
    }

    /// Resolve a mod.io page URL to the numeric mod id via slug lookup.
    pub async fn resolve(&self, mod_ref: &ModRef) -> SyncResult<ModId> {
        let url = format!(
            "{}/games/@{}/mods/@{}",
            self.api_base, mod_ref.game_slug, mod_ref.mod_slug
        );
        let object: ModObject = self.get_json(&url, 0).await.map_err(|err| match err {
            SyncError::ModNotFound(_) => SyncError::InvalidModUrl(mod_ref.to_string()),
            err => err,
        })?;
        info!("Resolved {} to mod id {}", mod_ref, object.id);
        Ok(object.id)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        mod_id: ModId,
    ) -> SyncResult<T> {
        let response = self
            .client
            .get(url)
            .query(&[("api_key", self.api_key.as_str())])
            .send()
            .await?;

        let status = response.status();
        match status {
            StatusCode::NOT_FOUND => return Err(SyncError::ModNotFound(mod_id)),
            StatusCode::UNAUTHORIZED => return Err(SyncError::InvalidApiKey),
            status if !status.is_success() => {
                return Err(SyncError::DownloadFailed {
                    url: url.to_string(),
                    status: status.as_u16(),
                })
            }
            _ => {}
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl Catalog for ModioCatalog {
    async fn latest(&self, mod_id: ModId) -> SyncResult<CatalogEntry> {
        let mod_url = format!("{}/games/{}/mods/{}", self.api_base, self.game_id, mod_id);
        let object: ModObject = self.get_json(&mod_url, mod_id).await?;

        let modfile = object
            .modfile
            .ok_or(SyncError::ModFileNotFound(mod_id))?;

        let deps_url = format!("{mod_url}/dependencies");
        let deps: DependencyList = self.get_json(&deps_url, mod_id).await?;
        let dependencies: BTreeSet<ModId> = deps.data.into_iter().map(|d| d.mod_id).collect();

        debug!(
            "Catalog: mod {} ({:?}) latest modfile {} with {} dependencies",
            mod_id,
            object.name,
            modfile.id,
            dependencies.len()
        );

        Ok(CatalogEntry {
            mod_id: object.id,
            name: object.name,
            latest_version: modfile.id,
            dependencies,
            download_url: modfile.download.binary_url,
            file_name: modfile.filename,
            file_size: modfile.filesize,
            md5: modfile.filehash.map(|h| h.md5),
        })
    }
}
