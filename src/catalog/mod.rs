pub mod modio;

use std::collections::BTreeSet;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{SyncError, SyncResult};
use crate::registry::{ModId, VersionId};

pub use modio::ModioCatalog;

/// Read-only view of one mod as the remote catalog currently sees it.
/// Fetched per reconciliation pass, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub mod_id: ModId,
    pub name: String,
    pub latest_version: VersionId,
    pub dependencies: BTreeSet<ModId>,
    pub download_url: String,
    pub file_name: String,
    pub file_size: Option<u64>,
    /// MD5 of the modfile as published by mod.io.
    pub md5: Option<String>,
}

/// Remote source of truth for latest versions and dependencies.
#[async_trait]
pub trait Catalog: Send + Sync {
    async fn latest(&self, mod_id: ModId) -> SyncResult<CatalogEntry>;
}

/// A mod.io web URL reduced to its game and mod slugs.
///
/// Accepted form: `https://mod.io/g/<game>/m/<mod>`, with or without the
/// scheme and with trailing path segments ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModRef {
    pub game_slug: String,
    pub mod_slug: String,
}

impl ModRef {
    pub fn parse(url: &str) -> SyncResult<Self> {
        let trimmed = url.trim();
        if trimmed.is_empty() {
            return Err(SyncError::InvalidModUrl(url.to_string()));
        }

        let rest = trimmed
            .strip_prefix("https://")
            .or_else(|| trimmed.strip_prefix("http://"))
            .unwrap_or(trimmed);
        let rest = rest.strip_prefix("www.").unwrap_or(rest);

        let mut segments = rest.split('/').filter(|s| !s.is_empty());
        if segments.next() != Some("mod.io") {
            return Err(SyncError::InvalidModUrl(url.to_string()));
        }
        if segments.next() != Some("g") {
            return Err(SyncError::InvalidModUrl(url.to_string()));
        }
        let game_slug = segments
            .next()
            .ok_or_else(|| SyncError::InvalidModUrl(url.to_string()))?;
        if segments.next() != Some("m") {
            return Err(SyncError::InvalidModUrl(url.to_string()));
        }
        let mod_slug = segments
            .next()
            .ok_or_else(|| SyncError::InvalidModUrl(url.to_string()))?;

        Ok(Self {
            game_slug: game_slug.to_string(),
            mod_slug: mod_slug.to_string(),
        })
    }
}

impl fmt::Display for ModRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "https://mod.io/g/{}/m/{}", self.game_slug, self.mod_slug)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_full_url() {
        let r = ModRef::parse("https://mod.io/g/drg/m/better-flashlight").unwrap();
        assert_eq!(r.game_slug, "drg");
        assert_eq!(r.mod_slug, "better-flashlight");
    }

    #[test]
    fn parse_without_scheme_and_with_trailing() {
        let r = ModRef::parse("www.mod.io/g/drg/m/better-flashlight/").unwrap();
        assert_eq!(r.mod_slug, "better-flashlight");
    }

    #[test]
    fn parse_rejects_wrong_host_and_shape() {
        assert!(ModRef::parse("https://example.com/g/drg/m/x").is_err());
        assert!(ModRef::parse("https://mod.io/g/drg").is_err());
        assert!(ModRef::parse("").is_err());
    }

    #[test]
    fn display_roundtrip() {
        let url = "https://mod.io/g/drg/m/better-flashlight";
        assert_eq!(ModRef::parse(url).unwrap().to_string(), url);
    }
}
