use std::fmt;

use log::{debug, info, warn};

use crate::engine::models::Manifest;
use crate::networking::ArtifactSource;
use crate::storage::StorageManager;

pub mod generate;

/// Baseline manifest compiled into the launcher; the fallback of last resort.
pub const EMBEDDED_MANIFEST: &str = include_str!("../../app.json");

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ManifestOrigin {
    Embedded,
    Cached,
    Remote,
}

impl fmt::Display for ManifestOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ManifestOrigin::Embedded => "embedded",
            ManifestOrigin::Cached => "cached",
            ManifestOrigin::Remote => "remote",
        };
        f.write_str(label)
    }
}

#[derive(Clone, Debug)]
pub struct ResolvedManifest {
    pub manifest: Manifest,
    pub origin: ManifestOrigin,
}

/// Picks the manifest for this cycle: embedded baseline, overridden by the
/// local cache, overridden by a remote copy that differs from it.
pub struct ManifestResolver<'a> {
    embedded: &'a str,
    storage: &'a StorageManager,
    source: &'a dyn ArtifactSource,
}

impl<'a> ManifestResolver<'a> {
    pub fn new(
        embedded: &'a str,
        storage: &'a StorageManager,
        source: &'a dyn ArtifactSource,
    ) -> Self {
        Self {
            embedded,
            storage,
            source,
        }
    }

    /// Only a broken baseline is an error; cache and remote problems fall
    /// back to the best manifest loaded so far. Writes the cache when the
    /// remote copy is adopted.
    pub async fn resolve(&self) -> Result<ResolvedManifest, String> {
        let mut selected = ResolvedManifest {
            manifest: Manifest::from_json(self.embedded)
                .map_err(|e| format!("embedded manifest is invalid: {e}"))?,
            origin: ManifestOrigin::Embedded,
        };

        match self.storage.read_cached_manifest().await {
            Ok(Some(cached)) => {
                debug!("resolve: using cached manifest {}", cached.version);
                selected = ResolvedManifest {
                    manifest: cached,
                    origin: ManifestOrigin::Cached,
                };
            }
            Ok(None) => debug!("resolve: no cached manifest"),
            Err(err) => warn!("resolve: ignoring unreadable cache ({err})"),
        }

        let remote = match self.fetch_remote(&selected.manifest).await {
            Ok(remote) => remote,
            Err(err) => {
                warn!("resolve: unable to update manifest: {err}");
                return Ok(selected);
            }
        };

        if remote == selected.manifest {
            info!(
                "resolve: remote manifest unchanged ({} {})",
                selected.origin, selected.manifest.version
            );
            return Ok(selected);
        }

        info!(
            "resolve: adopting remote manifest {} (was {} {})",
            remote.version, selected.origin, selected.manifest.version
        );
        if let Err(err) = self.storage.write_cached_manifest(&remote).await {
            warn!("resolve: failed to cache remote manifest: {err}");
        }
        Ok(ResolvedManifest {
            manifest: remote,
            origin: ManifestOrigin::Remote,
        })
    }

    async fn fetch_remote(&self, current: &Manifest) -> Result<Manifest, String> {
        let url = current.remote_manifest_url()?;
        debug!("resolve: fetching {url}");
        let raw = self.source.fetch_text(&url).await?;
        Manifest::from_json(&raw)
    }
}
