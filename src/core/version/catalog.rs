// ─── Version Catalog ───
// Lists available server versions and resolves one to its artifact.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::OnceCell;
use tracing::{debug, info, instrument};

use crate::core::downloader::Downloader;
use crate::core::error::{ManagerError, ManagerResult};

use super::manifest::{ServerVersion, VersionManifest};
use super::version_file::{ResolvedArtifact, VersionJson};

#[derive(Debug)]
pub struct VersionCatalog {
    downloader: Downloader,
    manifest_url: String,
    /// One cell per version id; concurrent first calls share a single fetch.
    resolved: Mutex<HashMap<String, Arc<OnceCell<ResolvedArtifact>>>>,
}

impl VersionCatalog {
    pub fn new(downloader: Downloader, manifest_url: impl Into<String>) -> Self {
        Self {
            downloader,
            manifest_url: manifest_url.into(),
            resolved: Mutex::new(HashMap::new()),
        }
    }

    /// Fetch the manifest and return every version, newest first.
    ///
    /// Not cached here; callers that list often keep their own copy.
    #[instrument(skip(self))]
    pub async fn list_versions(&self) -> ManagerResult<Vec<ServerVersion>> {
        info!("Fetching server version manifest...");
        let body = self
            .downloader
            .get_bytes(&self.manifest_url)
            .await
            .map_err(ManagerError::catalog_unavailable)?;
        let manifest = VersionManifest::parse(&body)?;

        let versions = manifest.into_sorted_versions();
        info!("Loaded {} versions from manifest", versions.len());
        Ok(versions)
    }

    /// Resolve a version to its download URL and required runtime major.
    ///
    /// The result is memoized per version id for the life of the catalog.
    pub async fn resolve(&self, version: &ServerVersion) -> ManagerResult<ResolvedArtifact> {
        let cell = {
            let mut map = self.resolved.lock().unwrap_or_else(PoisonError::into_inner);
            map.entry(version.id.clone()).or_default().clone()
        };

        let resolved = cell
            .get_or_try_init(|| self.fetch_resolved(version))
            .await?;
        Ok(resolved.clone())
    }

    async fn fetch_resolved(&self, version: &ServerVersion) -> ManagerResult<ResolvedArtifact> {
        debug!("Resolving version {} via {}", version.id, version.manifest_url);
        let body = self
            .downloader
            .get_bytes(&version.manifest_url)
            .await
            .map_err(ManagerError::catalog_unavailable)?;
        VersionJson::parse(&version.id, &body)?.into_resolved(&version.id)
    }
}

/// Find a version by exact id.
pub fn find_version<'a>(versions: &'a [ServerVersion], id: &str) -> Option<&'a ServerVersion> {
    versions.iter().find(|v| v.id == id)
}
