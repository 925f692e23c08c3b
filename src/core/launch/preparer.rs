use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::{info, instrument};

use crate::core::downloader::ArtifactFetcher;
use crate::core::error::{ManagerError, ManagerResult};
use crate::core::instance::InstanceConfig;
use crate::core::java::RuntimeProvisioner;
use crate::core::version::{find_version, ServerVersion, VersionCatalog};

use super::task::LaunchCommand;

/// What a start request knows about the instance being launched.
pub struct LaunchContext<'a> {
    pub name: &'a str,
    pub instance_dir: &'a Path,
    pub config: &'a InstanceConfig,
}

/// Turns an instance into a ready-to-spawn command, provisioning whatever it needs.
#[async_trait]
pub trait LaunchPreparer: Send + Sync {
    async fn prepare(&self, ctx: &LaunchContext<'_>) -> ManagerResult<LaunchCommand>;
}

/// Version list fetched once per process; a failed fetch is retried next time.
#[derive(Debug)]
pub struct VersionList {
    catalog: Arc<VersionCatalog>,
    cached: OnceCell<Vec<ServerVersion>>,
}

impl VersionList {
    pub fn new(catalog: Arc<VersionCatalog>) -> Self {
        Self {
            catalog,
            cached: OnceCell::new(),
        }
    }

    pub fn catalog(&self) -> &Arc<VersionCatalog> {
        &self.catalog
    }

    pub async fn get(&self) -> ManagerResult<&[ServerVersion]> {
        let versions = self
            .cached
            .get_or_try_init(|| self.catalog.list_versions())
            .await?;
        Ok(versions.as_slice())
    }
}

/// Resolves the configured version, then provisions its runtime and artifact.
#[derive(Debug)]
pub struct ProvisioningPreparer {
    versions: Arc<VersionList>,
    runtimes: Arc<RuntimeProvisioner>,
    artifacts: Arc<ArtifactFetcher>,
}

impl ProvisioningPreparer {
    pub fn new(
        versions: Arc<VersionList>,
        runtimes: Arc<RuntimeProvisioner>,
        artifacts: Arc<ArtifactFetcher>,
    ) -> Self {
        Self {
            versions,
            runtimes,
            artifacts,
        }
    }
}

#[async_trait]
impl LaunchPreparer for ProvisioningPreparer {
    #[instrument(skip(self, ctx), fields(instance = ctx.name))]
    async fn prepare(&self, ctx: &LaunchContext<'_>) -> ManagerResult<LaunchCommand> {
        let version_id = ctx.config.selected_version().ok_or_else(|| {
            ManagerError::Configuration(format!("no version selected for {}", ctx.name))
        })?;

        let versions = self.versions.get().await?;
        let version = find_version(versions, version_id).ok_or_else(|| {
            ManagerError::Configuration(format!("unknown server version {version_id}"))
        })?;

        let resolved = self.versions.catalog().resolve(version).await?;
        info!(
            "Version {} needs runtime {}",
            resolved.version, resolved.java_major
        );

        // Neither download may be cancelled halfway through.
        let (java, artifact) = tokio::join!(
            self.runtimes.ensure_runtime(resolved.java_major),
            self.artifacts.ensure_artifact(
                ctx.instance_dir,
                &resolved.url,
                resolved.sha1.as_deref(),
                false
            ),
        );
        let java = java?;
        artifact?;

        Ok(LaunchCommand::server(java, ctx.instance_dir, ctx.config))
    }
}
