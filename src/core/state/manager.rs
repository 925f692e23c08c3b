// ─── Server Manager ───
// Wires settings, provisioning and the registry together for the operator.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use tokio::sync::Mutex;
use tracing::info;

use crate::core::console::ConsoleLog;
use crate::core::downloader::{ArtifactFetcher, Downloader};
use crate::core::error::{ManagerError, ManagerResult};
use crate::core::http::build_http_client;
use crate::core::instance::{agreement, InstanceState, InstanceStore, InstanceSummary};
use crate::core::java::RuntimeProvisioner;
use crate::core::launch::{LaunchPreparer, ProvisioningPreparer, ServerInstance, VersionList};
use crate::core::locks::KeyedLocks;
use crate::core::version::{ServerVersion, VersionCatalog};

use super::registry::InstanceRegistry;
use super::settings::Settings;

pub struct ServerManager {
    settings: Settings,
    store: InstanceStore,
    versions: Arc<VersionList>,
    preparer: Arc<dyn LaunchPreparer>,
    registry: InstanceRegistry,
    /// Every instance touched in this process, running or not, so its log survives a stop.
    known: Mutex<HashMap<String, Arc<ServerInstance>>>,
    lifecycle_locks: KeyedLocks<String>,
}

impl std::fmt::Debug for ServerManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerManager")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl ServerManager {
    pub fn new(settings: Settings) -> ManagerResult<Self> {
        let downloader = Downloader::new(build_http_client()?);
        let versions = Arc::new(VersionList::new(Arc::new(VersionCatalog::new(
            downloader.clone(),
            settings.version_manifest_url.clone(),
        ))));
        let runtimes = Arc::new(RuntimeProvisioner::new(
            settings.runtimes_dir(),
            settings.runtime_api_base.clone(),
            downloader.clone(),
        ));
        let artifacts = Arc::new(ArtifactFetcher::new(downloader));
        let preparer = Arc::new(ProvisioningPreparer::new(
            versions.clone(),
            runtimes,
            artifacts,
        ));
        Ok(Self::assemble(settings, versions, preparer))
    }

    /// Same wiring with a caller-supplied launch preparer.
    pub fn with_preparer(settings: Settings, preparer: Arc<dyn LaunchPreparer>) -> ManagerResult<Self> {
        let downloader = Downloader::new(build_http_client()?);
        let versions = Arc::new(VersionList::new(Arc::new(VersionCatalog::new(
            downloader,
            settings.version_manifest_url.clone(),
        ))));
        Ok(Self::assemble(settings, versions, preparer))
    }

    fn assemble(
        settings: Settings,
        versions: Arc<VersionList>,
        preparer: Arc<dyn LaunchPreparer>,
    ) -> Self {
        Self {
            store: InstanceStore::new(settings.servers_dir()),
            settings,
            versions,
            preparer,
            registry: InstanceRegistry::new(),
            known: Mutex::new(HashMap::new()),
            lifecycle_locks: KeyedLocks::default(),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Every instance directory with its configured version and live state.
    pub async fn discover(&self) -> ManagerResult<Vec<InstanceSummary>> {
        let mut summaries = Vec::new();
        for name in self.store.list_names().await? {
            let dir = self.store.instance_dir(&name)?;
            let config = InstanceStore::load_config(&dir).await.unwrap_or_default();
            let state = match self.known.lock().await.get(&name) {
                Some(instance) => instance.state(),
                None => InstanceState::Stopped,
            };
            summaries.push(InstanceSummary {
                version: config.selected_version().map(str::to_string),
                description: config.description,
                agreement_accepted: agreement::is_accepted(&dir).await,
                name,
                dir,
                state,
            });
        }
        Ok(summaries)
    }

    /// Catalog versions, newest first; `include_unstable` adds snapshots.
    pub async fn versions(&self, include_unstable: bool) -> ManagerResult<Vec<ServerVersion>> {
        let versions = self.versions.get().await?;
        Ok(versions
            .iter()
            .filter(|v| include_unstable || v.stable)
            .cloned()
            .collect())
    }

    /// The instance object for `name`, created on first use.
    pub async fn instance(&self, name: &str) -> ManagerResult<Arc<ServerInstance>> {
        let dir = self.store.existing_dir(name).await?;
        let mut known = self.known.lock().await;
        if let Some(instance) = known.get(name) {
            return Ok(instance.clone());
        }

        let instance = Arc::new(ServerInstance::new(
            name,
            dir,
            self.preparer.clone(),
            self.settings.shutdown_policy(),
        ));
        spawn_output_follower(name.to_string(), instance.console().log());
        known.insert(name.to_string(), instance.clone());
        Ok(instance)
    }

    pub async fn start(&self, name: &str) -> ManagerResult<()> {
        let instance = self.instance(name).await?;
        let mut state = instance.subscribe_state();
        let _guard = tokio::select! {
            biased;
            guard = self.lifecycle_locks.lock(name.to_string()) => guard,
            _ = state.wait_for(|state| *state != InstanceState::Stopped) => {
                return Err(ManagerError::AlreadyRunning(name.to_string()));
            }
        };
        instance.start().await?;
        self.registry.put(instance).await
    }

    /// Stop and unregister. `NotRunning` when nothing is registered under `name`.
    pub async fn stop(&self, name: &str) -> ManagerResult<()> {
        let _guard = self.lifecycle_locks.lock(name.to_string()).await;
        match self.registry.remove(name).await? {
            Some(_) => Ok(()),
            None => Err(ManagerError::NotRunning(name.to_string())),
        }
    }

    pub async fn restart(&self, name: &str) -> ManagerResult<()> {
        let _guard = self.lifecycle_locks.lock(name.to_string()).await;
        let instance = self.instance(name).await?;
        instance.restart().await?;
        self.registry.put(instance).await
    }

    pub async fn send(&self, name: &str, text: &str) -> ManagerResult<()> {
        let instance = self
            .registry
            .get(name)
            .await
            .ok_or_else(|| ManagerError::NotRunning(name.to_string()))?;
        instance.send_command(text).await
    }

    /// Last `lines` lines of the instance's console.
    pub async fn console_tail(&self, name: &str, lines: usize) -> ManagerResult<Vec<String>> {
        let instance = self.instance(name).await?;
        let snapshot = instance.console().snapshot();
        let skip = snapshot.len().saturating_sub(lines);
        Ok(snapshot.into_iter().skip(skip).collect())
    }

    pub async fn clear_console(&self, name: &str) -> ManagerResult<()> {
        self.instance(name).await?.console().clear();
        Ok(())
    }

    pub async fn accept_agreement(&self, name: &str) -> ManagerResult<()> {
        let dir = self.store.existing_dir(name).await?;
        agreement::accept(&dir).await?;
        info!("Agreement accepted for {}", name);
        Ok(())
    }

    pub async fn running(&self) -> Vec<String> {
        self.registry.list_running().await
    }

    /// Stop everything that is registered.
    pub async fn shutdown(&self) {
        self.registry.stop_all().await;
    }
}

/// Mirror console lines to tracing under the `server_output` target.
///
/// Ends when the log is dropped.
fn spawn_output_follower(name: String, log: &Arc<ConsoleLog>) {
    let mut updates = log.subscribe();
    let log: Weak<ConsoleLog> = Arc::downgrade(log);
    tokio::spawn(async move {
        let mut offset = 0;
        while updates.changed().await.is_ok() {
            let Some(log) = log.upgrade() else {
                break;
            };
            let chunk = log.lines_since(offset);
            offset = chunk.next;
            for line in chunk.lines.iter().filter(|line| !line.is_empty()) {
                info!(target: "server_output", instance = %name, "{}", line);
            }
        }
    });
}
