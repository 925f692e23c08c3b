// ─── Instance Registry ───
// Name → live instance for everything currently started in this process.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::join_all;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::core::error::{ManagerError, ManagerResult};
use crate::core::instance::InstanceState;
use crate::core::launch::ServerInstance;

#[derive(Debug, Default)]
pub struct InstanceRegistry {
    instances: Mutex<HashMap<String, Arc<ServerInstance>>>,
}

impl InstanceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a started instance. A different live instance under the same name is rejected.
    pub async fn put(&self, instance: Arc<ServerInstance>) -> ManagerResult<()> {
        let mut instances = self.instances.lock().await;
        if let Some(existing) = instances.get(instance.name())
            && !Arc::ptr_eq(existing, &instance)
            && existing.state() != InstanceState::Stopped
        {
            return Err(ManagerError::AlreadyRunning(instance.name().to_string()));
        }
        instances.insert(instance.name().to_string(), instance);
        Ok(())
    }

    pub async fn get(&self, name: &str) -> Option<Arc<ServerInstance>> {
        self.instances.lock().await.get(name).cloned()
    }

    /// Stop the instance, then unregister it.
    ///
    /// The map is not held while stopping; an instance started again in the
    /// meantime stays registered.
    pub async fn remove(&self, name: &str) -> ManagerResult<Option<Arc<ServerInstance>>> {
        let Some(instance) = self.get(name).await else {
            return Ok(None);
        };
        instance.stop().await?;

        let mut instances = self.instances.lock().await;
        if let Some(current) = instances.get(name)
            && Arc::ptr_eq(current, &instance)
            && current.state() == InstanceState::Stopped
        {
            instances.remove(name);
        }
        Ok(Some(instance))
    }

    /// Stop every registered instance concurrently, then clear the map.
    ///
    /// Holds the map throughout, so nothing can be registered mid-shutdown.
    pub async fn stop_all(&self) {
        let mut instances = self.instances.lock().await;
        if instances.is_empty() {
            return;
        }
        info!("Stopping {} registered instance(s)", instances.len());

        let results = join_all(instances.values().map(|instance| async move {
            (instance.name().to_string(), instance.stop().await)
        }))
        .await;
        for (name, result) in results {
            if let Err(e) = result {
                warn!("Stopping {} failed: {}", name, e);
            }
        }
        instances.clear();
    }

    /// Names of registered instances that are not stopped, sorted.
    pub async fn list_running(&self) -> Vec<String> {
        let instances = self.instances.lock().await;
        let mut names: Vec<String> = instances
            .values()
            .filter(|instance| instance.state() != InstanceState::Stopped)
            .map(|instance| instance.name().to_string())
            .collect();
        names.sort();
        names
    }

    pub async fn len(&self) -> usize {
        self.instances.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.instances.lock().await.is_empty()
    }
}
