use std::path::{Component, Path, PathBuf};

use tracing::{info, warn};

use super::model::InstanceConfig;
use crate::core::error::{ManagerError, ManagerResult};

pub const CONFIG_FILE_NAME: &str = "config.json";

/// Instance directories on disk. The directory name is the instance name.
#[derive(Debug, Clone)]
pub struct InstanceStore {
    /// Root directory where all instances live.
    servers_dir: PathBuf,
}

impl InstanceStore {
    pub fn new(servers_dir: PathBuf) -> Self {
        Self { servers_dir }
    }

    pub fn servers_dir(&self) -> &Path {
        &self.servers_dir
    }

    /// Directory of instance `name`; the name must be a single plain path segment.
    pub fn instance_dir(&self, name: &str) -> ManagerResult<PathBuf> {
        let mut components = Path::new(name).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => Ok(self.servers_dir.join(name)),
            _ => Err(ManagerError::Configuration(format!(
                "invalid instance name {name:?}"
            ))),
        }
    }

    /// Directory of an existing instance, or `InstanceNotFound`.
    pub async fn existing_dir(&self, name: &str) -> ManagerResult<PathBuf> {
        let dir = self.instance_dir(name)?;
        match tokio::fs::metadata(&dir).await {
            Ok(meta) if meta.is_dir() => Ok(dir),
            _ => Err(ManagerError::InstanceNotFound(name.to_string())),
        }
    }

    /// Load `config.json`; a missing file yields the defaults.
    pub async fn load_config(instance_dir: &Path) -> ManagerResult<InstanceConfig> {
        let config_path = instance_dir.join(CONFIG_FILE_NAME);
        let json = match tokio::fs::read_to_string(&config_path).await {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(InstanceConfig::default());
            }
            Err(e) => {
                return Err(ManagerError::Io {
                    path: config_path,
                    source: e,
                });
            }
        };

        serde_json::from_str(&json).map_err(|e| {
            ManagerError::Configuration(format!("corrupt {}: {e}", config_path.display()))
        })
    }

    /// Save instance config to disk.
    pub async fn save_config(instance_dir: &Path, config: &InstanceConfig) -> ManagerResult<()> {
        let json = serde_json::to_string_pretty(config)?;
        let config_path = instance_dir.join(CONFIG_FILE_NAME);

        tokio::fs::create_dir_all(instance_dir)
            .await
            .map_err(|e| ManagerError::Io {
                path: instance_dir.to_path_buf(),
                source: e,
            })?;

        tokio::fs::write(&config_path, json)
            .await
            .map_err(|e| ManagerError::Io {
                path: config_path,
                source: e,
            })?;

        Ok(())
    }

    /// Names of every instance directory, sorted.
    pub async fn list_names(&self) -> ManagerResult<Vec<String>> {
        let mut names = Vec::new();

        if !self.servers_dir.exists() {
            return Ok(names);
        }

        let mut entries =
            tokio::fs::read_dir(&self.servers_dir)
                .await
                .map_err(|e| ManagerError::Io {
                    path: self.servers_dir.clone(),
                    source: e,
                })?;

        while let Some(entry) = entries.next_entry().await.map_err(|e| ManagerError::Io {
            path: self.servers_dir.clone(),
            source: e,
        })? {
            let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            if !is_dir {
                continue;
            }
            match entry.file_name().into_string() {
                Ok(name) if !name.starts_with('.') => names.push(name),
                Ok(_) => {}
                Err(raw) => warn!("Skipping non UTF-8 instance directory {:?}", raw),
            }
        }

        names.sort();
        info!("Found {} instance directories", names.len());
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_names_must_be_single_segment() {
        let store = InstanceStore::new(PathBuf::from("/srv/servers"));
        assert_eq!(
            store.instance_dir("survival").unwrap(),
            PathBuf::from("/srv/servers/survival")
        );
        assert!(store.instance_dir("../etc").is_err());
        assert!(store.instance_dir("a/b").is_err());
        assert!(store.instance_dir("").is_err());
    }

    #[tokio::test]
    async fn missing_config_is_default_and_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = InstanceStore::load_config(dir.path()).await.unwrap();
        assert_eq!(loaded, InstanceConfig::default());

        let config = InstanceConfig {
            version: Some("1.20.4".into()),
            description: "survival world".into(),
            max_memory_mb: Some(2048),
            jvm_args: vec!["-XX:+UseG1GC".into()],
        };
        InstanceStore::save_config(dir.path(), &config).await.unwrap();
        assert_eq!(InstanceStore::load_config(dir.path()).await.unwrap(), config);
    }

    #[tokio::test]
    async fn corrupt_config_is_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE_NAME), "{ nope").unwrap();
        let err = InstanceStore::load_config(dir.path()).await.unwrap_err();
        assert!(matches!(err, ManagerError::Configuration(_)));
    }

    #[tokio::test]
    async fn lists_only_directories() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir(root.path().join("beta")).unwrap();
        std::fs::create_dir(root.path().join("alpha")).unwrap();
        std::fs::create_dir(root.path().join(".hidden")).unwrap();
        std::fs::write(root.path().join("notes.txt"), "x").unwrap();

        let store = InstanceStore::new(root.path().to_path_buf());
        assert_eq!(store.list_names().await.unwrap(), ["alpha", "beta"]);
        assert!(matches!(
            store.existing_dir("gamma").await,
            Err(ManagerError::InstanceNotFound(_))
        ));
    }
}
