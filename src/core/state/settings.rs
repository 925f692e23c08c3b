use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::core::error::{ManagerError, ManagerResult};
use crate::core::java::ADOPTIUM_API_BASE;
use crate::core::launch::ShutdownPolicy;
use crate::core::version::VERSION_MANIFEST_URL;

const APP_DIR_NAME: &str = "ServerManager";
const SETTINGS_FILE: &str = "manager_settings.json";

/// Shutdown timings in whole seconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ShutdownSettings {
    pub grace_secs: u64,
    pub terminate_secs: u64,
    pub restart_delay_secs: u64,
}

impl Default for ShutdownSettings {
    fn default() -> Self {
        Self {
            grace_secs: 10,
            terminate_secs: 5,
            restart_delay_secs: 5,
        }
    }
}

impl ShutdownSettings {
    pub fn policy(&self) -> ShutdownPolicy {
        ShutdownPolicy {
            grace: Duration::from_secs(self.grace_secs),
            terminate: Duration::from_secs(self.terminate_secs),
            restart_delay: Duration::from_secs(self.restart_delay_secs),
            ..ShutdownPolicy::default()
        }
    }
}

/// Manager-wide settings, stored as `manager_settings.json` in the data dir.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    #[serde(skip)]
    pub data_dir: PathBuf,
    /// Defaults to `<data>/servers`.
    pub servers_dir: Option<PathBuf>,
    /// Defaults to `<data>/runtimes`.
    pub runtimes_dir: Option<PathBuf>,
    pub version_manifest_url: String,
    pub runtime_api_base: String,
    pub shutdown: ShutdownSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("."),
            servers_dir: None,
            runtimes_dir: None,
            version_manifest_url: VERSION_MANIFEST_URL.to_string(),
            runtime_api_base: ADOPTIUM_API_BASE.to_string(),
            shutdown: ShutdownSettings::default(),
        }
    }
}

impl Settings {
    /// Defaults rooted at `data_dir`.
    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            ..Self::default()
        }
    }

    /// Load from `data_dir`; a missing or corrupt file yields the defaults.
    pub fn load(data_dir: &Path) -> Self {
        let path = data_dir.join(SETTINGS_FILE);
        let mut settings = match std::fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<Settings>(&raw) {
                Ok(settings) => settings,
                Err(e) => {
                    warn!("Ignoring corrupt {:?}: {}", path, e);
                    Settings::default()
                }
            },
            Err(_) => Settings::default(),
        };
        settings.data_dir = data_dir.to_path_buf();
        settings
    }

    /// Like [`Settings::load`], but writes the defaults out on first run so
    /// there is a file to edit.
    pub fn load_or_init(data_dir: &Path) -> ManagerResult<Self> {
        let settings = Self::load(data_dir);
        if !data_dir.join(SETTINGS_FILE).exists() {
            settings.save()?;
        }
        Ok(settings)
    }

    pub fn save(&self) -> ManagerResult<()> {
        std::fs::create_dir_all(&self.data_dir).map_err(|source| ManagerError::Io {
            path: self.data_dir.clone(),
            source,
        })?;
        let path = self.data_dir.join(SETTINGS_FILE);
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, json).map_err(|source| ManagerError::Io { path, source })
    }

    pub fn servers_dir(&self) -> PathBuf {
        self.servers_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("servers"))
    }

    pub fn runtimes_dir(&self) -> PathBuf {
        self.runtimes_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("runtimes"))
    }

    pub fn shutdown_policy(&self) -> ShutdownPolicy {
        self.shutdown.policy()
    }
}

fn default_base_dir() -> PathBuf {
    dirs::data_dir().unwrap_or_else(|| PathBuf::from("."))
}

/// `<platform data dir>/ServerManager`.
pub fn default_data_dir() -> PathBuf {
    default_base_dir().join(APP_DIR_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults_under_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load(dir.path());
        assert_eq!(settings.servers_dir(), dir.path().join("servers"));
        assert_eq!(settings.runtimes_dir(), dir.path().join("runtimes"));
        assert_eq!(settings.runtime_api_base, ADOPTIUM_API_BASE);
        assert_eq!(settings.shutdown_policy(), ShutdownPolicy::default());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(SETTINGS_FILE),
            r#"{"servers_dir": "/srv/mc", "shutdown": {"grace_secs": 30}}"#,
        )
        .unwrap();

        let settings = Settings::load(dir.path());
        assert_eq!(settings.servers_dir(), PathBuf::from("/srv/mc"));
        assert_eq!(settings.shutdown.grace_secs, 30);
        assert_eq!(settings.shutdown.terminate_secs, 5);
        assert_eq!(settings.version_manifest_url, VERSION_MANIFEST_URL);
    }

    #[test]
    fn corrupt_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(SETTINGS_FILE), "{{{").unwrap();
        let settings = Settings::load(dir.path());
        assert_eq!(settings.shutdown, ShutdownSettings::default());
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = Settings::with_data_dir(dir.path().to_path_buf());
        settings.runtime_api_base = "http://127.0.0.1:8080".into();
        settings.save().unwrap();
        assert_eq!(Settings::load(dir.path()), settings);
    }

    #[test]
    fn first_run_writes_defaults_and_keeps_edits() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("data");

        let first = Settings::load_or_init(&data).unwrap();
        assert!(data.join(SETTINGS_FILE).is_file());
        assert_eq!(first, Settings::with_data_dir(data.clone()));

        std::fs::write(
            data.join(SETTINGS_FILE),
            r#"{"shutdown": {"grace_secs": 42}}"#,
        )
        .unwrap();
        let edited = Settings::load_or_init(&data).unwrap();
        assert_eq!(edited.shutdown.grace_secs, 42);
    }
}
