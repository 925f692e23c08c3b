use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a server instance.
///
/// There is no `Stopping`: `stop()` only returns once the process is gone.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum InstanceState {
    #[default]
    Stopped,
    Starting,
    Running,
}

impl std::fmt::Display for InstanceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InstanceState::Stopped => write!(f, "stopped"),
            InstanceState::Starting => write!(f, "starting"),
            InstanceState::Running => write!(f, "running"),
        }
    }
}

/// Per-instance settings persisted as `config.json` in the instance directory.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct InstanceConfig {
    /// Server version id as listed by the catalog, e.g. `1.20.4`.
    pub version: Option<String>,
    pub description: String,
    /// Adds `-Xmx<N>M` when set.
    pub max_memory_mb: Option<u32>,
    /// Extra JVM arguments, placed before `-jar`.
    pub jvm_args: Vec<String>,
}

impl InstanceConfig {
    /// The configured version id, ignoring blank values.
    pub fn selected_version(&self) -> Option<&str> {
        self.version
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }
}

/// What discovery reports about one instance directory.
#[derive(Debug, Clone, Serialize)]
pub struct InstanceSummary {
    pub name: String,
    pub dir: PathBuf,
    pub version: Option<String>,
    pub description: String,
    pub agreement_accepted: bool,
    pub state: InstanceState,
}
