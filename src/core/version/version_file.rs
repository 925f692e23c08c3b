// ─── Version File ───
// Parses a per-version manifest down to what a server launch needs.

use serde::Deserialize;

use crate::core::error::{ManagerError, ManagerResult};

/// The subset of a per-version JSON document used by the manager.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionJson {
    #[serde(default)]
    pub downloads: Option<VersionDownloads>,
    #[serde(default)]
    pub java_version: Option<JavaVersionInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JavaVersionInfo {
    pub major_version: u32,
}

#[derive(Debug, Deserialize)]
pub struct VersionDownloads {
    #[serde(default)]
    pub server: Option<DownloadArtifact>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DownloadArtifact {
    pub url: String,
    #[serde(default)]
    pub sha1: Option<String>,
}

/// Result of resolving a version: where to get the server and what runs it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedArtifact {
    pub version: String,
    pub url: String,
    pub sha1: Option<String>,
    pub java_major: u32,
}

impl VersionJson {
    pub fn parse(version: &str, bytes: &[u8]) -> ManagerResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| ManagerError::VersionManifest {
            version: version.to_string(),
            reason: e.to_string(),
        })
    }

    pub fn into_resolved(self, version: &str) -> ManagerResult<ResolvedArtifact> {
        let missing = |field: &str| ManagerError::VersionManifest {
            version: version.to_string(),
            reason: format!("missing {field}"),
        };

        let server = self
            .downloads
            .and_then(|d| d.server)
            .ok_or_else(|| missing("downloads.server.url"))?;
        if server.url.trim().is_empty() {
            return Err(missing("downloads.server.url"));
        }
        let java_major = self
            .java_version
            .map(|j| j.major_version)
            .ok_or_else(|| missing("javaVersion.majorVersion"))?;

        Ok(ResolvedArtifact {
            version: version.to_string(),
            url: server.url,
            sha1: server.sha1,
            java_major,
        })
    }
}
