// ─── Version Manifest ───
// Parses the top-level server version manifest and orders its entries.

use std::cmp::Ordering;

use serde::Deserialize;

use crate::core::error::{ManagerError, ManagerResult};

pub const VERSION_MANIFEST_URL: &str =
    "https://piston-meta.mojang.com/mc/game/version_manifest_v2.json";

/// Top-level version manifest.
#[derive(Debug, Deserialize)]
pub struct VersionManifest {
    pub versions: Vec<VersionEntry>,
}

/// A single entry in the manifest.
#[derive(Debug, Clone, Deserialize)]
pub struct VersionEntry {
    pub id: String,
    #[serde(rename = "type")]
    pub version_type: String,
    pub url: String,
}

/// A server software version as offered by the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerVersion {
    pub id: String,
    pub stable: bool,
    pub manifest_url: String,
}

impl From<VersionEntry> for ServerVersion {
    fn from(entry: VersionEntry) -> Self {
        Self {
            stable: entry.version_type == "release",
            id: entry.id,
            manifest_url: entry.url,
        }
    }
}

impl std::fmt::Display for ServerVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.stable {
            write!(f, "{}", self.id)
        } else {
            write!(f, "{} (snapshot)", self.id)
        }
    }
}

impl VersionManifest {
    pub fn parse(bytes: &[u8]) -> ManagerResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| ManagerError::catalog_unavailable(e.into()))
    }

    /// Convert into server versions, newest first.
    pub fn into_sorted_versions(self) -> Vec<ServerVersion> {
        let mut versions: Vec<ServerVersion> =
            self.versions.into_iter().map(ServerVersion::from).collect();
        sort_descending(&mut versions);
        versions
    }
}

/// Stable sort, newest first, by [`compare_versions`].
pub fn sort_descending(versions: &mut [ServerVersion]) {
    versions.sort_by(|a, b| compare_versions(&b.id, &a.id));
}

/// Compare dotted version ids component by component.
///
/// Non-numeric components count as 0 and missing trailing components are 0,
/// so `1.20` equals `1.20.0`.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let a_parts: Vec<&str> = a.split('.').collect();
    let b_parts: Vec<&str> = b.split('.').collect();

    let max_len = a_parts.len().max(b_parts.len());
    for idx in 0..max_len {
        let a_val = a_parts.get(idx).map_or(0, |p| parse_component(p));
        let b_val = b_parts.get(idx).map_or(0, |p| parse_component(p));
        match a_val.cmp(&b_val) {
            Ordering::Equal => continue,
            non_eq => return non_eq,
        }
    }
    Ordering::Equal
}

fn parse_component(part: &str) -> u64 {
    part.trim().parse().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn version(id: &str) -> ServerVersion {
        ServerVersion {
            id: id.to_string(),
            stable: true,
            manifest_url: format!("https://example.com/{id}.json"),
        }
    }

    #[test]
    fn numeric_ordering_not_lexical() {
        let mut versions = vec![version("1.20.1"), version("1.9.4"), version("1.20.10")];
        sort_descending(&mut versions);
        let ids: Vec<_> = versions.iter().map(|v| v.id.as_str()).collect();
        assert_eq!(ids, ["1.20.10", "1.20.1", "1.9.4"]);
    }

    #[test]
    fn missing_and_non_numeric_components_are_zero() {
        assert_eq!(compare_versions("1.20", "1.20.0"), Ordering::Equal);
        assert_eq!(compare_versions("24w14a", "0"), Ordering::Equal);
        assert_eq!(compare_versions("1.21", "1.20.6"), Ordering::Greater);
        assert_eq!(compare_versions("1.20-pre1", "1.19"), Ordering::Less);
    }

    #[test]
    fn parse_manifest_maps_stability() {
        let json = br#"{
            "latest": {"release": "1.20.4", "snapshot": "24w14a"},
            "versions": [
                {"id": "24w14a", "type": "snapshot", "url": "https://example.com/s.json", "releaseTime": "x"},
                {"id": "1.20.4", "type": "release", "url": "https://example.com/r.json", "sha1": "abc"}
            ]
        }"#;
        let versions = VersionManifest::parse(json).unwrap().into_sorted_versions();
        assert_eq!(versions[0].id, "1.20.4");
        assert!(versions[0].stable);
        assert!(!versions[1].stable);
        assert_eq!(versions[1].manifest_url, "https://example.com/s.json");
    }

    #[test]
    fn malformed_manifest_is_catalog_error() {
        let err = VersionManifest::parse(b"{\"versions\": 3}").unwrap_err();
        let ManagerError::CatalogUnavailable(source) = err else {
            panic!("expected CatalogUnavailable, got {err:?}");
        };
        assert!(matches!(*source, ManagerError::Json(_)));
    }
}
