pub mod catalog;
pub mod manifest;
pub mod version_file;

pub use catalog::{find_version, VersionCatalog};
pub use manifest::{compare_versions, ServerVersion, VersionManifest, VERSION_MANIFEST_URL};
pub use version_file::{ResolvedArtifact, VersionJson};
