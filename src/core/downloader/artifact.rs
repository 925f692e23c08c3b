// ─── Artifact Fetcher ───
// Places the server executable at its fixed path inside an instance directory.

use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::core::error::{ManagerError, ManagerResult};
use crate::core::locks::KeyedLocks;

use super::client::Downloader;

/// File name of the server artifact inside every instance directory.
pub const ARTIFACT_FILE_NAME: &str = "server.jar";

#[derive(Debug)]
pub struct ArtifactFetcher {
    downloader: Downloader,
    locks: KeyedLocks<PathBuf>,
}

impl ArtifactFetcher {
    pub fn new(downloader: Downloader) -> Self {
        Self {
            downloader,
            locks: KeyedLocks::default(),
        }
    }

    pub fn artifact_path(instance_dir: &Path) -> PathBuf {
        instance_dir.join(ARTIFACT_FILE_NAME)
    }

    /// Make sure the artifact exists, downloading it when absent or stale.
    ///
    /// An existing non-empty file is kept unless `refresh` is set or
    /// `expected_sha1` is known and does not match. The download goes to a
    /// sibling temp file and is renamed into place only once complete.
    #[instrument(skip(self, expected_sha1))]
    pub async fn ensure_artifact(
        &self,
        instance_dir: &Path,
        url: &str,
        expected_sha1: Option<&str>,
        refresh: bool,
    ) -> ManagerResult<PathBuf> {
        let target = Self::artifact_path(instance_dir);
        let _guard = self.locks.lock(target.clone()).await;

        if !refresh && is_current(&target, expected_sha1).await {
            debug!("Artifact already present at {:?}", target);
            return Ok(target);
        }

        let wrap = |source: ManagerError| ManagerError::ArtifactDownload {
            url: url.to_string(),
            source: Box::new(source),
        };

        let partial = instance_dir.join(format!(".{ARTIFACT_FILE_NAME}.{}.part", Uuid::new_v4()));
        info!("Downloading server artifact {} -> {:?}", url, target);
        let file = self
            .downloader
            .download_to_file(url, &partial)
            .await
            .map_err(wrap)?;

        if let Some(expected) = expected_sha1
            && !file.sha1.eq_ignore_ascii_case(expected)
        {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(wrap(ManagerError::Sha1Mismatch {
                path: target,
                expected: expected.to_string(),
                actual: file.sha1,
            }));
        }

        if let Err(source) = tokio::fs::rename(&partial, &target).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(wrap(ManagerError::Io {
                path: target,
                source,
            }));
        }

        info!("Server artifact ready ({} bytes)", file.bytes);
        Ok(target)
    }
}

async fn is_current(target: &Path, expected_sha1: Option<&str>) -> bool {
    let Ok(meta) = tokio::fs::metadata(target).await else {
        return false;
    };
    if !meta.is_file() || meta.len() == 0 {
        return false;
    }
    match expected_sha1 {
        Some(expected) => match Downloader::sha1_of(target).await {
            Ok(actual) => actual.eq_ignore_ascii_case(expected),
            Err(_) => false,
        },
        None => true,
    }
}
