use std::path::{Path, PathBuf};
use std::time::Duration;

use futures_util::{Stream, StreamExt};
use reqwest::Client;
use sha1::{Digest, Sha1};
use sha2::Sha256;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::core::error::{ManagerError, ManagerResult};

const MAX_RETRIES: u32 = 3;

/// Longest silence tolerated while a response body is streaming.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// A file that was fully written to disk, with digests computed while streaming.
#[derive(Debug, Clone)]
pub struct DownloadedFile {
    pub path: PathBuf,
    pub bytes: u64,
    pub sha1: String,
    pub sha256: String,
}

/// Streaming HTTP downloader shared by the runtime, catalog and artifact code.
#[derive(Debug, Clone)]
pub struct Downloader {
    client: Client,
    idle_timeout: Duration,
}

impl Downloader {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// GET a whole response body into memory.
    pub async fn get_bytes(&self, url: &str) -> ManagerResult<Vec<u8>> {
        let response = self.get_success(url).await?;
        let mut body = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = next_chunk(&mut stream, url, self.idle_timeout).await? {
            body.extend_from_slice(&chunk);
        }
        Ok(body)
    }

    // ── Single file download ────────────────────────────

    /// Stream `url` into `dest`, hashing as bytes arrive.
    ///
    /// On any failure the partially written `dest` is removed.
    pub async fn download_to_file(&self, url: &str, dest: &Path) -> ManagerResult<DownloadedFile> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| ManagerError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }

        let response = self.get_success(url).await?;
        let result = stream_into(response, url, dest, self.idle_timeout).await;
        if result.is_err() {
            let _ = tokio::fs::remove_file(dest).await;
        }
        let file = result?;
        debug!("Downloaded: {} -> {:?} ({} bytes)", url, dest, file.bytes);
        Ok(file)
    }

    /// SHA-1 of an existing file, hex encoded.
    pub async fn sha1_of(path: &Path) -> ManagerResult<String> {
        let bytes = tokio::fs::read(path).await.map_err(|e| ManagerError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let mut hasher = Sha1::new();
        hasher.update(&bytes);
        Ok(hex::encode(hasher.finalize()))
    }

    async fn get_success(&self, url: &str) -> ManagerResult<reqwest::Response> {
        let response = self.send_with_retry(url).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ManagerError::DownloadFailed {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response)
    }

    /// Retries connection failures, silent servers and 5xx answers.
    ///
    /// The answer to the last attempt is returned as is.
    async fn send_with_retry(&self, url: &str) -> ManagerResult<reqwest::Response> {
        let mut last_error: Option<ManagerError> = None;
        for attempt in 0..=MAX_RETRIES {
            let sent = tokio::time::timeout(self.idle_timeout, self.client.get(url).send()).await;
            let failure = match sent {
                Ok(Ok(response)) if response.status().is_server_error() && attempt < MAX_RETRIES => {
                    ManagerError::DownloadFailed {
                        url: url.to_string(),
                        status: response.status().as_u16(),
                    }
                }
                Ok(Ok(response)) => return Ok(response),
                Ok(Err(err)) => err.into(),
                Err(_) => ManagerError::DownloadStalled {
                    url: url.to_string(),
                    idle: self.idle_timeout,
                },
            };
            warn!("GET {} failed (attempt {}): {}", url, attempt + 1, failure);
            last_error = Some(failure);
            if attempt < MAX_RETRIES {
                let backoff_ms = 2_u64.pow(attempt) * 500;
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
            }
        }
        Err(last_error.unwrap_or_else(|| ManagerError::Other(format!("failed request to {url}"))))
    }
}

/// Next body chunk, or `DownloadStalled` when nothing arrives within `idle`.
async fn next_chunk<S, B>(stream: &mut S, url: &str, idle: Duration) -> ManagerResult<Option<B>>
where
    S: Stream<Item = reqwest::Result<B>> + Unpin,
{
    match tokio::time::timeout(idle, stream.next()).await {
        Ok(Some(chunk)) => Ok(Some(chunk?)),
        Ok(None) => Ok(None),
        Err(_) => Err(ManagerError::DownloadStalled {
            url: url.to_string(),
            idle,
        }),
    }
}

async fn stream_into(
    response: reqwest::Response,
    url: &str,
    dest: &Path,
    idle: Duration,
) -> ManagerResult<DownloadedFile> {
    let io_err = |source| ManagerError::Io {
        path: dest.to_path_buf(),
        source,
    };

    let mut file = tokio::fs::File::create(dest).await.map_err(io_err)?;
    let mut sha1 = Sha1::new();
    let mut sha256 = Sha256::new();
    let mut written = 0_u64;

    let mut stream = response.bytes_stream();
    while let Some(chunk) = next_chunk(&mut stream, url, idle).await? {
        sha1.update(&chunk);
        sha256.update(&chunk);
        file.write_all(&chunk).await.map_err(io_err)?;
        written = written.saturating_add(chunk.len() as u64);
    }
    file.flush().await.map_err(io_err)?;
    file.sync_all().await.map_err(io_err)?;
    // Handle must be closed before the caller renames the file (Windows).
    drop(file);

    Ok(DownloadedFile {
        path: dest.to_path_buf(),
        bytes: written,
        sha1: hex::encode(sha1.finalize()),
        sha256: hex::encode(sha256.finalize()),
    })
}
