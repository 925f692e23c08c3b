use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Central error type for the server manager.
/// Every module returns `Result<T, ManagerError>`.
#[derive(Debug, Error)]
pub enum ManagerError {
    // ── IO ──────────────────────────────────────────────
    #[error("IO error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    // ── Network ─────────────────────────────────────────
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Download failed for {url}: HTTP {status}")]
    DownloadFailed { url: String, status: u16 },

    #[error("Download from {url} stalled: no data for {idle:?}")]
    DownloadStalled { url: String, idle: Duration },

    // ── Integrity ───────────────────────────────────────
    #[error("SHA-1 mismatch for {path:?}: expected {expected}, got {actual}")]
    Sha1Mismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    // ── JSON ────────────────────────────────────────────
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // ── Archive ─────────────────────────────────────────
    #[error("Zip extraction error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Archive extraction failed: {0}")]
    Extraction(String),

    // ── Configuration ───────────────────────────────────
    #[error("Configuration error: {0}")]
    Configuration(String),

    // ── Lifecycle ───────────────────────────────────────
    #[error("Agreement not accepted for server {0}")]
    AgreementNotAccepted(String),

    #[error("Server {0} is already running")]
    AlreadyRunning(String),

    #[error("Server {0} is not running")]
    NotRunning(String),

    #[error("Server not found: {0}")]
    InstanceNotFound(String),

    #[error("Failed to start server {name}: {source}")]
    StartFailed {
        name: String,
        #[source]
        source: Box<ManagerError>,
    },

    // ── Runtime ─────────────────────────────────────────
    #[error("Runtime {major} download failed: {source}")]
    RuntimeDownload {
        major: u32,
        #[source]
        source: Box<ManagerError>,
    },

    #[error("Runtime {major} executable not found at {path:?}")]
    RuntimeNotFound { major: u32, path: PathBuf },

    // ── Catalog ─────────────────────────────────────────
    #[error("Version catalog unavailable: {0}")]
    CatalogUnavailable(#[source] Box<ManagerError>),

    #[error("Invalid manifest for version {version}: {reason}")]
    VersionManifest { version: String, reason: String },

    #[error("Artifact download from {url} failed: {source}")]
    ArtifactDownload {
        url: String,
        #[source]
        source: Box<ManagerError>,
    },

    // ── Generic ─────────────────────────────────────────
    #[error("{0}")]
    Other(String),
}

/// Convenience alias used throughout the crate.
pub type ManagerResult<T> = Result<T, ManagerError>;

impl From<std::io::Error> for ManagerError {
    fn from(source: std::io::Error) -> Self {
        ManagerError::Io {
            path: PathBuf::new(),
            source,
        }
    }
}

impl ManagerError {
    /// Wrap a failure that happened after a start was requested.
    pub fn start_failed(name: impl Into<String>, source: ManagerError) -> Self {
        ManagerError::StartFailed {
            name: name.into(),
            source: Box::new(source),
        }
    }

    pub fn catalog_unavailable(source: ManagerError) -> Self {
        ManagerError::CatalogUnavailable(Box::new(source))
    }
}
