pub mod artifact;
pub mod client;

pub use artifact::{ArtifactFetcher, ARTIFACT_FILE_NAME};
pub use client::{DownloadedFile, Downloader};
