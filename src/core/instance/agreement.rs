// ─── Agreement Flag ───
// `eula.txt` in the instance directory gates every start.

use std::path::{Path, PathBuf};

use crate::core::error::{ManagerError, ManagerResult};

pub const AGREEMENT_FILE_NAME: &str = "eula.txt";

pub fn agreement_path(instance_dir: &Path) -> PathBuf {
    instance_dir.join(AGREEMENT_FILE_NAME)
}

/// `true` when the flag file holds a non-comment `eula=true` line.
pub async fn is_accepted(instance_dir: &Path) -> bool {
    match tokio::fs::read_to_string(agreement_path(instance_dir)).await {
        Ok(contents) => parse_accepted(&contents),
        Err(_) => false,
    }
}

pub fn parse_accepted(contents: &str) -> bool {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .any(|(key, value)| key.trim() == "eula" && value.trim().eq_ignore_ascii_case("true"))
}

/// Write an accepted flag file, replacing any previous one.
pub async fn accept(instance_dir: &Path) -> ManagerResult<()> {
    let path = agreement_path(instance_dir);
    tokio::fs::write(&path, "#Generated by servermanager\neula=true\n")
        .await
        .map_err(|source| ManagerError::Io { path, source })
}
