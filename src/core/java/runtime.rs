use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::core::downloader::Downloader;
use crate::core::error::{ManagerError, ManagerResult};
use crate::core::locks::KeyedLocks;

pub use extract::ArchiveFormat;
pub use platform::{HostOs, HostPlatform};

pub const ADOPTIUM_API_BASE: &str = "https://api.adoptium.net";
const RUNTIME_METADATA_FILE: &str = "runtime.json";
const STAGING_DIR_NAME: &str = "temp";
const MIN_FREE_DISK_BYTES: u64 = 512 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RuntimeMetadata {
    major: u32,
    os: String,
    arch: String,
    source_url: String,
    sha256_archive: String,
    installed_at: String,
    manager_version: String,
}

/// Installs runtimes under `<root>/<major>/` and hands out their executables.
#[derive(Debug)]
pub struct RuntimeProvisioner {
    runtimes_root: PathBuf,
    api_base: String,
    downloader: Downloader,
    locks: KeyedLocks<u32>,
}

impl RuntimeProvisioner {
    pub fn new(runtimes_root: PathBuf, api_base: impl Into<String>, downloader: Downloader) -> Self {
        Self {
            runtimes_root,
            api_base: api_base.into(),
            downloader,
            locks: KeyedLocks::default(),
        }
    }

    pub fn runtime_dir(&self, major: u32) -> PathBuf {
        self.runtimes_root.join(major.to_string())
    }

    pub fn java_executable(&self, major: u32) -> PathBuf {
        self.runtime_dir(major).join("bin").join(java_exe())
    }

    /// Path to the runtime executable for `major`, installing it on first use.
    ///
    /// An existing executable is a cache hit and never touches the network.
    /// Concurrent calls for the same major share one download.
    #[instrument(skip(self))]
    pub async fn ensure_runtime(&self, major: u32) -> ManagerResult<PathBuf> {
        let java = self.java_executable(major);
        if is_file(&java).await {
            debug!("Runtime {} cache hit at {:?}", major, java);
            return Ok(java);
        }

        let _guard = self.locks.lock(major).await;
        if is_file(&java).await {
            debug!("Runtime {} installed by a concurrent request", major);
            return Ok(java);
        }

        self.install(major).await?;

        if !is_file(&java).await {
            return Err(ManagerError::RuntimeNotFound { major, path: java });
        }
        Ok(java)
    }

    async fn install(&self, major: u32) -> ManagerResult<()> {
        let host = HostPlatform::current();
        let url = runtime_download_url(&self.api_base, major, host);

        let temp_root = self.runtimes_root.join(STAGING_DIR_NAME);
        tokio::fs::create_dir_all(&temp_root)
            .await
            .map_err(|source| ManagerError::Io {
                path: temp_root.clone(),
                source,
            })?;

        ensure_min_disk_space(&self.runtimes_root, MIN_FREE_DISK_BYTES).map_err(|source| {
            ManagerError::RuntimeDownload {
                major,
                source: Box::new(source),
            }
        })?;

        let staging_id = Uuid::new_v4();
        let staging_dir = temp_root.join(format!("{staging_id}_dir"));
        let archive_path = temp_root.join(format!(
            "{staging_id}.{}",
            host.os.archive_format().extension()
        ));

        let result = self
            .download_and_promote(major, host, &url, &archive_path, &staging_dir)
            .await;

        let _ = tokio::fs::remove_file(&archive_path).await;
        if result.is_err() {
            let _ = tokio::fs::remove_dir_all(&staging_dir).await;
        }
        result
    }

    async fn download_and_promote(
        &self,
        major: u32,
        host: &HostPlatform,
        url: &str,
        archive_path: &Path,
        staging_dir: &Path,
    ) -> ManagerResult<()> {
        let download_start = Instant::now();
        info!("Downloading runtime {} from {}", major, url);
        let archive = self
            .downloader
            .download_to_file(url, archive_path)
            .await
            .map_err(|source| ManagerError::RuntimeDownload {
                major,
                source: Box::new(source),
            })?;
        info!(
            "Runtime download finished in {:?} ({} bytes)",
            download_start.elapsed(),
            archive.bytes
        );

        let extract_start = Instant::now();
        let format = host.os.archive_format();
        let (archive_src, staging) = (archive_path.to_path_buf(), staging_dir.to_path_buf());
        tokio::task::spawn_blocking(move || -> ManagerResult<()> {
            extract::extract_archive(format, &archive_src, &staging)?;
            layout::normalize(&staging)
        })
        .await
        .map_err(|e| ManagerError::Other(format!("Task join error: {e}")))??;
        info!(
            "Runtime extraction finished in {:?}",
            extract_start.elapsed()
        );

        let staged_java = staging_dir.join("bin").join(java_exe());
        if !staged_java.is_file() {
            return Err(ManagerError::RuntimeNotFound {
                major,
                path: self.java_executable(major),
            });
        }
        ensure_executable(&staged_java)?;

        let metadata = RuntimeMetadata {
            major,
            os: host.os.as_str().to_string(),
            arch: host.arch.to_string(),
            source_url: url.to_string(),
            sha256_archive: archive.sha256,
            installed_at: Utc::now().to_rfc3339(),
            manager_version: env!("CARGO_PKG_VERSION").to_string(),
        };
        write_runtime_metadata(staging_dir, &metadata).await?;

        let runtime_root = self.runtime_dir(major);
        if runtime_root.exists() {
            // Left over from an interrupted install: no executable, never valid.
            tokio::fs::remove_dir_all(&runtime_root)
                .await
                .map_err(|source| ManagerError::Io {
                    path: runtime_root.clone(),
                    source,
                })?;
        }
        tokio::fs::rename(staging_dir, &runtime_root)
            .await
            .map_err(|source| ManagerError::Io {
                path: runtime_root.clone(),
                source,
            })?;

        info!("Runtime {} installed at {:?}", major, runtime_root);
        Ok(())
    }
}

/// Binary endpoint for the latest GA JDK of `major` on `host`.
pub fn runtime_download_url(api_base: &str, major: u32, host: &HostPlatform) -> String {
    format!(
        "{}/v3/binary/latest/{}/ga/{}/{}/jdk/hotspot/normal/eclipse",
        api_base.trim_end_matches('/'),
        major,
        host.os.as_str(),
        host.arch
    )
}

pub fn java_exe() -> &'static str {
    if cfg!(windows) {
        "java.exe"
    } else {
        "java"
    }
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}

async fn write_runtime_metadata(
    runtime_root: &Path,
    metadata: &RuntimeMetadata,
) -> ManagerResult<()> {
    let metadata_path = runtime_root.join(RUNTIME_METADATA_FILE);
    let payload = serde_json::to_vec_pretty(metadata)?;
    tokio::fs::write(&metadata_path, payload)
        .await
        .map_err(|source| ManagerError::Io {
            path: metadata_path,
            source,
        })
}

fn ensure_executable(java_bin: &Path) -> ManagerResult<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = std::fs::metadata(java_bin)
            .map_err(|source| ManagerError::Io {
                path: java_bin.to_path_buf(),
                source,
            })?
            .permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(java_bin, perms).map_err(|source| ManagerError::Io {
            path: java_bin.to_path_buf(),
            source,
        })?;
    }
    #[cfg(not(unix))]
    let _ = java_bin;
    Ok(())
}

fn ensure_min_disk_space(path: &Path, minimum_bytes: u64) -> ManagerResult<()> {
    let disks = sysinfo::Disks::new_with_refreshed_list();
    let canonical = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    let mut best_len = 0usize;
    let mut available = None;
    for disk in disks.list() {
        let mount = disk.mount_point();
        if canonical.starts_with(mount) {
            let len = mount.as_os_str().len();
            if len >= best_len {
                best_len = len;
                available = Some(disk.available_space());
            }
        }
    }
    if let Some(bytes) = available
        && bytes < minimum_bytes
    {
        return Err(ManagerError::Other(format!(
            "Not enough disk space to install a runtime: available={} required={}",
            bytes, minimum_bytes
        )));
    }
    Ok(())
}

mod platform {
    use std::sync::OnceLock;

    use super::ArchiveFormat;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum HostOs {
        Windows,
        Mac,
        Linux,
    }

    impl HostOs {
        pub fn detect() -> Self {
            match std::env::consts::OS {
                "windows" => HostOs::Windows,
                "macos" => HostOs::Mac,
                _ => HostOs::Linux,
            }
        }

        pub fn as_str(self) -> &'static str {
            match self {
                HostOs::Windows => "windows",
                HostOs::Mac => "mac",
                HostOs::Linux => "linux",
            }
        }

        pub fn archive_format(self) -> ArchiveFormat {
            match self {
                HostOs::Windows => ArchiveFormat::Zip,
                HostOs::Mac | HostOs::Linux => ArchiveFormat::TarGz,
            }
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct HostPlatform {
        pub os: HostOs,
        pub arch: &'static str,
    }

    impl HostPlatform {
        /// Detected once per process.
        pub fn current() -> &'static HostPlatform {
            static HOST: OnceLock<HostPlatform> = OnceLock::new();
            HOST.get_or_init(|| HostPlatform {
                os: HostOs::detect(),
                arch: arch_label(std::env::consts::ARCH.contains("64")),
            })
        }
    }

    pub fn arch_label(is_64bit: bool) -> &'static str {
        if is_64bit {
            "x64"
        } else {
            "x32"
        }
    }
}

mod extract {
    use std::fs::File;
    use std::path::{Component, Path, PathBuf};

    use flate2::read::GzDecoder;

    use crate::core::error::{ManagerError, ManagerResult};

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum ArchiveFormat {
        Zip,
        TarGz,
    }

    impl ArchiveFormat {
        pub fn extension(self) -> &'static str {
            match self {
                ArchiveFormat::Zip => "zip",
                ArchiveFormat::TarGz => "tar.gz",
            }
        }
    }

    /// Unpack `archive` into `target`, refusing any entry that would land outside it.
    pub fn extract_archive(format: ArchiveFormat, archive: &Path, target: &Path) -> ManagerResult<()> {
        std::fs::create_dir_all(target).map_err(|source| ManagerError::Io {
            path: target.to_path_buf(),
            source,
        })?;
        match format {
            ArchiveFormat::Zip => extract_zip(archive, target),
            ArchiveFormat::TarGz => extract_tar_gz(archive, target),
        }
    }

    /// Join an archive-relative path onto `target`, rejecting traversal.
    pub fn safe_join(target: &Path, relative: &Path) -> ManagerResult<PathBuf> {
        let mut out = target.to_path_buf();
        for component in relative.components() {
            match component {
                Component::Normal(part) => out.push(part),
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(ManagerError::Extraction(format!(
                        "entry {:?} escapes the target directory",
                        relative
                    )));
                }
            }
        }
        if !out.starts_with(target) {
            return Err(ManagerError::Extraction(format!(
                "entry {:?} escapes the target directory",
                relative
            )));
        }
        Ok(out)
    }

    fn extract_zip(zip_path: &Path, target: &Path) -> ManagerResult<()> {
        let zip_file = File::open(zip_path).map_err(|source| ManagerError::Io {
            path: zip_path.to_path_buf(),
            source,
        })?;
        let mut archive = zip::ZipArchive::new(zip_file)
            .map_err(|e| ManagerError::Extraction(format!("unreadable zip: {e}")))?;

        for index in 0..archive.len() {
            let mut zipped = archive.by_index(index)?;
            let enclosed = zipped.enclosed_name().ok_or_else(|| {
                ManagerError::Extraction(format!(
                    "entry {:?} escapes the target directory",
                    zipped.name()
                ))
            })?;
            let out_path = safe_join(target, &enclosed)?;

            if zipped.is_dir() {
                std::fs::create_dir_all(&out_path).map_err(|source| ManagerError::Io {
                    path: out_path,
                    source,
                })?;
                continue;
            }

            if let Some(parent) = out_path.parent() {
                std::fs::create_dir_all(parent).map_err(|source| ManagerError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }

            let mut out = File::create(&out_path).map_err(|source| ManagerError::Io {
                path: out_path.clone(),
                source,
            })?;
            std::io::copy(&mut zipped, &mut out).map_err(|source| ManagerError::Io {
                path: out_path.clone(),
                source,
            })?;

            #[cfg(unix)]
            if let Some(mode) = zipped.unix_mode() {
                use std::os::unix::fs::PermissionsExt;
                let _ = std::fs::set_permissions(&out_path, std::fs::Permissions::from_mode(mode));
            }
        }

        Ok(())
    }

    fn extract_tar_gz(tar_path: &Path, target: &Path) -> ManagerResult<()> {
        let tar_file = File::open(tar_path).map_err(|source| ManagerError::Io {
            path: tar_path.to_path_buf(),
            source,
        })?;
        let mut archive = tar::Archive::new(GzDecoder::new(tar_file));
        archive.set_preserve_permissions(true);

        let entries = archive
            .entries()
            .map_err(|e| ManagerError::Extraction(format!("unreadable tar.gz: {e}")))?;
        for entry in entries {
            let mut entry =
                entry.map_err(|e| ManagerError::Extraction(format!("corrupt tar entry: {e}")))?;
            let path = entry
                .path()
                .map_err(|e| ManagerError::Extraction(format!("invalid tar entry path: {e}")))?
                .into_owned();

            let out_path = safe_join(target, &path)?;
            if out_path == target {
                continue;
            }

            let unpacked = entry
                .unpack_in(target)
                .map_err(|e| ManagerError::Extraction(format!("{}: {e}", path.display())))?;
            if !unpacked {
                return Err(ManagerError::Extraction(format!(
                    "entry {:?} escapes the target directory",
                    path
                )));
            }
        }

        Ok(())
    }
}

mod layout {
    use std::path::Path;

    use uuid::Uuid;

    use crate::core::error::{ManagerError, ManagerResult};

    /// Make `bin/` appear directly under `root`.
    ///
    /// A single top-level directory (`jdk-17.0.9+9/`) is hoisted, then a macOS
    /// bundle layout (`Contents/Home/`) is hoisted as well.
    pub fn normalize(root: &Path) -> ManagerResult<()> {
        hoist_single_directory(root)?;

        let bundle_home = root.join("Contents").join("Home");
        if !root.join("bin").exists() && bundle_home.join("bin").is_dir() {
            hoist_children(&bundle_home, root)?;
            let contents = root.join("Contents");
            std::fs::remove_dir_all(&contents).map_err(|source| ManagerError::Io {
                path: contents,
                source,
            })?;
        }
        Ok(())
    }

    fn hoist_single_directory(root: &Path) -> ManagerResult<bool> {
        let entries: Vec<_> = std::fs::read_dir(root)
            .map_err(|source| ManagerError::Io {
                path: root.to_path_buf(),
                source,
            })?
            .filter_map(Result::ok)
            .collect();

        let [only] = entries.as_slice() else {
            return Ok(false);
        };
        if !only.file_type().map(|t| t.is_dir()).unwrap_or(false) || only.file_name() == "bin" {
            return Ok(false);
        }

        // Rename first so a child sharing the directory's own name cannot collide.
        let parked = root.join(format!(".hoist-{}", Uuid::new_v4()));
        std::fs::rename(only.path(), &parked).map_err(|source| ManagerError::Io {
            path: parked.clone(),
            source,
        })?;
        hoist_children(&parked, root)?;
        std::fs::remove_dir_all(&parked).map_err(|source| ManagerError::Io {
            path: parked,
            source,
        })?;
        Ok(true)
    }

    fn hoist_children(from: &Path, to: &Path) -> ManagerResult<()> {
        let entries = std::fs::read_dir(from).map_err(|source| ManagerError::Io {
            path: from.to_path_buf(),
            source,
        })?;
        for entry in entries.filter_map(Result::ok) {
            let destination = to.join(entry.file_name());
            std::fs::rename(entry.path(), &destination).map_err(|source| ManagerError::Io {
                path: destination,
                source,
            })?;
        }
        Ok(())
    }
}
