// ─── Launch Task ───
// Builds the server invocation and spawns it as a child process.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::{Child, Command};
use tracing::{debug, info};

use crate::core::downloader::ARTIFACT_FILE_NAME;
use crate::core::error::{ManagerError, ManagerResult};
use crate::core::instance::InstanceConfig;

/// Everything needed to spawn one server process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
}

impl LaunchCommand {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args,
            working_dir: working_dir.into(),
        }
    }

    /// `<java> [-Xmx<N>M] [jvm_args..] -jar server.jar nogui`, run inside the instance dir.
    pub fn server(java: PathBuf, instance_dir: &Path, config: &InstanceConfig) -> Self {
        let mut args = Vec::new();
        if let Some(mb) = config.max_memory_mb.filter(|mb| *mb > 0) {
            args.push(format!("-Xmx{mb}M"));
        }
        args.extend(
            config
                .jvm_args
                .iter()
                .filter(|arg| !arg.trim().is_empty())
                .cloned(),
        );
        args.push("-jar".to_string());
        args.push(ARTIFACT_FILE_NAME.to_string());
        args.push("nogui".to_string());

        Self::new(java, args, instance_dir)
    }

    /// Spawn with all three standard streams piped.
    pub fn spawn(&self) -> ManagerResult<Child> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .current_dir(&self.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        configure_platform_spawn(&mut cmd);

        info!("Launching {:?} in {:?}", self.program, self.working_dir);
        debug!("Command (copy/paste): {}", self.format_for_logs());

        cmd.spawn().map_err(|source| ManagerError::Io {
            path: self.program.clone(),
            source,
        })
    }

    pub fn format_for_logs(&self) -> String {
        let program = shell_escape(&self.program.to_string_lossy());
        let args = self
            .args
            .iter()
            .map(|arg| shell_escape(arg))
            .collect::<Vec<_>>()
            .join(" ");

        if args.is_empty() {
            program
        } else {
            format!("{} {}", program, args)
        }
    }
}

fn configure_platform_spawn(cmd: &mut Command) {
    // Own process group: a terminal Ctrl-C reaches only the manager.
    #[cfg(unix)]
    cmd.process_group(0);

    #[cfg(windows)]
    {
        const CREATE_NO_WINDOW: u32 = 0x0800_0000;
        cmd.creation_flags(CREATE_NO_WINDOW);
    }
}

fn shell_escape(raw: &str) -> String {
    if raw.is_empty() {
        return "\"\"".to_string();
    }

    if raw.chars().all(|ch| {
        ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.' | '/' | ':' | '\\' | '=' | '+')
    }) {
        return raw.to_string();
    }

    format!("\"{}\"", raw.replace('"', "\\\""))
}
