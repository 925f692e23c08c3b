// ─── Process Controller ───
// Owns the OS process of one server instance.
//
//   Stopped ──start──▶ Starting ──spawned──▶ Running
//      ▲                  │                     │
//      └──── failed ──────┘◀── exited / stop ───┘
//
// One supervisor task per run owns the `Child`: it waits for exit, serves the
// kill request of the last escalation tier and drains the reader tasks. The
// child leads its own process group; signals go to the whole group.
// Lifecycle operations are serialized on `lifecycle`; exit transitions carry
// the run id so a late supervisor can never stop a newer run.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::process::Child;
use tokio::sync::{oneshot, watch, MutexGuard};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::core::console::{ConsoleBridge, ReaderHandles};
use crate::core::error::{ManagerError, ManagerResult};
use crate::core::instance::{agreement, InstanceState, InstanceStore};

use super::preparer::{LaunchContext, LaunchPreparer};

/// Text the server understands as "shut down cleanly".
pub const SHUTDOWN_COMMAND: &str = "stop";

/// Upper bound for draining output after the process is gone.
const READER_DRAIN_LIMIT: Duration = Duration::from_secs(2);

/// Escalation timings for `stop()` and the pause inside `restart()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownPolicy {
    /// Wait after the shutdown command before a terminate signal.
    pub grace: Duration,
    /// Wait after the terminate signal before a kill.
    pub terminate: Duration,
    /// Pause between stop and start in `restart()`.
    pub restart_delay: Duration,
    /// Wait for the kill to be reaped.
    pub kill_wait: Duration,
}

impl Default for ShutdownPolicy {
    fn default() -> Self {
        Self {
            grace: Duration::from_secs(10),
            terminate: Duration::from_secs(5),
            restart_delay: Duration::from_secs(5),
            kill_wait: Duration::from_secs(5),
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    pub code: Option<i32>,
}

struct RunningProcess {
    run_id: Uuid,
    pid: Option<u32>,
    kill_tx: Option<oneshot::Sender<()>>,
    exit_rx: watch::Receiver<Option<ProcessExit>>,
}

/// Observable state plus the id of the run it belongs to.
#[derive(Debug)]
struct StateCell {
    tx: watch::Sender<InstanceState>,
    run: Mutex<Option<Uuid>>,
}

impl StateCell {
    fn new() -> Self {
        let (tx, _) = watch::channel(InstanceState::Stopped);
        Self {
            tx,
            run: Mutex::new(None),
        }
    }

    fn current(&self) -> InstanceState {
        *self.tx.borrow()
    }

    fn begin(&self, run_id: Uuid) {
        let mut run = self.run.lock().unwrap_or_else(PoisonError::into_inner);
        *run = Some(run_id);
        self.tx.send_replace(InstanceState::Starting);
    }

    /// `false` when the run already ended before it could be marked running.
    fn mark_running(&self, run_id: Uuid) -> bool {
        let run = self.run.lock().unwrap_or_else(PoisonError::into_inner);
        if *run != Some(run_id) {
            return false;
        }
        self.tx.send_replace(InstanceState::Running);
        true
    }

    /// `false` when `run_id` is not the current run.
    fn finish(&self, run_id: Uuid) -> bool {
        let mut run = self.run.lock().unwrap_or_else(PoisonError::into_inner);
        if *run != Some(run_id) {
            return false;
        }
        *run = None;
        self.tx.send_replace(InstanceState::Stopped);
        true
    }
}

/// One server instance and the lifecycle of its process.
pub struct ServerInstance {
    name: String,
    dir: PathBuf,
    policy: ShutdownPolicy,
    preparer: Arc<dyn LaunchPreparer>,
    console: Arc<ConsoleBridge>,
    state: Arc<StateCell>,
    lifecycle: tokio::sync::Mutex<Option<RunningProcess>>,
}

impl std::fmt::Debug for ServerInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerInstance")
            .field("name", &self.name)
            .field("dir", &self.dir)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl ServerInstance {
    pub fn new(
        name: impl Into<String>,
        dir: PathBuf,
        preparer: Arc<dyn LaunchPreparer>,
        policy: ShutdownPolicy,
    ) -> Self {
        let name = name.into();
        Self {
            console: Arc::new(ConsoleBridge::new(name.clone())),
            name,
            dir,
            policy,
            preparer,
            state: Arc::new(StateCell::new()),
            lifecycle: tokio::sync::Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn console(&self) -> &Arc<ConsoleBridge> {
        &self.console
    }

    pub fn state(&self) -> InstanceState {
        self.state.current()
    }

    /// Receiver that sees every state transition.
    pub fn subscribe_state(&self) -> watch::Receiver<InstanceState> {
        self.state.tx.subscribe()
    }

    pub async fn start(&self) -> ManagerResult<()> {
        let mut slot = self.lock_idle().await?;

        if self.state() != InstanceState::Stopped {
            return Err(ManagerError::AlreadyRunning(self.name.clone()));
        }
        if !agreement::is_accepted(&self.dir).await {
            return Err(ManagerError::AgreementNotAccepted(self.name.clone()));
        }
        let config = InstanceStore::load_config(&self.dir).await?;
        if config.selected_version().is_none() {
            return Err(ManagerError::Configuration(format!(
                "no version selected for {}",
                self.name
            )));
        }

        let run_id = Uuid::new_v4();
        self.state.begin(run_id);
        info!("Starting server {}", self.name);

        let ctx = LaunchContext {
            name: &self.name,
            instance_dir: &self.dir,
            config: &config,
        };
        match self.launch(run_id, &ctx).await {
            Ok(running) => {
                *slot = Some(running);
                if self.state.mark_running(run_id) {
                    info!("Server {} is running", self.name);
                } else {
                    info!("Server {} exited right after spawn", self.name);
                }
                Ok(())
            }
            Err(source) => {
                self.state.finish(run_id);
                error!("Server {} failed to start: {}", self.name, source);
                Err(ManagerError::start_failed(self.name.clone(), source))
            }
        }
    }

    /// The lifecycle lock, or `AlreadyRunning` as soon as another run is seen.
    ///
    /// A start racing a slow start fails at once instead of queueing behind
    /// its provisioning.
    async fn lock_idle(&self) -> ManagerResult<MutexGuard<'_, Option<RunningProcess>>> {
        let mut state = self.subscribe_state();
        tokio::select! {
            biased;
            slot = self.lifecycle.lock() => Ok(slot),
            _ = state.wait_for(|state| *state != InstanceState::Stopped) => {
                Err(ManagerError::AlreadyRunning(self.name.clone()))
            }
        }
    }

    async fn launch(&self, run_id: Uuid, ctx: &LaunchContext<'_>) -> ManagerResult<RunningProcess> {
        let command = self.preparer.prepare(ctx).await?;
        let mut child = command.spawn()?;
        let pid = child.id();

        let (Some(stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            return Err(ManagerError::Other(format!(
                "standard streams of {} were not captured",
                self.name
            )));
        };
        let readers = self.console.attach(stdout, stderr, stdin).await;

        let (kill_tx, kill_rx) = oneshot::channel();
        let (exit_tx, exit_rx) = watch::channel(None);
        tokio::spawn(supervise(Supervisor {
            name: self.name.clone(),
            run_id,
            pid,
            child,
            readers,
            kill_rx,
            exit_tx,
            console: self.console.clone(),
            state: self.state.clone(),
        }));

        Ok(RunningProcess {
            run_id,
            pid,
            kill_tx: Some(kill_tx),
            exit_rx,
        })
    }

    /// Stop the process, escalating from the shutdown command to terminate to kill.
    ///
    /// A no-op when already stopped. Always ends in `Stopped`.
    pub async fn stop(&self) -> ManagerResult<()> {
        let mut slot = self.lifecycle.lock().await;
        let Some(mut running) = slot.take() else {
            return Ok(());
        };
        if self.state() == InstanceState::Stopped {
            return Ok(());
        }

        info!("Stopping server {}", self.name);
        let sent = tokio::time::timeout(
            self.policy.grace,
            self.console.send_command(SHUTDOWN_COMMAND),
        )
        .await;
        match sent {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Could not send shutdown command to {}: {}", self.name, e),
            Err(_) => warn!("Shutdown command to {} blocked on a full stdin", self.name),
        }

        if wait_for_exit(&mut running.exit_rx, self.policy.grace).await.is_none() {
            warn!(
                "Server {} still alive after {:?}; sending terminate signal",
                self.name, self.policy.grace
            );
            request_terminate(&self.name, running.pid).await;

            if wait_for_exit(&mut running.exit_rx, self.policy.terminate)
                .await
                .is_none()
            {
                warn!(
                    "Server {} still alive after {:?}; killing",
                    self.name, self.policy.terminate
                );
                if let Some(kill_tx) = running.kill_tx.take() {
                    let _ = kill_tx.send(());
                }
                if wait_for_exit(&mut running.exit_rx, self.policy.kill_wait)
                    .await
                    .is_none()
                {
                    error!("Server {} did not exit after kill", self.name);
                }
            }
        }

        self.state.finish(running.run_id);
        info!("Server {} stopped", self.name);
        Ok(())
    }

    /// Stop, wait the restart delay unconditionally, then start.
    pub async fn restart(&self) -> ManagerResult<()> {
        self.stop().await?;
        tokio::time::sleep(self.policy.restart_delay).await;
        self.start().await
    }

    pub async fn send_command(&self, text: &str) -> ManagerResult<()> {
        if self.state() != InstanceState::Running {
            return Err(ManagerError::NotRunning(self.name.clone()));
        }
        self.console.send_command(text).await
    }
}

/// `Some` once the run has exited, `None` if `limit` passed first.
async fn wait_for_exit(
    exit_rx: &mut watch::Receiver<Option<ProcessExit>>,
    limit: Duration,
) -> Option<ProcessExit> {
    match tokio::time::timeout(limit, exit_rx.wait_for(Option::is_some)).await {
        Ok(Ok(exit)) => *exit,
        // Supervisor gone without publishing: the child is gone with it.
        Ok(Err(_)) => Some(ProcessExit { code: None }),
        Err(_) => None,
    }
}

#[cfg(unix)]
fn signal_group(name: &str, pid: Option<u32>, signal: nix::sys::signal::Signal) {
    use nix::errno::Errno;
    use nix::sys::signal::killpg;
    use nix::unistd::Pid;

    let Some(pgid) = pid.and_then(|pid| i32::try_from(pid).ok()) else {
        return;
    };
    match killpg(Pid::from_raw(pgid), signal) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => warn!("{:?} to {} (group {}) failed: {}", signal, name, pgid, e),
    }
}

#[cfg(unix)]
async fn request_terminate(name: &str, pid: Option<u32>) {
    signal_group(name, pid, nix::sys::signal::Signal::SIGTERM);
}

#[cfg(unix)]
async fn kill_tree(name: &str, pid: Option<u32>) {
    signal_group(name, pid, nix::sys::signal::Signal::SIGKILL);
}

#[cfg(windows)]
async fn request_terminate(name: &str, pid: Option<u32>) {
    taskkill(name, pid, false).await;
}

#[cfg(windows)]
async fn kill_tree(name: &str, pid: Option<u32>) {
    taskkill(name, pid, true).await;
}

#[cfg(windows)]
async fn taskkill(name: &str, pid: Option<u32>, force: bool) {
    let Some(pid) = pid else {
        return;
    };
    let pid = pid.to_string();
    let mut args = vec!["/PID", pid.as_str(), "/T"];
    if force {
        args.push("/F");
    }
    let status = tokio::process::Command::new("taskkill")
        .args(&args)
        .status()
        .await;
    match status {
        Ok(status) if status.success() => {}
        Ok(status) => warn!("taskkill for {} (pid {}) returned {:?}", name, pid, status.code()),
        Err(e) => warn!("taskkill for {} (pid {}) failed: {}", name, pid, e),
    }
}

struct Supervisor {
    name: String,
    run_id: Uuid,
    pid: Option<u32>,
    child: Child,
    readers: ReaderHandles,
    kill_rx: oneshot::Receiver<()>,
    exit_tx: watch::Sender<Option<ProcessExit>>,
    console: Arc<ConsoleBridge>,
    state: Arc<StateCell>,
}

async fn supervise(sup: Supervisor) {
    let Supervisor {
        name,
        run_id,
        pid,
        mut child,
        readers,
        mut kill_rx,
        exit_tx,
        console,
        state,
    } = sup;

    let status = tokio::select! {
        status = child.wait() => status,
        Ok(()) = &mut kill_rx => {
            kill_tree(&name, pid).await;
            if let Err(e) = child.start_kill() {
                warn!("Kill of {} failed: {}", name, e);
            }
            child.wait().await
        }
    };
    readers.mark_exited();
    let code = match status {
        Ok(status) => status.code(),
        Err(e) => {
            warn!("Waiting on {} failed: {}", name, e);
            None
        }
    };

    // Whatever the server left behind in its group would hold the output pipes open.
    #[cfg(unix)]
    kill_tree(&name, pid).await;

    let generation = readers.generation();
    if !readers.join(READER_DRAIN_LIMIT).await {
        warn!("Output of {} still open after exit; stopped reading", name);
    }
    console.detach(generation).await;

    exit_tx.send_replace(Some(ProcessExit { code }));
    if state.finish(run_id) {
        info!("Server {} exited on its own (code {:?})", name, code);
    }
}
