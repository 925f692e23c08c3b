#![allow(dead_code)]

use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use flate2::write::GzEncoder;
use flate2::Compression;
use servermanager::core::error::{ManagerError, ManagerResult};
use servermanager::core::instance::{agreement, InstanceConfig, InstanceState, InstanceStore};
use servermanager::core::launch::{LaunchCommand, LaunchContext, LaunchPreparer, ServerInstance};
use sha1::{Digest, Sha1};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

// ── HTTP fixture ────────────────────────────────────

#[derive(Clone)]
enum Reply {
    Body(Vec<u8>),
    /// Headers and the first half of the body, then silence.
    Stall(Vec<u8>),
}

#[derive(Default)]
struct Routes {
    replies: HashMap<String, Reply>,
    /// Status and remaining count of failures served before the reply.
    failures: HashMap<String, (u16, usize)>,
    hits: HashMap<String, usize>,
}

/// Minimal HTTP/1.1 server with canned bodies and per-path hit counts.
pub struct HttpFixture {
    base: String,
    routes: Arc<Mutex<Routes>>,
    task: JoinHandle<()>,
}

impl HttpFixture {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let routes: Arc<Mutex<Routes>> = Arc::default();

        let task_routes = routes.clone();
        let task = tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                let routes = task_routes.clone();
                tokio::spawn(async move {
                    let mut request = Vec::new();
                    let mut buf = [0u8; 1024];
                    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                        match socket.read(&mut buf).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => request.extend_from_slice(&buf[..n]),
                        }
                    }
                    let head = String::from_utf8_lossy(&request);
                    let path = head
                        .split_whitespace()
                        .nth(1)
                        .unwrap_or("/")
                        .to_string();

                    let (failure, reply) = {
                        let mut routes = routes.lock().unwrap();
                        *routes.hits.entry(path.clone()).or_default() += 1;
                        let failure = match routes.failures.get_mut(&path) {
                            Some((status, remaining)) if *remaining > 0 => {
                                *remaining -= 1;
                                Some(*status)
                            }
                            _ => None,
                        };
                        (failure, routes.replies.get(&path).cloned())
                    };
                    // Let concurrent callers pile up on the same request.
                    tokio::time::sleep(Duration::from_millis(50)).await;

                    let (status, body, stall) = match (failure, reply) {
                        (Some(status), _) => (status, b"try again".to_vec(), false),
                        (None, Some(Reply::Body(body))) => (200, body, false),
                        (None, Some(Reply::Stall(body))) => (200, body, true),
                        (None, None) => (404, b"not found".to_vec(), false),
                    };
                    let header = format!(
                        "HTTP/1.1 {status} Fixture\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                        body.len()
                    );
                    let _ = socket.write_all(header.as_bytes()).await;
                    if stall {
                        let _ = socket.write_all(&body[..body.len() / 2]).await;
                        let _ = socket.flush().await;
                        tokio::time::sleep(Duration::from_secs(3600)).await;
                    }
                    let _ = socket.write_all(&body).await;
                    let _ = socket.shutdown().await;
                });
            }
        });

        Self { base, routes, task }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    pub fn route(&self, path: &str, body: impl Into<Vec<u8>>) {
        self.routes
            .lock()
            .unwrap()
            .replies
            .insert(path.to_string(), Reply::Body(body.into()));
    }

    /// Serve half of `body`, then never finish.
    pub fn route_stalling(&self, path: &str, body: impl Into<Vec<u8>>) {
        self.routes
            .lock()
            .unwrap()
            .replies
            .insert(path.to_string(), Reply::Stall(body.into()));
    }

    /// Answer the next `times` requests for `path` with `status`.
    pub fn fail_next(&self, path: &str, status: u16, times: usize) {
        self.routes
            .lock()
            .unwrap()
            .failures
            .insert(path.to_string(), (status, times));
    }

    pub fn hits(&self, path: &str) -> usize {
        self.routes
            .lock()
            .unwrap()
            .hits
            .get(path)
            .copied()
            .unwrap_or(0)
    }
}

impl Drop for HttpFixture {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// ── Archives ────────────────────────────────────────

pub fn tar_gz(files: &[(&str, &[u8])]) -> Vec<u8> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for (path, data) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o755);
        builder.append_data(&mut header, path, *data).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}

pub fn zip(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default();
    for (path, data) in files {
        writer.start_file(*path, options).unwrap();
        writer.write_all(data).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

/// Archive in whatever format this host downloads runtimes in.
pub fn host_archive(files: &[(&str, &[u8])]) -> Vec<u8> {
    if cfg!(windows) {
        zip(files)
    } else {
        tar_gz(files)
    }
}

/// Archive whose only entry escapes the extraction root via `../evil.txt`.
pub fn traversal_archive() -> Vec<u8> {
    if cfg!(windows) {
        return zip(&[("../evil.txt", b"pwned")]);
    }
    // `tar::Builder` refuses `..`, so the name goes straight into the header.
    let name = b"../evil.txt";
    let data = b"pwned";
    let mut header = tar::Header::new_old();
    header.as_old_mut().name[..name.len()].copy_from_slice(name);
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_entry_type(tar::EntryType::Regular);
    header.set_cksum();

    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.append(&header, &data[..]).unwrap();
    builder.into_inner().unwrap().finish().unwrap()
}

pub fn sha1_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

// ── Instances ───────────────────────────────────────

/// Create an instance dir with the agreement accepted and a version configured.
pub async fn prepared_instance_dir(root: &Path, name: &str) -> std::path::PathBuf {
    let dir = root.join(name);
    InstanceStore::save_config(
        &dir,
        &InstanceConfig {
            version: Some("1.20.4".into()),
            ..InstanceConfig::default()
        },
    )
    .await
    .unwrap();
    agreement::accept(&dir).await.unwrap();
    dir
}

/// Launches `sh -c <script>` in place of a real server.
pub struct ScriptPreparer {
    pub script: String,
}

impl ScriptPreparer {
    pub fn new(script: &str) -> Arc<Self> {
        Arc::new(Self {
            script: script.to_string(),
        })
    }
}

#[async_trait]
impl LaunchPreparer for ScriptPreparer {
    async fn prepare(&self, ctx: &LaunchContext<'_>) -> ManagerResult<LaunchCommand> {
        Ok(LaunchCommand::new(
            "/bin/sh",
            vec!["-c".to_string(), self.script.clone()],
            ctx.instance_dir,
        ))
    }
}

/// Takes `delay` to prepare, like a first start that downloads a runtime.
pub struct SlowPreparer {
    pub delay: Duration,
    pub script: String,
}

impl SlowPreparer {
    pub fn new(delay: Duration, script: &str) -> Arc<Self> {
        Arc::new(Self {
            delay,
            script: script.to_string(),
        })
    }
}

#[async_trait]
impl LaunchPreparer for SlowPreparer {
    async fn prepare(&self, ctx: &LaunchContext<'_>) -> ManagerResult<LaunchCommand> {
        tokio::time::sleep(self.delay).await;
        Ok(LaunchCommand::new(
            "/bin/sh",
            vec!["-c".to_string(), self.script.clone()],
            ctx.instance_dir,
        ))
    }
}

/// Fails the way a provisioning step would.
pub struct FailingPreparer;

#[async_trait]
impl LaunchPreparer for FailingPreparer {
    async fn prepare(&self, _ctx: &LaunchContext<'_>) -> ManagerResult<LaunchCommand> {
        Err(ManagerError::catalog_unavailable(ManagerError::Other(
            "offline".into(),
        )))
    }
}

/// Exits cleanly on `stop`, echoes everything else.
pub const GRACEFUL_SERVER: &str = r#"echo '[12:00:01] Done'
while read -r line; do
  if [ "$line" = stop ]; then echo 'Stopping server'; exit 0; fi
  echo "got $line"
done"#;

/// Ignores the shutdown command; dies on SIGTERM.
pub const DEAF_SERVER: &str = r#"while read -r line; do :; done"#;

/// Ignores the shutdown command and SIGTERM.
pub const STUBBORN_SERVER: &str = r#"trap '' TERM
while read -r line; do :; done"#;

/// Like [`STUBBORN_SERVER`], plus a background child that holds the output
/// pipe open; its pid lands in `grandchild.pid`.
pub const FORKING_SERVER: &str = r#"trap '' TERM
sleep 60 &
echo $! > grandchild.pid
while read -r line; do :; done"#;

pub async fn wait_for_state(
    instance: &ServerInstance,
    want: InstanceState,
    limit: Duration,
) -> bool {
    let mut rx = instance.subscribe_state();
    matches!(
        tokio::time::timeout(limit, rx.wait_for(|state| *state == want)).await,
        Ok(Ok(_))
    )
}
