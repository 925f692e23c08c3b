// ─── Console Bridge ───
// Pumps a child's output streams into its ConsoleLog and forwards operator
// commands to its stdin.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::core::error::{ManagerError, ManagerResult};

use super::log::ConsoleLog;

type CommandSink = Box<dyn AsyncWrite + Unpin + Send>;

/// Reader tasks of one attachment. Each finishes at end-of-stream.
#[derive(Debug)]
pub struct ReaderHandles {
    generation: u64,
    live: Arc<AtomicBool>,
    tasks: Vec<JoinHandle<()>>,
}

impl ReaderHandles {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// From now on a failing read is the normal end of the stream.
    pub fn mark_exited(&self) {
        self.live.store(false, Ordering::SeqCst);
    }

    /// Wait for every reader to reach end-of-stream, giving up after `limit`.
    ///
    /// One deadline covers all readers. Returns `false` when a reader was
    /// still running and had to be aborted.
    pub async fn join(self, limit: Duration) -> bool {
        let aborts: Vec<_> = self.tasks.iter().map(JoinHandle::abort_handle).collect();
        let finished = tokio::time::timeout(limit, join_all(self.tasks))
            .await
            .is_ok();
        if !finished {
            for task in aborts {
                task.abort();
            }
        }
        finished
    }
}

/// Connects one instance's process streams to its log.
pub struct ConsoleBridge {
    name: String,
    log: Arc<ConsoleLog>,
    sink: Mutex<Option<CommandSink>>,
    generation: AtomicU64,
}

impl std::fmt::Debug for ConsoleBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsoleBridge")
            .field("name", &self.name)
            .field("lines", &self.log.len())
            .finish_non_exhaustive()
    }
}

impl ConsoleBridge {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            log: Arc::new(ConsoleLog::new()),
            sink: Mutex::new(None),
            generation: AtomicU64::new(0),
        }
    }

    pub fn log(&self) -> &Arc<ConsoleLog> {
        &self.log
    }

    /// Attach to a freshly spawned process.
    ///
    /// Both output streams feed the same log, so stderr lines interleave with
    /// stdout in arrival order. Replaces any previous command sink.
    pub async fn attach<O, E, I>(&self, stdout: O, stderr: E, stdin: I) -> ReaderHandles
    where
        O: AsyncRead + Unpin + Send + 'static,
        E: AsyncRead + Unpin + Send + 'static,
        I: AsyncWrite + Unpin + Send + 'static,
    {
        let generation = {
            let mut sink = self.sink.lock().await;
            *sink = Some(Box::new(stdin));
            self.generation.fetch_add(1, Ordering::SeqCst) + 1
        };

        let live = Arc::new(AtomicBool::new(true));
        let tasks = vec![
            spawn_reader(self.reader("stdout", &live), stdout),
            spawn_reader(self.reader("stderr", &live), stderr),
        ];
        debug!("[{}] console attached (generation {})", self.name, generation);
        ReaderHandles {
            generation,
            live,
            tasks,
        }
    }

    fn reader(&self, stream_name: &'static str, live: &Arc<AtomicBool>) -> ReaderContext {
        ReaderContext {
            name: self.name.clone(),
            stream_name,
            log: self.log.clone(),
            live: live.clone(),
        }
    }

    /// Drop the command sink of attachment `generation`, closing the child's stdin.
    ///
    /// A later attachment is left untouched.
    pub async fn detach(&self, generation: u64) {
        let mut sink = self.sink.lock().await;
        if self.generation.load(Ordering::SeqCst) == generation && sink.take().is_some() {
            debug!("[{}] console detached (generation {})", self.name, generation);
        }
    }

    /// Send one command line to the process and echo it into the log.
    pub async fn send_command(&self, text: &str) -> ManagerResult<()> {
        let mut guard = self.sink.lock().await;
        let sink = guard
            .as_mut()
            .ok_or_else(|| ManagerError::NotRunning(self.name.clone()))?;

        let mut payload = String::with_capacity(text.len() + 1);
        payload.push_str(text);
        payload.push('\n');

        let written = async {
            sink.write_all(payload.as_bytes()).await?;
            sink.flush().await
        }
        .await;
        if let Err(e) = written {
            warn!("[{}] failed to write command {:?}: {}", self.name, text, e);
            return Err(ManagerError::Other(format!(
                "console write to {} failed: {e}",
                self.name
            )));
        }

        self.log.write(format!("> {text}"));
        Ok(())
    }

    pub fn write(&self, line: impl Into<String>) {
        self.log.write(line);
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.log.snapshot()
    }

    pub fn clear(&self) {
        self.log.clear();
    }
}

struct ReaderContext {
    name: String,
    stream_name: &'static str,
    log: Arc<ConsoleLog>,
    live: Arc<AtomicBool>,
}

fn spawn_reader<R>(ctx: ReaderContext, stream: R) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let ReaderContext {
        name,
        stream_name,
        log,
        live,
    } = ctx;
    tokio::spawn(async move {
        let mut reader = BufReader::new(stream);
        let mut raw = Vec::new();
        loop {
            raw.clear();
            match reader.read_until(b'\n', &mut raw).await {
                Ok(0) => break,
                Ok(_) => {
                    let text = String::from_utf8_lossy(&raw);
                    log.write(text.trim_end_matches(['\r', '\n']));
                }
                Err(e) if live.load(Ordering::SeqCst) => {
                    warn!("[{}][{}] read error: {}", name, stream_name, e);
                    log.write(format!("[ERROR] {stream_name} read failed: {e}"));
                    break;
                }
                Err(e) => {
                    debug!("[{}][{}] read ended after exit: {}", name, stream_name, e);
                    break;
                }
            }
        }
        debug!("[{}][{}] stream closed", name, stream_name);
    })
}

#[cfg(test)]
mod tests {
    use std::pin::Pin;
    use std::task::{Context, Poll, Waker};

    use tokio::io::{duplex, AsyncReadExt, ReadBuf};

    use super::*;

    #[tokio::test]
    async fn output_lines_are_captured_in_order() {
        let bridge = ConsoleBridge::new("alpha");
        let (mut process_out, bridge_out) = duplex(256);
        let (stdin, _process_in) = duplex(256);

        let readers = bridge.attach(bridge_out, tokio::io::empty(), stdin).await;
        process_out
            .write_all(b"Loading\r\n[12:00:01] Done\npartial")
            .await
            .unwrap();
        drop(process_out);

        assert!(readers.join(Duration::from_secs(5)).await);
        assert_eq!(
            bridge.snapshot(),
            ["Loading", "", "[12:00:01] Done", "partial"]
        );
    }

    #[tokio::test]
    async fn send_command_writes_line_and_echoes() {
        let bridge = ConsoleBridge::new("alpha");
        let (stdin, mut process_in) = duplex(256);
        let readers = bridge
            .attach(tokio::io::empty(), tokio::io::empty(), stdin)
            .await;

        bridge.send_command("list").await.unwrap();

        let mut received = [0u8; 5];
        process_in.read_exact(&mut received).await.unwrap();
        assert_eq!(&received, b"list\n");
        assert_eq!(bridge.snapshot().last().map(String::as_str), Some("> list"));

        readers.join(Duration::from_secs(5)).await;
    }

    #[tokio::test]
    async fn send_without_process_is_not_running() {
        let bridge = ConsoleBridge::new("idle");
        let err = bridge.send_command("say hi").await.unwrap_err();
        assert!(matches!(err, ManagerError::NotRunning(name) if name == "idle"));
        assert!(bridge.snapshot().is_empty());
    }

    #[tokio::test]
    async fn stale_detach_keeps_newer_attachment() {
        let bridge = ConsoleBridge::new("alpha");
        let (first_in, _a) = duplex(64);
        let first = bridge
            .attach(tokio::io::empty(), tokio::io::empty(), first_in)
            .await;
        let (second_in, mut second_process) = duplex(64);
        let second = bridge
            .attach(tokio::io::empty(), tokio::io::empty(), second_in)
            .await;

        bridge.detach(first.generation()).await;
        bridge.send_command("list").await.unwrap();
        let mut received = [0u8; 5];
        second_process.read_exact(&mut received).await.unwrap();
        assert_eq!(&received, b"list\n");

        bridge.detach(second.generation()).await;
        let err = bridge.send_command("list").await.unwrap_err();
        assert!(matches!(err, ManagerError::NotRunning(_)));
    }

    /// Silent until `fail` is called, then every read reports a broken pipe.
    #[derive(Clone, Default)]
    struct BreakableStream(Arc<std::sync::Mutex<(bool, Option<Waker>)>>);

    impl BreakableStream {
        fn fail(&self) {
            let mut inner = self.0.lock().unwrap();
            inner.0 = true;
            if let Some(waker) = inner.1.take() {
                waker.wake();
            }
        }
    }

    impl AsyncRead for BreakableStream {
        fn poll_read(
            self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            let mut inner = self.0.lock().unwrap();
            if inner.0 {
                return Poll::Ready(Err(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "pipe broke",
                )));
            }
            inner.1 = Some(cx.waker().clone());
            Poll::Pending
        }
    }

    #[tokio::test]
    async fn read_error_of_a_live_process_is_logged() {
        let bridge = ConsoleBridge::new("alpha");
        let stream = BreakableStream::default();
        let readers = bridge
            .attach(stream.clone(), tokio::io::empty(), tokio::io::sink())
            .await;

        stream.fail();
        assert!(readers.join(Duration::from_secs(5)).await);
        assert_eq!(
            bridge.snapshot().last().map(String::as_str),
            Some("[ERROR] stdout read failed: pipe broke")
        );
    }

    #[tokio::test]
    async fn read_error_after_exit_is_end_of_stream() {
        let bridge = ConsoleBridge::new("alpha");
        let stream = BreakableStream::default();
        let readers = bridge
            .attach(stream.clone(), tokio::io::empty(), tokio::io::sink())
            .await;

        readers.mark_exited();
        stream.fail();
        assert!(readers.join(Duration::from_secs(5)).await);
        assert!(bridge.snapshot().is_empty());
    }

    #[tokio::test]
    async fn join_gives_all_readers_one_deadline() {
        let bridge = ConsoleBridge::new("alpha");
        let readers = bridge
            .attach(
                BreakableStream::default(),
                BreakableStream::default(),
                tokio::io::sink(),
            )
            .await;

        let started = std::time::Instant::now();
        assert!(!readers.join(Duration::from_millis(500)).await);
        assert!(started.elapsed() < Duration::from_millis(900));
    }
}
