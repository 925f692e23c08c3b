// ─── Console Log ───
// Append-only line buffer shared by the reader tasks, the command echo and
// any number of observers.

use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};

use regex::Regex;
use tokio::sync::watch;

/// Lines appended since some offset, plus the offset to ask for next.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogChunk {
    pub lines: Vec<String>,
    pub next: u64,
}

#[derive(Debug, Default)]
struct Buffer {
    lines: Vec<String>,
    /// Absolute offset of `lines[0]`; advanced by `clear()`.
    base: u64,
}

impl Buffer {
    fn end(&self) -> u64 {
        self.base + self.lines.len() as u64
    }
}

/// Ordered, append-only console output of one instance.
///
/// Offsets are absolute: a line keeps its offset across `clear()`, so a
/// follower never re-reads or skips lines because of an operator clear.
#[derive(Debug)]
pub struct ConsoleLog {
    buffer: Mutex<Buffer>,
    next_tx: watch::Sender<u64>,
}

impl Default for ConsoleLog {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsoleLog {
    pub fn new() -> Self {
        let (next_tx, _) = watch::channel(0);
        Self {
            buffer: Mutex::new(Buffer::default()),
            next_tx,
        }
    }

    fn buffer(&self) -> MutexGuard<'_, Buffer> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append one line. Bracketed lines (`[12:00:01] ...`) get a blank line first.
    pub fn write(&self, line: impl Into<String>) {
        let line = line.into();
        let mut buffer = self.buffer();
        if starts_with_bracket_tag(&line) {
            buffer.lines.push(String::new());
        }
        buffer.lines.push(line);
        // Published under the lock so observers never see the offset go back.
        self.next_tx.send_replace(buffer.end());
    }

    /// Independent copy of the retained lines.
    pub fn snapshot(&self) -> Vec<String> {
        self.buffer().lines.clone()
    }

    pub fn len(&self) -> usize {
        self.buffer().lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer().lines.is_empty()
    }

    /// Drop every retained line. Offsets keep counting from where they were.
    pub fn clear(&self) {
        let mut buffer = self.buffer();
        buffer.base = buffer.end();
        buffer.lines.clear();
    }

    /// Lines at or after `offset`. Offsets before a `clear()` yield only what is retained.
    pub fn lines_since(&self, offset: u64) -> LogChunk {
        let buffer = self.buffer();
        let end = buffer.end();
        let start = offset.clamp(buffer.base, end);
        let from = (start - buffer.base) as usize;
        LogChunk {
            lines: buffer.lines[from..].to_vec(),
            next: end,
        }
    }

    /// Receiver of the next offset; changes whenever lines are appended.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.next_tx.subscribe()
    }
}

fn starts_with_bracket_tag(line: &str) -> bool {
    static BRACKETED: OnceLock<Regex> = OnceLock::new();
    BRACKETED
        .get_or_init(|| Regex::new(r"^\[.*?\].*").expect("static regex"))
        .is_match(line)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bracketed_line_gets_blank_line_before_it() {
        let log = ConsoleLog::new();
        log.write("Starting");
        log.write("[12:00:01] Done");
        assert_eq!(log.snapshot(), ["Starting", "", "[12:00:01] Done"]);
    }

    #[test]
    fn snapshot_is_independent_of_live_log() {
        let log = ConsoleLog::new();
        log.write("a");
        let mut copy = log.snapshot();
        copy.push("mutated".into());
        copy[0].push('!');
        assert_eq!(log.snapshot(), ["a"]);
    }

    #[test]
    fn offsets_survive_clear() {
        let log = ConsoleLog::new();
        log.write("one");
        log.write("two");
        let first = log.lines_since(0);
        assert_eq!(first.lines, ["one", "two"]);
        assert_eq!(first.next, 2);

        log.clear();
        assert!(log.is_empty());
        log.write("three");

        let second = log.lines_since(first.next);
        assert_eq!(second.lines, ["three"]);
        assert_eq!(second.next, 3);
        // A stale offset from before the clear only sees retained lines.
        assert_eq!(log.lines_since(0).lines, ["three"]);
    }

    #[test]
    fn offset_past_end_is_empty() {
        let log = ConsoleLog::new();
        log.write("x");
        let chunk = log.lines_since(10);
        assert!(chunk.lines.is_empty());
        assert_eq!(chunk.next, 1);
    }

    #[tokio::test]
    async fn subscribers_observe_appends() {
        let log = ConsoleLog::new();
        let mut rx = log.subscribe();
        log.write("[00:00] hello");
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), 2);
    }
}
