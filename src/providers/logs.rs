//! Diagnostic log capture for provider stderr.
//!
//! Every running provider gets two tasks:
//! - a drain task that reads stderr line by line until EOF, so the pipe can
//!   never fill up and stall the provider's stdout;
//! - a buffer task that owns the provider's [`LogBuffer`] and answers snapshot
//!   queries.
//!
//! Lines flow drain → buffer over a channel; readers query the buffer task
//! through a [`LogHandle`].

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Default number of stderr lines retained per provider.
pub const DEFAULT_LOG_CAPACITY: usize = 100;

/// Keywords (lowercase) that mark a line as an error.
const ERROR_MARKERS: &[&str] = &["error", "failed", "exception", "traceback"];

/// Keywords (lowercase) that mark a line as a warning.
const WARNING_MARKERS: &[&str] = &["warning", "warn"];

// ─── Entries ─────────────────────────────────────────────────────────────────

/// Severity guessed from a stderr line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

impl LogLevel {
    /// Case-insensitive keyword classification. Error markers win over
    /// warning markers.
    pub fn classify(line: &str) -> Self {
        let lower = line.to_lowercase();
        if ERROR_MARKERS.iter().any(|m| lower.contains(m)) {
            Self::Error
        } else if WARNING_MARKERS.iter().any(|m| lower.contains(m)) {
            Self::Warning
        } else {
            Self::Info
        }
    }
}

/// A single captured stderr line.
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub line: String,
}

impl LogEntry {
    pub fn new(line: String) -> Self {
        Self {
            timestamp: Utc::now(),
            level: LogLevel::classify(&line),
            line,
        }
    }

    /// Echo the line into the host log at its classified level.
    fn emit(&self, provider: &str) {
        match self.level {
            LogLevel::Error => tracing::error!(provider, line = %self.line, "provider stderr"),
            LogLevel::Warning => tracing::warn!(provider, line = %self.line, "provider stderr"),
            LogLevel::Info => tracing::debug!(provider, line = %self.line, "provider stderr"),
        }
    }
}

// ─── LogBuffer ───────────────────────────────────────────────────────────────

/// Ring buffer of the most recent stderr lines, oldest first.
#[derive(Debug)]
pub struct LogBuffer {
    entries: VecDeque<LogEntry>,
    capacity: usize,
}

impl LogBuffer {
    /// Create a buffer holding at most `capacity` entries (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append an entry, evicting the oldest if at capacity.
    pub fn push(&mut self, entry: LogEntry) {
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// All entries, oldest first.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.iter().cloned().collect()
    }

    /// The newest `n` entries, oldest first.
    pub fn tail(&self, n: usize) -> Vec<LogEntry> {
        let skip = self.entries.len().saturating_sub(n);
        self.entries.iter().skip(skip).cloned().collect()
    }
}

// ─── Monitor ─────────────────────────────────────────────────────────────────

struct LogQuery {
    tail: Option<usize>,
    reply: oneshot::Sender<Vec<LogEntry>>,
}

/// Cloneable read access to one provider's log buffer.
#[derive(Debug, Clone)]
pub struct LogHandle {
    queries: mpsc::Sender<LogQuery>,
}

impl LogHandle {
    /// Snapshot of the buffer; `tail` limits it to the newest entries.
    ///
    /// Returns an empty list once the monitor has been stopped.
    pub async fn snapshot(&self, tail: Option<usize>) -> Vec<LogEntry> {
        let (reply, rx) = oneshot::channel();
        if self.queries.send(LogQuery { tail, reply }).await.is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    /// The newest `n` lines as plain text.
    pub async fn recent_lines(&self, n: usize) -> Vec<String> {
        if n == 0 {
            return Vec::new();
        }
        self.snapshot(Some(n))
            .await
            .into_iter()
            .map(|entry| entry.line)
            .collect()
    }
}

/// Owner of a provider's drain and buffer tasks. Dropping it stops both.
pub struct LogMonitor {
    handle: LogHandle,
    drain: JoinHandle<()>,
    buffer: JoinHandle<()>,
}

impl LogMonitor {
    /// Start draining `stream` into a fresh buffer of `capacity` lines.
    pub fn spawn<R>(provider: &str, stream: R, capacity: usize) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let (entry_tx, entry_rx) = mpsc::unbounded_channel();
        let (query_tx, query_rx) = mpsc::channel(16);

        let drain = tokio::spawn(drain_lines(provider.to_string(), stream, entry_tx));
        let buffer = tokio::spawn(own_buffer(LogBuffer::new(capacity), entry_rx, query_rx));

        Self {
            handle: LogHandle { queries: query_tx },
            drain,
            buffer,
        }
    }

    pub fn handle(&self) -> LogHandle {
        self.handle.clone()
    }

    /// Stop both tasks and discard the buffer.
    pub fn stop(&self) {
        self.drain.abort();
        self.buffer.abort();
    }
}

impl Drop for LogMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Read lines until EOF and forward them to the buffer task.
async fn drain_lines<R>(provider: String, stream: R, entries: mpsc::UnboundedSender<LogEntry>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf)
                    .trim_end_matches(|c| c == '\n' || c == '\r')
                    .to_string();
                let entry = LogEntry::new(line);
                entry.emit(&provider);
                if entries.send(entry).is_err() {
                    break;
                }
            }
            Err(e) => {
                tracing::warn!(provider = %provider, error = %e, "failed to read provider stderr");
                break;
            }
        }
    }

    tracing::debug!(provider = %provider, "provider stderr closed");
}

/// Own the buffer: absorb entries, answer snapshot queries.
///
/// Runs until every [`LogHandle`] is gone. Pending entries are absorbed
/// before a query is answered.
async fn own_buffer(
    mut buffer: LogBuffer,
    mut entries: mpsc::UnboundedReceiver<LogEntry>,
    mut queries: mpsc::Receiver<LogQuery>,
) {
    loop {
        tokio::select! {
            biased;
            Some(entry) = entries.recv() => buffer.push(entry),
            query = queries.recv() => match query {
                Some(LogQuery { tail, reply }) => {
                    let snapshot = match tail {
                        Some(n) => buffer.tail(n),
                        None => buffer.entries(),
                    };
                    let _ = reply.send(snapshot);
                }
                None => break,
            },
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
