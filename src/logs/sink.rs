//! Downstream log sinks.
//!
//! Every sink writes a batch as newline-delimited records, exactly as the
//! agent sent them.

use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::LogRecord;
use crate::config::SinkKind;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("sink rejected batch: {0}")]
    Rejected(String),
}

/// Append-only destination for one kind of log
#[async_trait]
pub trait LogSink: Send + Sync {
    /// Short name for diagnostics
    fn name(&self) -> &str;

    /// Write the whole batch, in order
    async fn write_batch(&self, host: &str, records: &[LogRecord]) -> Result<(), SinkError>;
}

/// Build the sink described by configuration
pub fn from_kind(kind: &SinkKind) -> Arc<dyn LogSink> {
    match kind {
        SinkKind::Filesystem { path } => Arc::new(FilesystemSink::new(path)),
        SinkKind::Stdout => Arc::new(StdoutSink::new()),
        SinkKind::Discard => Arc::new(DiscardSink),
    }
}

fn render(records: &[LogRecord]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(records.iter().map(|r| r.get().len() + 1).sum());
    for record in records {
        buf.extend_from_slice(record.get().as_bytes());
        buf.push(b'\n');
    }
    buf
}

/// Appends to a file, opened on first use.
///
/// A failed write drops the handle so the next batch reopens the path,
/// which also picks up external log rotation. A batch that fails or is
/// cancelled part way is cut back off the file before the next one lands,
/// so a retried batch is never torn or doubled.
pub struct FilesystemSink {
    path: PathBuf,
    state: Mutex<FileState>,
}

#[derive(Default)]
struct FileState {
    file: Option<File>,
    /// File length before the batch in flight; set until that batch is flushed
    rollback_to: Option<u64>,
}

impl FilesystemSink {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            state: Mutex::new(FileState::default()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn open(&self) -> io::Result<File> {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
    }
}

async fn append(file: &mut File, rollback_to: &mut Option<u64>, buf: &[u8]) -> io::Result<()> {
    if let Some(len) = *rollback_to {
        // Let queued writes of the interrupted batch land, then cut them off
        file.flush().await?;
        if file.metadata().await?.len() > len {
            file.set_len(len).await?;
        }
        *rollback_to = None;
    }

    *rollback_to = Some(file.metadata().await?.len());
    file.write_all(buf).await?;
    file.flush().await?;
    *rollback_to = None;
    Ok(())
}

#[async_trait]
impl LogSink for FilesystemSink {
    fn name(&self) -> &str {
        "filesystem"
    }

    async fn write_batch(&self, _host: &str, records: &[LogRecord]) -> Result<(), SinkError> {
        let buf = render(records);
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        if state.file.is_none() {
            state.file = Some(self.open().await?);
        }

        let Some(file) = state.file.as_mut() else {
            return Err(SinkError::Rejected("log file not open".to_string()));
        };
        if let Err(e) = append(file, &mut state.rollback_to, &buf).await {
            state.file = None;
            return Err(e.into());
        }
        Ok(())
    }
}

pub struct StdoutSink {
    lock: Mutex<()>,
}

impl StdoutSink {
    pub fn new() -> Self {
        Self {
            lock: Mutex::new(()),
        }
    }
}

impl Default for StdoutSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LogSink for StdoutSink {
    fn name(&self) -> &str {
        "stdout"
    }

    async fn write_batch(&self, _host: &str, records: &[LogRecord]) -> Result<(), SinkError> {
        let buf = render(records);
        let _guard = self.lock.lock().await;
        let mut stdout = tokio::io::stdout();
        stdout.write_all(&buf).await?;
        stdout.flush().await?;
        Ok(())
    }
}

pub struct DiscardSink;

#[async_trait]
impl LogSink for DiscardSink {
    fn name(&self) -> &str {
        "discard"
    }

    async fn write_batch(&self, _host: &str, _records: &[LogRecord]) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Keeps batches in memory, for embedding and tests
#[derive(Default)]
pub struct MemorySink {
    records: Mutex<Vec<(String, String)>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// (host, raw record) pairs in arrival order
    pub async fn records(&self) -> Vec<(String, String)> {
        self.records.lock().await.clone()
    }
}

#[async_trait]
impl LogSink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    async fn write_batch(&self, host: &str, records: &[LogRecord]) -> Result<(), SinkError> {
        let mut stored = self.records.lock().await;
        stored.extend(
            records
                .iter()
                .map(|r| (host.to_string(), r.get().to_string())),
        );
        Ok(())
    }
}
