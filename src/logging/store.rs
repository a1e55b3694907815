use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::AsyncWriteExt;

use super::record::LogRecord;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Write rejected: {0}")]
    Rejected(String),

    #[error("Write timed out after {0} ms")]
    Timeout(u64),

    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Remote document store receiving log records.
///
/// Implementations wrap a concrete client (Firestore, Mongo, ...) and are
/// injected into the [`RemoteLogHandler`](super::RemoteLogHandler).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn write_batch(&self, records: &[LogRecord]) -> Result<(), StoreError>;

    async fn write_one(&self, record: &LogRecord) -> Result<(), StoreError> {
        self.write_batch(std::slice::from_ref(record)).await
    }
}

/// Appends records as JSON lines to a local file.
#[derive(Debug, Clone)]
pub struct JsonlFileStore {
    path: PathBuf,
}

impl JsonlFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl DocumentStore for JsonlFileStore {
    async fn write_batch(&self, records: &[LogRecord]) -> Result<(), StoreError> {
        let mut buf = Vec::new();
        for record in records {
            serde_json::to_writer(&mut buf, record)?;
            buf.push(b'\n');
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&buf).await?;
        file.flush().await?;
        Ok(())
    }
}
