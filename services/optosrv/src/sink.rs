//! Append-only log sink.
//!
//! The poll loop and the online checks write through this seam; the
//! production implementation appends beneath a data directory, creating
//! folders and files on first use. Sink failures are the caller's to log;
//! they never invalidate the sampling pass that produced the row.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::trace;

use crate::error::{OptoSrvError, Result};

/// Append-only text sink addressed by folder and file name.
#[async_trait]
pub trait LogSink: Send + Sync {
    /// Whether the target file already exists.
    async fn exists(&self, folder: &str, file: &str) -> bool;

    /// Append `text` to the target file, creating folder and file if absent.
    async fn append(&self, folder: &str, file: &str, text: &str) -> Result<()>;
}

/// File-system sink rooted at a data directory.
pub struct FileLogSink {
    root: PathBuf,
}

impl FileLogSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn target(&self, folder: &str, file: &str) -> PathBuf {
        let mut path = self.root.clone();
        if !folder.is_empty() {
            path.push(folder);
        }
        path.push(file);
        path
    }
}

#[async_trait]
impl LogSink for FileLogSink {
    async fn exists(&self, folder: &str, file: &str) -> bool {
        fs::try_exists(self.target(folder, file))
            .await
            .unwrap_or(false)
    }

    async fn append(&self, folder: &str, file: &str, text: &str) -> Result<()> {
        let path = self.target(folder, file);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| sink_error(parent, e))?;
        }

        let mut handle = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| sink_error(&path, e))?;
        handle
            .write_all(text.as_bytes())
            .await
            .map_err(|e| sink_error(&path, e))?;

        trace!(path = %path.display(), bytes = text.len(), "appended log text");
        Ok(())
    }
}

fn sink_error(path: &Path, err: std::io::Error) -> OptoSrvError {
    OptoSrvError::log_sink(format!("{}: {err}", path.display()))
}
