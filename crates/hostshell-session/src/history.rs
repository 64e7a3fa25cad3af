//! Durable, deduplicated command history shared by all sessions.
//!
//! The backing file is an append-only log of accepted lines, oldest first.
//! Each session loads and merges it once on start and appends every
//! accepted line synchronously, so nothing is lost if the host dies right
//! after a command is entered.

use std::{
    collections::HashSet,
    path::{Path, PathBuf},
    sync::Arc,
};

use thiserror::Error;
use tokio::{
    fs::{File, OpenOptions},
    io::{AsyncReadExt, AsyncWriteExt},
    sync::Mutex,
};

/// History error.
#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("failed to open history {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to append to history: {0}")]
    Append(#[from] std::io::Error),
}

/// Deduplicate raw history text.
///
/// Scans from newest to oldest keeping the first occurrence of each exact
/// line, drops blank lines, then restores oldest-first order.
#[must_use]
pub fn merge_lines(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut merged: Vec<String> = text
        .lines()
        .rev()
        .filter(|line| !line.trim().is_empty())
        .filter(|line| seen.insert(*line))
        .map(str::to_string)
        .collect();
    merged.reverse();
    merged
}

/// Handle on the history file, shared by every session of one host.
#[derive(Debug, Clone)]
pub struct HistoryStore {
    path: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl HistoryStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open the file for one session, creating it if absent, and load the
    /// merged history.
    ///
    /// # Errors
    /// Returns error if the file cannot be created or read.
    pub async fn open(&self) -> Result<HistorySession, HistoryError> {
        let open_err = |source| HistoryError::Open {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(open_err)?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&self.path)
            .await
            .map_err(open_err)?;

        let mut raw = Vec::new();
        file.read_to_end(&mut raw).await.map_err(open_err)?;
        let entries = merge_lines(&String::from_utf8_lossy(&raw));

        tracing::debug!(path = %self.path.display(), entries = entries.len(), "Loaded shell history");
        Ok(HistorySession {
            file: Some(file),
            write_lock: Arc::clone(&self.write_lock),
            entries,
        })
    }
}

/// One session's view of the history: the merged entries plus an append
/// handle that is released when the session ends.
#[derive(Debug)]
pub struct HistorySession {
    file: Option<File>,
    write_lock: Arc<Mutex<()>>,
    entries: Vec<String>,
}

impl HistorySession {
    /// History that lives only in memory, for sessions whose file could not
    /// be opened.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            file: None,
            write_lock: Arc::new(Mutex::new(())),
            entries: Vec::new(),
        }
    }

    /// Whether accepted lines reach the backing file.
    #[must_use]
    pub const fn is_persistent(&self) -> bool {
        self.file.is_some()
    }

    /// Entries, oldest first, each distinct text once.
    #[must_use]
    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    /// Record an accepted line. Blank lines are ignored.
    ///
    /// The in-memory sequence is updated even if the append fails.
    ///
    /// # Errors
    /// Returns error if the append fails.
    pub async fn record(&mut self, line: &str) -> Result<bool, HistoryError> {
        if line.trim().is_empty() {
            return Ok(false);
        }

        self.entries.retain(|entry| entry != line);
        self.entries.push(line.to_string());

        let Some(file) = self.file.as_mut() else {
            return Ok(false);
        };

        let mut record = Vec::with_capacity(line.len() + 1);
        record.extend_from_slice(line.as_bytes());
        record.push(b'\n');

        // One write per line, serialized across sessions.
        let _guard = self.write_lock.lock().await;
        file.write_all(&record).await?;
        file.flush().await?;
        Ok(true)
    }

    /// Release the file handle.
    ///
    /// # Errors
    /// Returns error if pending writes cannot be flushed.
    pub async fn close(mut self) -> Result<(), HistoryError> {
        if let Some(mut file) = self.file.take() {
            file.flush().await?;
        }
        Ok(())
    }
}
