//! The chat history log and its on-disk snapshot.
//!
//! The in-memory sequence is authoritative. Every mutation rewrites the
//! whole snapshot file; a failed write is logged and the process carries on
//! with memory and disk diverged until the next successful write.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use helpline_shared::ChatEntry;
use tokio::fs;
use tracing::{debug, error, info, warn};

use crate::error::Result;

/// Ordered, append-only chat history.
#[derive(Debug, Default)]
pub struct HistoryStore {
    entries: Vec<ChatEntry>,
    /// `None` keeps the history in memory only.
    path: Option<PathBuf>,
}

impl HistoryStore {
    /// Load the snapshot at `path`.
    ///
    /// A missing file yields an empty history. An unreadable file, or one
    /// that is not a JSON array, is logged and also yields an empty history;
    /// it is overwritten by the next mutation. Individual entries that do not
    /// decode are logged and skipped.
    pub async fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();

        let entries = match read_snapshot(&path).await {
            Ok(Some(entries)) => {
                info!(
                    path = %path.display(),
                    entries = entries.len(),
                    "Loaded chat history"
                );
                entries
            }
            Ok(None) => {
                info!(path = %path.display(), "No chat history snapshot, starting empty");
                Vec::new()
            }
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "Failed to read chat history, starting empty"
                );
                Vec::new()
            }
        };

        Self {
            entries,
            path: Some(path),
        }
    }

    /// A history with no backing file.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Append an entry and rewrite the snapshot.
    pub async fn append(&mut self, entry: ChatEntry) {
        self.entries.push(entry);
        self.persist_or_log().await;
    }

    /// Drop every entry and persist the empty snapshot.
    pub async fn clear(&mut self) {
        self.entries.clear();
        self.persist_or_log().await;
    }

    /// Remove and return every entry, persisting the empty snapshot.
    pub async fn take(&mut self) -> Vec<ChatEntry> {
        let entries = std::mem::take(&mut self.entries);
        self.persist_or_log().await;
        entries
    }

    /// Copy of the current history, for replay to a new participant.
    pub fn snapshot(&self) -> Vec<ChatEntry> {
        self.entries.clone()
    }

    pub fn entries(&self) -> &[ChatEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Write the full history to the snapshot file.
    ///
    /// No fsync and no atomic rename: a crash mid-write can leave a corrupt
    /// snapshot, which [`HistoryStore::load`] treats as empty.
    pub async fn persist(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let json = serde_json::to_vec_pretty(&self.entries)?;
        fs::write(path, json).await?;

        debug!(
            path = %path.display(),
            entries = self.entries.len(),
            "Persisted chat history"
        );
        Ok(())
    }

    async fn persist_or_log(&self) {
        if let Err(e) = self.persist().await {
            error!(
                path = ?self.path,
                entries = self.entries.len(),
                error = %e,
                "Failed to save chat history"
            );
        }
    }
}

async fn read_snapshot(path: &Path) -> Result<Option<Vec<ChatEntry>>> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let raw: Vec<serde_json::Value> = serde_json::from_slice(&bytes)?;
    let entries = raw
        .into_iter()
        .enumerate()
        .filter_map(|(index, value)| match serde_json::from_value(value) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(
                    path = %path.display(),
                    index,
                    error = %e,
                    "Skipping unreadable chat history entry"
                );
                None
            }
        })
        .collect();

    Ok(Some(entries))
}
