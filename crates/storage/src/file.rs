//! File-backed `WriteLog`.
//!
//! The whole log is one JSON document. Every mutation rewrites it through a
//! temporary file followed by a rename, so a crash leaves either the old or
//! the new document on disk, never a torn one. Blocking file I/O runs in
//! `tokio::task::spawn_blocking`.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use courier_interchange::Request;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::StorageError;
use crate::record::PersistedEntry;
use crate::traits::{append_entry, remove_entry, remove_entry_at, replace_entry, WriteLog};

const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct LogDocument {
    version: u32,
    entries: Vec<PersistedEntry>,
}

/// A `WriteLog` persisted to a single JSON file.
///
/// Opening never fails: an unreadable or corrupted file is moved aside to
/// `<name>.corrupt` and the log starts empty. The condition is logged and
/// kept in [`FileWriteLog::recovered_from`].
#[derive(Debug)]
pub struct FileWriteLog {
    path: PathBuf,
    entries: Mutex<Vec<PersistedEntry>>,
    recovered_from: Option<StorageError>,
}

impl FileWriteLog {
    /// Open (or create on first write) the log at `path`.
    pub async fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let load_path = path.clone();
        let loaded = tokio::task::spawn_blocking(move || load(&load_path))
            .await
            .unwrap_or_else(|e| Err(StorageError::Backend(format!("task join error: {e}"))));

        match loaded {
            Ok(entries) => FileWriteLog {
                path,
                entries: Mutex::new(entries),
                recovered_from: None,
            },
            Err(err) => {
                tracing::error!(path = %path.display(), error = %err, "write log unreadable, starting empty");
                let quarantine_path = path.clone();
                match tokio::task::spawn_blocking(move || quarantine(&quarantine_path)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        tracing::warn!(path = %path.display(), error = %e, "could not move corrupted write log aside");
                    }
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "could not move corrupted write log aside");
                    }
                }
                FileWriteLog {
                    path,
                    entries: Mutex::new(Vec::new()),
                    recovered_from: Some(err),
                }
            }
        }
    }

    /// Read the entries at `path` without opening the log.
    ///
    /// Unlike [`FileWriteLog::open`] this never touches the file: a
    /// corrupted document is reported as an error and left where it is.
    pub async fn inspect(path: impl Into<PathBuf>) -> Result<Vec<PersistedEntry>, StorageError> {
        let path = path.into();
        tokio::task::spawn_blocking(move || load(&path))
            .await
            .map_err(|e| StorageError::Backend(format!("task join error: {e}")))?
    }

    /// The location of the log document.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The error that forced the log to start empty, if any.
    pub fn recovered_from(&self) -> Option<&StorageError> {
        self.recovered_from.as_ref()
    }

    /// Apply `mutate` to a copy of the entries, persist the copy, and only
    /// then make it the current state.
    async fn mutate<T, F>(&self, mutate: F) -> Result<T, StorageError>
    where
        F: FnOnce(&mut Vec<PersistedEntry>) -> Result<T, StorageError>,
    {
        let mut guard = self.entries.lock().await;
        let mut next = guard.clone();
        let out = mutate(&mut next)?;

        let document = LogDocument {
            version: FORMAT_VERSION,
            entries: next,
        };
        let bytes = serde_json::to_vec_pretty(&document)
            .map_err(|e| StorageError::Backend(format!("serialize write log: {e}")))?;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_atomically(&path, &bytes))
            .await
            .map_err(|e| StorageError::Backend(format!("task join error: {e}")))??;

        *guard = document.entries;
        Ok(out)
    }
}

#[async_trait]
impl WriteLog for FileWriteLog {
    async fn append(&self, entry: PersistedEntry) -> Result<(), StorageError> {
        self.mutate(|entries| append_entry(entries, entry)).await
    }

    async fn remove(&self, seq: u64) -> Result<PersistedEntry, StorageError> {
        self.mutate(|entries| remove_entry(entries, seq)).await
    }

    async fn remove_at(&self, index: usize) -> Result<PersistedEntry, StorageError> {
        self.mutate(|entries| remove_entry_at(entries, index)).await
    }

    async fn replace(&self, seq: u64, request: Request) -> Result<(), StorageError> {
        self.mutate(|entries| replace_entry(entries, seq, request))
            .await
    }

    async fn len(&self) -> Result<usize, StorageError> {
        Ok(self.entries.lock().await.len())
    }

    async fn all(&self) -> Result<Vec<PersistedEntry>, StorageError> {
        Ok(self.entries.lock().await.clone())
    }

    async fn clear(&self) -> Result<(), StorageError> {
        self.mutate(|entries| {
            entries.clear();
            Ok(())
        })
        .await
    }
}

// ── Blocking helpers ─────────────────────────────────────────────────────────

fn load(path: &Path) -> Result<Vec<PersistedEntry>, StorageError> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(StorageError::Backend(format!("read {}: {e}", path.display()))),
    };
    let document: LogDocument = serde_json::from_slice(&bytes)
        .map_err(|e| StorageError::Corrupted(format!("{}: {e}", path.display())))?;
    if document.version != FORMAT_VERSION {
        return Err(StorageError::Corrupted(format!(
            "{}: unsupported format version {}",
            path.display(),
            document.version
        )));
    }
    Ok(document.entries)
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(suffix);
    path.with_file_name(name)
}

fn quarantine(path: &Path) -> Result<(), StorageError> {
    if !path.exists() {
        return Ok(());
    }
    std::fs::rename(path, sibling(path, ".corrupt"))
        .map_err(|e| StorageError::Backend(format!("quarantine {}: {e}", path.display())))
}

fn write_atomically(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .map_err(|e| StorageError::Backend(format!("create {}: {e}", parent.display())))?;
    }
    let tmp = sibling(path, ".tmp");
    std::fs::write(&tmp, bytes)
        .map_err(|e| StorageError::Backend(format!("write {}: {e}", tmp.display())))?;
    std::fs::rename(&tmp, path)
        .map_err(|e| StorageError::Backend(format!("rename to {}: {e}", path.display())))
}
