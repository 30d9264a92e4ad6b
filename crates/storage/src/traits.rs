use async_trait::async_trait;
use courier_interchange::Request;

use crate::error::StorageError;
use crate::record::PersistedEntry;

/// The durable, order-preserving log of not-yet-confirmed writes.
///
/// A `WriteLog` stores [`PersistedEntry`] values in insertion order and must
/// return them in that same order after a process restart. The dispatcher
/// appends at the tail, removes an entry once its terminal outcome has been
/// applied, and rewrites entries in place when a temporary identifier gets
/// resolved.
///
/// ## Ordering
///
/// `all()` returns entries in the order they were appended. `remove`,
/// `remove_at` and `replace` never reorder the remaining entries.
///
/// ## Degraded media
///
/// Implementations report unreadable or unavailable media as
/// `StorageError::Corrupted` / `StorageError::Backend`. They never panic;
/// callers decide how to degrade.
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync + 'static` so the log can be shared
/// with the persistence task and across async task boundaries.
#[async_trait]
pub trait WriteLog: Send + Sync + 'static {
    /// Append an entry at the tail.
    ///
    /// Returns `Err(StorageError::DuplicateSeq)` if an entry with the same
    /// `seq` is already in the log.
    async fn append(&self, entry: PersistedEntry) -> Result<(), StorageError>;

    /// Remove the entry with sequence number `seq`.
    ///
    /// Returns `Err(StorageError::EntryNotFound)` if there is none.
    async fn remove(&self, seq: u64) -> Result<PersistedEntry, StorageError>;

    /// Remove the entry at position `index` (0 is the head).
    ///
    /// Returns `Err(StorageError::IndexOutOfRange)` past the tail.
    async fn remove_at(&self, index: usize) -> Result<PersistedEntry, StorageError>;

    /// Replace the request of entry `seq` in place, keeping its position,
    /// sequence number and queue timestamp.
    ///
    /// Returns `Err(StorageError::EntryNotFound)` if there is none.
    async fn replace(&self, seq: u64, request: Request) -> Result<(), StorageError>;

    /// Number of entries in the log.
    async fn len(&self) -> Result<usize, StorageError>;

    /// Whether the log is empty.
    async fn is_empty(&self) -> Result<bool, StorageError> {
        Ok(self.len().await? == 0)
    }

    /// All entries, head first.
    async fn all(&self) -> Result<Vec<PersistedEntry>, StorageError>;

    /// Drop every entry.
    async fn clear(&self) -> Result<(), StorageError>;
}

// ── Shared in-memory operations ──────────────────────────────────────────────

/// The vector operations every backend performs on its working copy.
pub(crate) fn append_entry(
    entries: &mut Vec<PersistedEntry>,
    entry: PersistedEntry,
) -> Result<(), StorageError> {
    if entries.iter().any(|e| e.seq == entry.seq) {
        return Err(StorageError::DuplicateSeq { seq: entry.seq });
    }
    entries.push(entry);
    Ok(())
}

pub(crate) fn remove_entry(
    entries: &mut Vec<PersistedEntry>,
    seq: u64,
) -> Result<PersistedEntry, StorageError> {
    let index = entries
        .iter()
        .position(|e| e.seq == seq)
        .ok_or(StorageError::EntryNotFound { seq })?;
    Ok(entries.remove(index))
}

pub(crate) fn remove_entry_at(
    entries: &mut Vec<PersistedEntry>,
    index: usize,
) -> Result<PersistedEntry, StorageError> {
    if index >= entries.len() {
        return Err(StorageError::IndexOutOfRange {
            index,
            len: entries.len(),
        });
    }
    Ok(entries.remove(index))
}

pub(crate) fn replace_entry(
    entries: &mut [PersistedEntry],
    seq: u64,
    request: Request,
) -> Result<(), StorageError> {
    let entry = entries
        .iter_mut()
        .find(|e| e.seq == seq)
        .ok_or(StorageError::EntryNotFound { seq })?;
    entry.request = request;
    Ok(())
}
