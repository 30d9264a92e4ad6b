use async_trait::async_trait;
use courier_interchange::Request;
use tokio::sync::Mutex;

use crate::error::StorageError;
use crate::record::PersistedEntry;
use crate::traits::{append_entry, remove_entry, remove_entry_at, replace_entry, WriteLog};

/// A volatile `WriteLog`. Nothing survives the process; useful for tests and
/// for hosts that opt out of durability.
#[derive(Debug, Default)]
pub struct MemoryWriteLog {
    entries: Mutex<Vec<PersistedEntry>>,
}

impl MemoryWriteLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from existing entries (kept in the given order).
    pub fn with_entries(entries: Vec<PersistedEntry>) -> Self {
        MemoryWriteLog {
            entries: Mutex::new(entries),
        }
    }
}

#[async_trait]
impl WriteLog for MemoryWriteLog {
    async fn append(&self, entry: PersistedEntry) -> Result<(), StorageError> {
        append_entry(&mut *self.entries.lock().await, entry)
    }

    async fn remove(&self, seq: u64) -> Result<PersistedEntry, StorageError> {
        remove_entry(&mut *self.entries.lock().await, seq)
    }

    async fn remove_at(&self, index: usize) -> Result<PersistedEntry, StorageError> {
        remove_entry_at(&mut *self.entries.lock().await, index)
    }

    async fn replace(&self, seq: u64, request: Request) -> Result<(), StorageError> {
        replace_entry(&mut self.entries.lock().await, seq, request)
    }

    async fn len(&self) -> Result<usize, StorageError> {
        Ok(self.entries.lock().await.len())
    }

    async fn all(&self) -> Result<Vec<PersistedEntry>, StorageError> {
        Ok(self.entries.lock().await.clone())
    }

    async fn clear(&self) -> Result<(), StorageError> {
        self.entries.lock().await.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conformance::run_conformance_suite;

    #[tokio::test]
    async fn memory_log_passes_conformance() {
        let report = run_conformance_suite(|| async { MemoryWriteLog::new() }).await;
        assert!(report.failed() == 0, "{report}");
    }
}
