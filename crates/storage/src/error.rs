/// All errors that can be returned by a `WriteLog` implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    /// No entry with the given sequence number is in the log.
    #[error("write log entry not found: seq {seq}")]
    EntryNotFound { seq: u64 },

    /// A positional access past the end of the log.
    #[error("write log index {index} out of range (length {len})")]
    IndexOutOfRange { index: usize, len: usize },

    /// An entry with this sequence number was already appended.
    #[error("duplicate write log sequence number {seq}")]
    DuplicateSeq { seq: u64 },

    /// The durable medium holds data that cannot be decoded.
    #[error("write log corrupted: {0}")]
    Corrupted(String),

    /// A backend-specific failure (I/O, serialization, task join, etc.).
    #[error("write log backend error: {0}")]
    Backend(String),
}
