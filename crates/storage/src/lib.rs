pub mod conformance;
mod error;
mod file;
mod memory;
mod record;
mod traits;

pub use error::StorageError;
pub use file::FileWriteLog;
pub use memory::MemoryWriteLog;
pub use record::PersistedEntry;
pub use traits::WriteLog;
