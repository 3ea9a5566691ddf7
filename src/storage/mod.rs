//! Durable storage for readings captured while offline
//!
//! The offline queue only needs four primitives from its backing store, which
//! [`KvStore`] captures. Entries are opaque byte payloads keyed by an
//! auto-incrementing id; `get_all` returns them in id (arrival) order.

pub mod log_file;
pub mod memory;
pub mod offline_queue;

use async_trait::async_trait;
use thiserror::Error;

pub use log_file::FileStore;
pub use memory::MemoryStore;
pub use offline_queue::OfflineQueue;

/// Error types for storage operations
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Storage quota exceeded ({limit} entries)")]
    QuotaExceeded { limit: usize },

    #[error("Corrupt entry: {0}")]
    Corrupt(String),
}

impl StorageError {
    /// Whether retrying the same operation might succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::IoError(_) | StorageError::Unavailable(_))
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::SerializationError(e.to_string())
    }
}

/// Minimal persistent key-value store used by the offline queue
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Append a payload and return its id
    async fn put(&self, value: Vec<u8>) -> Result<u64, StorageError>;

    /// All entries, ordered by id
    async fn get_all(&self) -> Result<Vec<(u64, Vec<u8>)>, StorageError>;

    /// Remove every entry, all or nothing
    async fn clear(&self) -> Result<(), StorageError>;

    async fn count(&self) -> Result<usize, StorageError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        let io = StorageError::from(std::io::Error::new(std::io::ErrorKind::Other, "disk"));
        assert!(io.is_transient());
        assert!(StorageError::Unavailable("locked".into()).is_transient());
        assert!(!StorageError::QuotaExceeded { limit: 10 }.is_transient());
        assert!(!StorageError::SerializationError("bad".into()).is_transient());
        assert!(!StorageError::Corrupt("bad".into()).is_transient());
    }
}
