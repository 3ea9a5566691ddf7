//! In-memory key-value store
//!
//! Not durable. Used in tests and for runs that do not need to survive a
//! restart. An optional entry quota models a full browser store.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{KvStore, StorageError};

#[derive(Default)]
struct Entries {
    map: BTreeMap<u64, Vec<u8>>,
    next_id: u64,
}

#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<Entries>,
    quota: Option<usize>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that rejects puts once it holds `limit` entries
    pub fn with_quota(limit: usize) -> Self {
        Self {
            quota: Some(limit),
            ..Self::default()
        }
    }

    /// Simulate the store going away (or coming back)
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StorageError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StorageError::Unavailable("memory store offline".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn put(&self, value: Vec<u8>) -> Result<u64, StorageError> {
        self.check_available()?;
        let mut entries = self.entries.lock().await;

        if let Some(limit) = self.quota {
            if entries.map.len() >= limit {
                return Err(StorageError::QuotaExceeded { limit });
            }
        }

        entries.next_id += 1;
        let id = entries.next_id;
        entries.map.insert(id, value);
        Ok(id)
    }

    async fn get_all(&self) -> Result<Vec<(u64, Vec<u8>)>, StorageError> {
        self.check_available()?;
        let entries = self.entries.lock().await;
        Ok(entries
            .map
            .iter()
            .map(|(id, value)| (*id, value.clone()))
            .collect())
    }

    async fn clear(&self) -> Result<(), StorageError> {
        self.check_available()?;
        self.entries.lock().await.map.clear();
        Ok(())
    }

    async fn count(&self) -> Result<usize, StorageError> {
        self.check_available()?;
        Ok(self.entries.lock().await.map.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ids_are_ordered() {
        let store = MemoryStore::new();
        let a = store.put(b"a".to_vec()).await.unwrap();
        let b = store.put(b"b".to_vec()).await.unwrap();
        assert!(a < b);

        let all = store.get_all().await.unwrap();
        assert_eq!(all, vec![(a, b"a".to_vec()), (b, b"b".to_vec())]);
    }

    #[tokio::test]
    async fn test_quota_is_enforced() {
        let store = MemoryStore::with_quota(1);
        store.put(vec![1]).await.unwrap();
        assert!(matches!(
            store.put(vec![2]).await,
            Err(StorageError::QuotaExceeded { limit: 1 })
        ));

        store.clear().await.unwrap();
        assert!(store.put(vec![3]).await.is_ok());
    }

    #[tokio::test]
    async fn test_unavailable_store_rejects_everything() {
        let store = MemoryStore::new();
        store.put(vec![1]).await.unwrap();
        store.set_unavailable(true);

        assert!(matches!(store.count().await, Err(StorageError::Unavailable(_))));
        assert!(store.clear().await.is_err());

        store.set_unavailable(false);
        assert_eq!(store.count().await.unwrap(), 1);
    }
}
