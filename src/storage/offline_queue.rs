//! Durable FIFO of readings captured while the network is down

use std::sync::Arc;
use std::time::Duration;

use log::{error, warn};

use crate::types::VitalsReading;

use super::{KvStore, StorageError};

pub const DEFAULT_ENQUEUE_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(50);

pub struct OfflineQueue {
    store: Arc<dyn KvStore>,
    attempts: u32,
    retry_delay: Duration,
}

impl OfflineQueue {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self {
            store,
            attempts: DEFAULT_ENQUEUE_ATTEMPTS,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    /// Override the bounded retry used by [`OfflineQueue::enqueue`]. At least
    /// one attempt is always made.
    pub fn with_retry(mut self, attempts: u32, retry_delay: Duration) -> Self {
        self.attempts = attempts.max(1);
        self.retry_delay = retry_delay;
        self
    }

    /// Persist one reading.
    ///
    /// Transient store errors are retried a bounded number of times. Quota
    /// and serialization errors are returned straight away.
    pub async fn enqueue(&self, reading: &VitalsReading) -> Result<u64, StorageError> {
        let payload = serde_json::to_vec(reading)?;

        let mut attempt = 1;
        loop {
            match self.store.put(payload.clone()).await {
                Ok(id) => return Ok(id),
                Err(e) if e.is_transient() && attempt < self.attempts => {
                    warn!(
                        "Enqueue attempt {}/{} failed: {}; retrying",
                        attempt, self.attempts, e
                    );
                    attempt += 1;
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err(e) => {
                    error!("Could not buffer reading offline: {}", e);
                    return Err(e);
                }
            }
        }
    }

    pub async fn count(&self) -> Result<usize, StorageError> {
        self.store.count().await
    }

    /// All buffered readings in enqueue order. Nothing is removed.
    ///
    /// Entries that no longer decode are skipped; they go away with the next
    /// successful [`OfflineQueue::clear`].
    pub async fn drain_all(&self) -> Result<Vec<VitalsReading>, StorageError> {
        let entries = self.store.get_all().await?;
        let mut readings = Vec::with_capacity(entries.len());

        for (id, payload) in entries {
            match serde_json::from_slice::<VitalsReading>(&payload) {
                Ok(reading) => readings.push(reading),
                Err(e) => warn!("Skipping corrupt queue entry {}: {}", id, e),
            }
        }

        Ok(readings)
    }

    pub async fn clear(&self) -> Result<(), StorageError> {
        self.store.clear().await
    }
}
