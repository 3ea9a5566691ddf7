//! Offline queue flush
//!
//! Moves buffered readings into the live consumer once connectivity is back.
//! The queue is cleared only after the consumer has accepted every reading; any
//! failure leaves it intact for the next attempt.

use std::sync::Arc;

use log::{debug, error, info, warn};
use thiserror::Error;

use crate::history::{HistoryBuffer, SharedHistory};
use crate::storage::OfflineQueue;
use crate::types::VitalsReading;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Sink rejected readings: {0}")]
    Rejected(String),
}

/// The live consumer: accepts readings in order
pub trait ReadingSink: Send {
    fn deliver(&mut self, readings: Vec<VitalsReading>) -> Result<(), SinkError>;
}

impl ReadingSink for HistoryBuffer {
    fn deliver(&mut self, readings: Vec<VitalsReading>) -> Result<(), SinkError> {
        self.extend(readings);
        Ok(())
    }
}

impl ReadingSink for SharedHistory {
    fn deliver(&mut self, readings: Vec<VitalsReading>) -> Result<(), SinkError> {
        self.extend(readings);
        Ok(())
    }
}

/// Result of one flush
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The queue was empty
    Idle,

    Synced { count: usize },

    /// The queue was left as it was
    Failed { reason: String },
}

pub struct SyncCoordinator {
    queue: Arc<OfflineQueue>,
}

impl SyncCoordinator {
    pub fn new(queue: Arc<OfflineQueue>) -> Self {
        Self { queue }
    }

    pub fn queue(&self) -> &Arc<OfflineQueue> {
        &self.queue
    }

    /// Drain the queue into `sink`, then clear it.
    ///
    /// If `clear` fails after a successful delivery the readings stay queued
    /// and will be delivered again by the next flush.
    pub async fn flush<S>(&self, sink: &mut S) -> SyncOutcome
    where
        S: ReadingSink + ?Sized,
    {
        let pending = match self.queue.count().await {
            Ok(0) => {
                debug!("Offline queue empty; nothing to sync");
                return SyncOutcome::Idle;
            }
            Ok(n) => n,
            Err(e) => return failed("count", e),
        };

        let readings = match self.queue.drain_all().await {
            Ok(readings) => readings,
            Err(e) => return failed("read", e),
        };
        let count = readings.len();
        if count == 0 {
            warn!("Dropping {} unreadable queued entries", pending);
            if let Err(e) = self.queue.clear().await {
                return failed("clear", e);
            }
            return SyncOutcome::Idle;
        }
        debug!("Flushing {} of {} queued entries", count, pending);

        if let Err(e) = sink.deliver(readings) {
            return failed("deliver", e);
        }
        if let Err(e) = self.queue.clear().await {
            return failed("clear", e);
        }

        info!("Synced {} cached reading(s)", count);
        SyncOutcome::Synced { count }
    }
}

fn failed(step: &str, e: impl std::fmt::Display) -> SyncOutcome {
    error!("Offline sync failed to {}: {}", step, e);
    SyncOutcome::Failed {
        reason: format!("{}: {}", step, e),
    }
}
