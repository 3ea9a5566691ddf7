//! Feed connector seam
//!
//! Every connect attempt opens the feed through a [`FeedConnector`]. The
//! simulated feed always opens; tests inject connectors that fail to exercise
//! the reconnect ladder.

use super::StreamError;

pub trait FeedConnector: Send + Sync {
    /// Open the underlying feed for a new streaming period
    fn open(&self) -> Result<(), StreamError>;

    fn name(&self) -> &str;
}

/// In-process simulated sensor feed. Opening it never fails.
#[derive(Clone, Copy, Debug, Default)]
pub struct SimulatedFeed;

impl FeedConnector for SimulatedFeed {
    fn open(&self) -> Result<(), StreamError> {
        Ok(())
    }

    fn name(&self) -> &str {
        "simulated"
    }
}
