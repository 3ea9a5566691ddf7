//! Network reachability signal
//!
//! The pipeline does not test connectivity itself. It reads the current state
//! from a [`NetworkMonitor`] and reacts to its edge events.

pub mod simulated;

pub use simulated::SimulatedNetwork;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkSignal {
    Online,
    Offline,
}

impl NetworkSignal {
    pub fn is_online(self) -> bool {
        self == NetworkSignal::Online
    }
}

/// Source of online/offline transitions
pub trait NetworkMonitor: Send + Sync {
    fn is_online(&self) -> bool;

    /// Edge events only; a repeated state is not re-sent.
    fn subscribe(&self) -> broadcast::Receiver<NetworkSignal>;
}
