//! In-process network simulator
//!
//! Lets tests and the CLI flip connectivity on and off without touching a real
//! interface.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::info;
use tokio::sync::broadcast;

use super::{NetworkMonitor, NetworkSignal};

pub struct SimulatedNetwork {
    online: AtomicBool,
    tx: broadcast::Sender<NetworkSignal>,
}

impl SimulatedNetwork {
    pub fn new(online: bool) -> Arc<Self> {
        let (tx, _) = broadcast::channel(64);
        Arc::new(Self {
            online: AtomicBool::new(online),
            tx,
        })
    }

    /// Change connectivity. Subscribers hear about it only if it actually
    /// changed. Returns whether it did.
    pub fn set_online(&self, online: bool) -> bool {
        if self.online.swap(online, Ordering::SeqCst) == online {
            return false;
        }

        let signal = if online {
            NetworkSignal::Online
        } else {
            NetworkSignal::Offline
        };
        info!("Simulated network went {:?}", signal);
        // no subscribers is fine
        let _ = self.tx.send(signal);
        true
    }
}

impl NetworkMonitor for SimulatedNetwork {
    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    fn subscribe(&self) -> broadcast::Receiver<NetworkSignal> {
        self.tx.subscribe()
    }
}
