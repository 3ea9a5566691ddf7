//! Connection status authority
//!
//! Single source of truth for [`ConnectionState`]. Anyone may read or watch it;
//! only the stream source writes it.

use tokio::sync::watch;

use super::ConnectionState;

pub struct StatusAuthority {
    tx: watch::Sender<ConnectionState>,
}

impl StatusAuthority {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(ConnectionState::Disconnected);
        Self { tx }
    }

    /// The current connection state
    pub fn current(&self) -> ConnectionState {
        *self.tx.borrow()
    }

    /// Watch the connection state for changes
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.tx.subscribe()
    }

    /// Returns `true` if the value actually changed.
    pub(crate) fn set(&self, state: ConnectionState) -> bool {
        self.tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        })
    }
}

impl Default for StatusAuthority {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_disconnected() {
        let authority = StatusAuthority::new();
        assert_eq!(authority.current(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_set_is_edge_triggered() {
        let authority = StatusAuthority::new();
        let mut rx = authority.subscribe();

        assert!(authority.set(ConnectionState::Connected));
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), ConnectionState::Connected);

        assert!(!authority.set(ConnectionState::Connected));
        assert!(!rx.has_changed().unwrap());
    }
}
