//! Realtime stream source
//!
//! The stream source emits one generated reading per tick while a session is
//! attached and owns the connection state machine:
//!
//! ```text
//! disconnected ──connect()──▶ connected ──reconnect()──▶ reconnecting
//!      ▲                         │  ▲                        │
//!      └──────disconnect()───────┘  └──── backoff elapsed ───┘
//!                                       (retries exhausted ─▶ disconnected)
//! ```
//!
//! Readings and status changes are delivered as [`StreamEvent`]s over a single
//! channel so that a status change is always observed before any reading that
//! depends on it.

pub mod backoff;
pub mod connector;
pub mod source;
pub mod status;

pub use backoff::BackoffPolicy;
pub use connector::{FeedConnector, SimulatedFeed};
pub use source::{StreamConfig, StreamSource};
pub use status::StatusAuthority;

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::types::VitalsReading;

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("No active stream session")]
    NoSession,
}

/// Connection status of the realtime feed
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connected,
    Connecting,
    Reconnecting,
    Disconnected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectionState::Connected => "connected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Disconnected => "disconnected",
        };
        f.write_str(label)
    }
}

/// Tagged events delivered to the session's consumer
#[derive(Clone, Debug, PartialEq)]
pub enum StreamEvent {
    /// A freshly generated reading
    Reading(VitalsReading),

    /// The connection status changed
    Status(ConnectionState),

    /// The reconnect ladder ran out; the session is parked in `Disconnected`
    RetriesExhausted { attempts: u32 },
}

/// Sending half handed to [`StreamSource::connect`]
pub type EventSink = mpsc::UnboundedSender<StreamEvent>;
