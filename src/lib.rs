//! PulseTrack - realtime vitals delivery pipeline
//!
//! A simulated sensor feed with connection lifecycle and reconnect backoff, a
//! bounded in-memory history window, and an offline queue that keeps readings
//! safe on disk until the network comes back.

pub mod auth;
pub mod config;
pub mod history;
pub mod network;
pub mod pipeline;
pub mod sensor;
pub mod storage;
pub mod stream;
pub mod sync;
pub mod types;

pub use config::{ConfigError, PipelineConfig, QueueConfig};
pub use history::{HistoryBuffer, HistoryView, SharedHistory, TimeRange};
pub use pipeline::{Notice, Pipeline, PipelineDeps, PipelineError, PipelineHandle};
pub use stream::{ConnectionState, StreamEvent};
pub use sync::SyncOutcome;
pub use types::{Metric, VitalStatus, VitalsReading};
