//! Handle to a running pipeline
//!
//! Commands travel over an unbounded channel to the pipeline task and are
//! acknowledged on a oneshot once handled.

use tokio::sync::{broadcast, mpsc, oneshot, watch};

use crate::history::HistoryView;
use crate::stream::ConnectionState;
use crate::sync::SyncOutcome;
use crate::types::VitalsReading;

use super::{Notice, PipelineError};

pub(crate) enum Command {
    Connect(oneshot::Sender<Result<(), PipelineError>>),
    Disconnect(oneshot::Sender<()>),
    Reconnect(oneshot::Sender<Result<(), PipelineError>>),
    Ingest(VitalsReading, oneshot::Sender<()>),
    Backfill(Vec<VitalsReading>, oneshot::Sender<()>),
    EndSession(oneshot::Sender<()>),
    Flush(oneshot::Sender<SyncOutcome>),
    Shutdown(oneshot::Sender<()>),
}

#[derive(Clone)]
pub struct PipelineHandle {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<ConnectionState>,
    history: HistoryView,
    notices: broadcast::Sender<Notice>,
}

impl PipelineHandle {
    pub(crate) fn new(
        commands: mpsc::UnboundedSender<Command>,
        status: watch::Receiver<ConnectionState>,
        history: HistoryView,
        notices: broadcast::Sender<Notice>,
    ) -> Self {
        Self {
            commands,
            status,
            history,
            notices,
        }
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, PipelineError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(command(tx))
            .map_err(|_| PipelineError::Closed)?;
        rx.await.map_err(|_| PipelineError::Closed)
    }

    pub async fn connect(&self) -> Result<(), PipelineError> {
        self.request(Command::Connect).await?
    }

    pub async fn disconnect(&self) -> Result<(), PipelineError> {
        self.request(Command::Disconnect).await
    }

    pub async fn reconnect(&self) -> Result<(), PipelineError> {
        self.request(Command::Reconnect).await?
    }

    /// Hand in a reading produced outside the feed; it is routed by the
    /// current network state.
    pub async fn ingest(&self, reading: VitalsReading) -> Result<(), PipelineError> {
        self.request(|ack| Command::Ingest(reading, ack)).await
    }

    pub async fn backfill(&self, readings: Vec<VitalsReading>) -> Result<(), PipelineError> {
        self.request(|ack| Command::Backfill(readings, ack)).await
    }

    pub async fn end_session(&self) -> Result<(), PipelineError> {
        self.request(Command::EndSession).await
    }

    pub async fn flush(&self) -> Result<SyncOutcome, PipelineError> {
        self.request(Command::Flush).await
    }

    /// Stop the pipeline task. Later commands fail with `Closed`.
    pub async fn shutdown(&self) -> Result<(), PipelineError> {
        self.request(Command::Shutdown).await
    }

    pub fn status(&self) -> ConnectionState {
        *self.status.borrow()
    }

    pub fn watch_status(&self) -> watch::Receiver<ConnectionState> {
        self.status.clone()
    }

    pub fn history(&self) -> &HistoryView {
        &self.history
    }

    pub fn subscribe_notices(&self) -> broadcast::Receiver<Notice> {
        self.notices.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }
}
