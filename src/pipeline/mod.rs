//! Realtime vitals pipeline
//!
//! Owns the stream source, the history window, the offline queue and the sync
//! coordinator, and runs them on a single task. Each event (command, network
//! signal or stream event) is handled to completion before the next one is
//! taken, so a flush always finishes before any newer live reading is
//! appended.

pub mod handle;

pub use handle::PipelineHandle;

use std::future;
use std::sync::Arc;

use log::{debug, info, warn};
use thiserror::Error;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::{mpsc, watch};

use crate::auth::AuthContext;
use crate::config::PipelineConfig;
use crate::history::{HistoryView, SharedHistory};
use crate::network::{NetworkMonitor, NetworkSignal};
use crate::sensor::{Clock, SystemClock, VitalsGenerator};
use crate::storage::{KvStore, OfflineQueue, StorageError};
use crate::stream::{
    ConnectionState, FeedConnector, SimulatedFeed, StreamError, StreamEvent, StreamSource,
};
use crate::sync::{SyncCoordinator, SyncOutcome};
use crate::types::VitalsReading;

use handle::Command;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("No active user session")]
    Unauthenticated,

    #[error("Network is offline")]
    Offline,

    #[error("Pipeline has shut down")]
    Closed,
}

/// User-facing notifications
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Notice {
    Synced { count: usize },
    SyncFailed { reason: String },
    BufferFailed { reason: String },
    ReconnectExhausted { attempts: u32 },
}

impl Notice {
    /// Text shown to the user
    pub fn message(&self) -> String {
        match self {
            Notice::Synced { count } => format!("Synced {} cached reading(s)", count),
            Notice::SyncFailed { .. } => "Failed to sync cached data. Will retry later.".to_string(),
            Notice::BufferFailed { .. } => {
                "Failed to save a reading offline. It may be lost.".to_string()
            }
            Notice::ReconnectExhausted { attempts } => format!(
                "Lost connection to the vitals feed after {} attempts.",
                attempts
            ),
        }
    }

    pub fn is_failure(&self) -> bool {
        !matches!(self, Notice::Synced { .. })
    }
}

/// External collaborators the pipeline runs against
pub struct PipelineDeps {
    pub network: Arc<dyn NetworkMonitor>,
    pub auth: Arc<dyn AuthContext>,
    pub store: Arc<dyn KvStore>,
    pub connector: Arc<dyn FeedConnector>,
    pub clock: Arc<dyn Clock>,
}

impl PipelineDeps {
    /// Simulated feed on the system clock
    pub fn new(
        network: Arc<dyn NetworkMonitor>,
        auth: Arc<dyn AuthContext>,
        store: Arc<dyn KvStore>,
    ) -> Self {
        Self {
            network,
            auth,
            store,
            connector: Arc::new(SimulatedFeed),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_connector(mut self, connector: Arc<dyn FeedConnector>) -> Self {
        self.connector = connector;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

pub struct Pipeline {
    source: Arc<StreamSource>,
    history: SharedHistory,
    queue: Arc<OfflineQueue>,
    sync: SyncCoordinator,
    network: Arc<dyn NetworkMonitor>,
    auth: Arc<dyn AuthContext>,
    notices: broadcast::Sender<Notice>,
    events_tx: mpsc::UnboundedSender<StreamEvent>,
    events_rx: mpsc::UnboundedReceiver<StreamEvent>,
    signals: Option<broadcast::Receiver<NetworkSignal>>,
    /// Network state as last handled here, not as currently reported
    online: bool,
}

impl Pipeline {
    pub fn new(config: &PipelineConfig, deps: PipelineDeps) -> Self {
        let generator = match config.seed {
            Some(seed) => VitalsGenerator::seeded(deps.clock, seed),
            None => VitalsGenerator::new(deps.clock),
        };
        let source = StreamSource::new(config.stream_config(), deps.connector, generator);

        let queue = Arc::new(
            OfflineQueue::new(deps.store)
                .with_retry(config.queue.enqueue_attempts, config.queue.retry_delay()),
        );
        let (notices, _) = broadcast::channel(64);
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        Self {
            source,
            history: SharedHistory::new(config.history_capacity),
            sync: SyncCoordinator::new(Arc::clone(&queue)),
            queue,
            network: deps.network,
            auth: deps.auth,
            notices,
            events_tx,
            events_rx,
            signals: None,
            online: false,
        }
    }

    /// Read-only view of the history window
    pub fn history(&self) -> HistoryView {
        self.history.view()
    }

    pub fn status(&self) -> watch::Receiver<ConnectionState> {
        self.source.status().subscribe()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.source.connection_state()
    }

    pub fn notices(&self) -> broadcast::Receiver<Notice> {
        self.notices.subscribe()
    }

    pub fn queue(&self) -> &Arc<OfflineQueue> {
        &self.queue
    }

    /// Subscribe to the network and, if online and signed in, start the feed
    /// and flush anything left in the queue from an earlier run.
    pub async fn activate(&mut self) -> Result<(), PipelineError> {
        if self.signals.is_none() {
            self.signals = Some(self.network.subscribe());
        }

        self.online = self.network.is_online();
        if self.online {
            self.go_online().await
        } else {
            info!("Starting offline; feed stays down until the network returns");
            Ok(())
        }
    }

    pub async fn handle_signal(&mut self, signal: NetworkSignal) -> Result<(), PipelineError> {
        match signal {
            NetworkSignal::Offline => {
                info!("Network offline; stopping feed");
                self.online = false;
                self.source.go_offline();
                // readings emitted before the teardown go to the queue
                while let Ok(event) = self.events_rx.try_recv() {
                    self.handle_event(event).await;
                }
                Ok(())
            }
            NetworkSignal::Online => {
                info!("Network online");
                self.online = true;
                self.go_online().await
            }
        }
    }

    pub async fn handle_event(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::Reading(reading) => self.route(reading).await,
            StreamEvent::Status(state) => debug!("Feed status is now {}", state),
            StreamEvent::RetriesExhausted { attempts } => {
                self.notify(Notice::ReconnectExhausted { attempts });
            }
        }
    }

    /// Route an externally produced reading as if it came off the feed
    pub async fn ingest(&mut self, reading: VitalsReading) {
        self.route(reading).await;
    }

    pub fn connect(&mut self) -> Result<(), PipelineError> {
        self.check_can_stream()?;
        self.source.connect(self.events_tx.clone())?;
        Ok(())
    }

    pub fn disconnect(&mut self) {
        self.source.disconnect();
    }

    pub fn reconnect(&mut self) -> Result<(), PipelineError> {
        self.check_can_stream()?;
        self.source.reconnect()?;
        Ok(())
    }

    /// Logout or session end: stop the feed, forget history and start the
    /// next session from baseline.
    pub fn end_session(&mut self) {
        self.source.disconnect();
        let mut dropped = 0;
        while let Ok(event) = self.events_rx.try_recv() {
            if matches!(event, StreamEvent::Reading(_)) {
                dropped += 1;
            }
        }
        self.history.clear();
        self.source.reset_generator();
        info!("Session ended; dropped {} in-flight reading(s)", dropped);
    }

    /// Bulk-load history, e.g. from a backfill source
    pub fn backfill(&mut self, readings: Vec<VitalsReading>) {
        debug!("Backfilling {} reading(s)", readings.len());
        self.history.replace_all(readings);
    }

    /// Flush the offline queue into history and report the outcome
    pub async fn flush(&mut self) -> SyncOutcome {
        let outcome = self.sync.flush(&mut self.history).await;
        match &outcome {
            SyncOutcome::Idle => {}
            SyncOutcome::Synced { count } => self.notify(Notice::Synced { count: *count }),
            SyncOutcome::Failed { reason } => self.notify(Notice::SyncFailed {
                reason: reason.clone(),
            }),
        }
        outcome
    }

    /// Stop the feed and stop listening to the network
    pub fn shutdown(&mut self) {
        self.source.disconnect();
        self.signals = None;
        info!("Pipeline shut down");
    }

    /// Move the pipeline onto its own task
    pub fn spawn(self) -> PipelineHandle {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let handle = PipelineHandle::new(
            commands_tx,
            self.status(),
            self.history(),
            self.notices.clone(),
        );
        tokio::spawn(self.run(commands_rx));
        handle
    }

    pub(crate) async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        if let Err(e) = self.activate().await {
            warn!("Pipeline activation failed: {}", e);
        }

        loop {
            tokio::select! {
                biased;

                command = commands.recv() => match command {
                    Some(Command::Shutdown(ack)) => {
                        self.shutdown();
                        let _ = ack.send(());
                        break;
                    }
                    Some(command) => self.handle_command(command).await,
                    None => {
                        self.shutdown();
                        break;
                    }
                },

                signal = next_signal(&mut self.signals) => {
                    let result = match signal {
                        Ok(signal) => self.handle_signal(signal).await,
                        Err(RecvError::Lagged(missed)) => {
                            warn!("Missed {} network signal(s); resyncing", missed);
                            let current = if self.network.is_online() {
                                NetworkSignal::Online
                            } else {
                                NetworkSignal::Offline
                            };
                            self.handle_signal(current).await
                        }
                        Err(RecvError::Closed) => {
                            warn!("Network monitor went away");
                            self.signals = None;
                            Ok(())
                        }
                    };
                    if let Err(e) = result {
                        warn!("Handling network signal failed: {}", e);
                    }
                },

                Some(event) = self.events_rx.recv() => self.handle_event(event).await,
            }
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect(ack) => {
                let _ = ack.send(self.connect());
            }
            Command::Disconnect(ack) => {
                self.disconnect();
                let _ = ack.send(());
            }
            Command::Reconnect(ack) => {
                let _ = ack.send(self.reconnect());
            }
            Command::Ingest(reading, ack) => {
                self.ingest(reading).await;
                let _ = ack.send(());
            }
            Command::Backfill(readings, ack) => {
                self.backfill(readings);
                let _ = ack.send(());
            }
            Command::EndSession(ack) => {
                self.end_session();
                let _ = ack.send(());
            }
            Command::Flush(ack) => {
                let _ = ack.send(self.flush().await);
            }
            Command::Shutdown(ack) => {
                self.shutdown();
                let _ = ack.send(());
            }
        }
    }

    async fn go_online(&mut self) -> Result<(), PipelineError> {
        if !self.auth.is_session_active() {
            debug!("No active session; not starting the feed");
            return Ok(());
        }
        self.source.connect(self.events_tx.clone())?;
        self.flush().await;
        Ok(())
    }

    fn check_can_stream(&self) -> Result<(), PipelineError> {
        if !self.auth.is_session_active() {
            return Err(PipelineError::Unauthenticated);
        }
        if !self.online {
            return Err(PipelineError::Offline);
        }
        Ok(())
    }

    /// Readings follow the last handled signal, so anything routed before a
    /// pending `Online` is handled still queues behind the flush.
    async fn route(&mut self, reading: VitalsReading) {
        if self.online {
            self.history.append(reading);
            return;
        }

        if let Err(e) = self.queue.enqueue(&reading).await {
            self.notify(Notice::BufferFailed {
                reason: e.to_string(),
            });
        }
    }

    fn notify(&self, notice: Notice) {
        if notice.is_failure() {
            warn!("{}", notice.message());
        } else {
            info!("{}", notice.message());
        }
        // nobody listening is fine
        let _ = self.notices.send(notice);
    }
}

async fn next_signal(
    signals: &mut Option<broadcast::Receiver<NetworkSignal>>,
) -> Result<NetworkSignal, RecvError> {
    match signals {
        Some(rx) => rx.recv().await,
        None => future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::SessionFlag;
    use crate::network::SimulatedNetwork;
    use crate::storage::MemoryStore;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tokio::time;

    struct Fixture {
        network: Arc<SimulatedNetwork>,
        auth: Arc<SessionFlag>,
        store: Arc<MemoryStore>,
    }

    impl Fixture {
        fn new(online: bool, signed_in: bool) -> Self {
            Self::with_store(online, signed_in, MemoryStore::new())
        }

        fn with_store(online: bool, signed_in: bool, store: MemoryStore) -> Self {
            Self {
                network: SimulatedNetwork::new(online),
                auth: Arc::new(SessionFlag::new(signed_in)),
                store: Arc::new(store),
            }
        }

        fn deps(&self) -> PipelineDeps {
            PipelineDeps::new(self.network.clone(), self.auth.clone(), self.store.clone())
        }

        fn pipeline(&self) -> Pipeline {
            let config = PipelineConfig {
                seed: Some(3),
                ..PipelineConfig::default()
            };
            Pipeline::new(&config, self.deps())
        }
    }

    fn marked(steps: u64) -> VitalsReading {
        let mut reading = VitalsReading::baseline(chrono::Utc::now());
        reading.steps = steps;
        reading
    }

    /// Opens once, then refuses every reconnect.
    struct OneShotFeed {
        opens: AtomicU32,
    }

    impl FeedConnector for OneShotFeed {
        fn open(&self) -> Result<(), StreamError> {
            if self.opens.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(())
            } else {
                Err(StreamError::ConnectionFailed("feed down".into()))
            }
        }

        fn name(&self) -> &str {
            "one-shot"
        }
    }

    #[test]
    fn test_notice_messages() {
        assert_eq!(
            Notice::Synced { count: 3 }.message(),
            "Synced 3 cached reading(s)"
        );
        assert_eq!(
            Notice::SyncFailed { reason: "x".into() }.message(),
            "Failed to sync cached data. Will retry later."
        );
        assert_eq!(
            Notice::ReconnectExhausted { attempts: 5 }.message(),
            "Lost connection to the vitals feed after 5 attempts."
        );
        assert!(Notice::BufferFailed { reason: "x".into() }.is_failure());
        assert!(!Notice::Synced { count: 1 }.is_failure());
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_readings_fill_history() {
        let fixture = Fixture::new(true, true);
        let handle = fixture.pipeline().spawn();

        time::sleep(Duration::from_millis(4500)).await;

        assert_eq!(handle.status(), ConnectionState::Connected);
        assert_eq!(handle.history().len(), 2);
        assert_eq!(fixture.store.count().await.unwrap(), 0);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_offline_round_trip_preserves_order() {
        let fixture = Fixture::new(true, true);
        let handle = fixture.pipeline().spawn();
        let mut notices = handle.subscribe_notices();

        time::sleep(Duration::from_millis(4500)).await;
        fixture.network.set_online(false);
        time::sleep(Duration::from_secs(10)).await;

        assert_eq!(handle.status(), ConnectionState::Disconnected);
        let live = handle.history().len();
        assert_eq!(live, 2);

        for steps in 1001..=1005 {
            handle.ingest(marked(steps)).await.unwrap();
        }
        assert_eq!(fixture.store.count().await.unwrap(), 5);
        assert_eq!(handle.history().len(), live);

        fixture.network.set_online(true);
        time::sleep(Duration::from_millis(10)).await;

        let tail: Vec<u64> = handle.history().tail(5).iter().map(|r| r.steps).collect();
        assert_eq!(tail, vec![1001, 1002, 1003, 1004, 1005]);
        assert_eq!(fixture.store.count().await.unwrap(), 0);
        assert_eq!(handle.status(), ConnectionState::Connected);
        assert_eq!(notices.recv().await.unwrap(), Notice::Synced { count: 5 });

        handle.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_reading_racing_online_edge_lands_after_flush() {
        let fixture = Fixture::new(false, true);
        let handle = fixture.pipeline().spawn();

        for steps in 1..=3 {
            handle.ingest(marked(steps)).await.unwrap();
        }

        // the command is taken before the pending Online signal
        fixture.network.set_online(true);
        handle.ingest(marked(4)).await.unwrap();
        time::sleep(Duration::from_millis(10)).await;

        let steps: Vec<u64> = handle.history().snapshot().iter().map(|r| r.steps).collect();
        assert_eq!(steps, vec![1, 2, 3, 4]);
        assert_eq!(fixture.store.count().await.unwrap(), 0);
        assert_eq!(handle.status(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_flush_keeps_queue() {
        let fixture = Fixture::new(false, true);
        let handle = fixture.pipeline().spawn();
        let mut notices = handle.subscribe_notices();

        handle.ingest(marked(1)).await.unwrap();
        handle.ingest(marked(2)).await.unwrap();

        fixture.store.set_unavailable(true);
        fixture.network.set_online(true);
        time::sleep(Duration::from_millis(10)).await;

        assert!(matches!(
            notices.recv().await.unwrap(),
            Notice::SyncFailed { .. }
        ));
        fixture.store.set_unavailable(false);
        assert_eq!(fixture.store.count().await.unwrap(), 2);
        assert!(handle.history().is_empty());

        // manual retry succeeds
        assert_eq!(handle.flush().await.unwrap(), SyncOutcome::Synced { count: 2 });
        let steps: Vec<u64> = handle.history().snapshot().iter().map(|r| r.steps).collect();
        assert_eq!(&steps[..2], &[1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_store_reports_buffer_failure() {
        let fixture = Fixture::with_store(false, true, MemoryStore::with_quota(0));
        let handle = fixture.pipeline().spawn();
        let mut notices = handle.subscribe_notices();

        handle.ingest(marked(1)).await.unwrap();

        assert!(matches!(
            notices.recv().await.unwrap(),
            Notice::BufferFailed { .. }
        ));
        assert_eq!(handle.status(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_offline_drains_in_flight_readings_to_queue() {
        let fixture = Fixture::new(true, true);
        let mut pipeline = fixture.pipeline();
        pipeline.activate().await.unwrap();

        // ticks pile up in the event channel while nobody handles them
        time::sleep(Duration::from_millis(6500)).await;
        fixture.network.set_online(false);
        pipeline.handle_signal(NetworkSignal::Offline).await.unwrap();

        assert_eq!(fixture.store.count().await.unwrap(), 3);
        assert!(pipeline.history().is_empty());
        assert_eq!(pipeline.connection_state(), ConnectionState::Disconnected);

        time::sleep(Duration::from_secs(60)).await;
        assert!(pipeline.events_rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_signed_out_online_does_not_start_feed() {
        let fixture = Fixture::new(false, false);
        let handle = fixture.pipeline().spawn();

        fixture.network.set_online(true);
        time::sleep(Duration::from_secs(5)).await;

        assert_eq!(handle.status(), ConnectionState::Disconnected);
        assert!(handle.history().is_empty());
        assert!(matches!(
            handle.connect().await,
            Err(PipelineError::Unauthenticated)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_is_reported() {
        let fixture = Fixture::new(true, true);
        let deps = fixture.deps().with_connector(Arc::new(OneShotFeed {
            opens: AtomicU32::new(0),
        }));
        let handle = Pipeline::new(&PipelineConfig::default(), deps).spawn();
        let mut notices = handle.subscribe_notices();

        time::sleep(Duration::from_millis(10)).await;
        handle.reconnect().await.unwrap();
        time::sleep(Duration::from_secs(40)).await;

        assert_eq!(
            notices.recv().await.unwrap(),
            Notice::ReconnectExhausted { attempts: 5 }
        );
        assert_eq!(handle.status(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_session_clears_history() {
        let fixture = Fixture::new(true, true);
        let handle = fixture.pipeline().spawn();

        time::sleep(Duration::from_millis(4500)).await;
        assert!(!handle.history().is_empty());

        handle.end_session().await.unwrap();
        time::sleep(Duration::from_secs(10)).await;

        assert!(handle.history().is_empty());
        assert_eq!(handle.status(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backfill_replaces_history() {
        let fixture = Fixture::new(false, true);
        let handle = fixture.pipeline().spawn();

        handle
            .backfill((0..5).map(marked).collect())
            .await
            .unwrap();
        let steps: Vec<u64> = handle.history().snapshot().iter().map(|r| r.steps).collect();
        assert_eq!(steps, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_commands_fail_after_shutdown() {
        let fixture = Fixture::new(true, true);
        let handle = fixture.pipeline().spawn();

        handle.shutdown().await.unwrap();
        assert!(matches!(handle.flush().await, Err(PipelineError::Closed)));
    }
}
