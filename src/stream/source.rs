//! Stream source and session lifecycle
//!
//! A [`StreamSource`] owns at most one session. The session holds the event
//! sink, the periodic tick task, any pending reconnect timer and the retry
//! counter. Timer tasks carry the epoch they were spawned under and only act
//! while that epoch is still the session's current one, so cancelling a timer
//! under the state lock is final even if the task has already woken up.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use log::{debug, info, warn};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use uuid::Uuid;

use crate::sensor::VitalsGenerator;

use super::backoff::BackoffPolicy;
use super::connector::FeedConnector;
use super::status::StatusAuthority;
use super::{ConnectionState, EventSink, StreamError, StreamEvent};

/// Timing configuration for a stream source
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamConfig {
    /// Period between generated readings
    pub tick_interval: Duration,

    pub backoff: BackoffPolicy,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(2000),
            backoff: BackoffPolicy::default(),
        }
    }
}

struct TimerTask {
    epoch: u64,
    handle: JoinHandle<()>,
}

impl TimerTask {
    fn cancel(self) {
        self.handle.abort();
    }
}

/// One attached consumer, from `connect()` until `disconnect()`.
struct StreamSession {
    id: Uuid,
    sink: EventSink,
    ticker: Option<TimerTask>,
    pending_reconnect: Option<TimerTask>,
    retry_count: u32,
    exhausted: bool,
}

impl StreamSession {
    fn new(sink: EventSink) -> Self {
        Self {
            id: Uuid::new_v4(),
            sink,
            ticker: None,
            pending_reconnect: None,
            retry_count: 0,
            exhausted: false,
        }
    }

    fn is_streaming(&self) -> bool {
        self.ticker.is_some()
    }

    fn stop_timers(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.cancel();
        }
        if let Some(pending) = self.pending_reconnect.take() {
            pending.cancel();
        }
    }

    /// Returns `false` once the consumer has gone away.
    fn emit(&self, event: StreamEvent) -> bool {
        self.sink.send(event).is_ok()
    }
}

struct SourceState {
    session: Option<StreamSession>,
    generator: VitalsGenerator,
    epoch: u64,
}

impl SourceState {
    fn next_epoch(&mut self) -> u64 {
        self.epoch += 1;
        self.epoch
    }
}

/// Periodic emitter of simulated readings with connection lifecycle and
/// reconnect backoff.
///
/// Returns `Arc<Self>` from [`StreamSource::new`] because tick and reconnect
/// tasks hold a reference back to the source. All methods that start timers
/// must be called from within a tokio runtime.
pub struct StreamSource {
    config: StreamConfig,
    connector: Arc<dyn FeedConnector>,
    status: StatusAuthority,
    state: Mutex<SourceState>,
}

impl StreamSource {
    pub fn new(
        config: StreamConfig,
        connector: Arc<dyn FeedConnector>,
        generator: VitalsGenerator,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            connector,
            status: StatusAuthority::new(),
            state: Mutex::new(SourceState {
                session: None,
                generator,
                epoch: 0,
            }),
        })
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Read access to the connection status authority
    pub fn status(&self) -> &StatusAuthority {
        &self.status
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.status.current()
    }

    /// Whether ticks are currently scheduled
    pub fn is_streaming(&self) -> bool {
        self.lock()
            .session
            .as_ref()
            .map_or(false, StreamSession::is_streaming)
    }

    pub fn has_session(&self) -> bool {
        self.lock().session.is_some()
    }

    /// Retry counter of the current session, if any
    pub fn retry_count(&self) -> Option<u32> {
        self.lock().session.as_ref().map(|s| s.retry_count)
    }

    /// Start streaming into `sink`.
    ///
    /// Status jumps straight to `Connected`; there is no connecting phase on
    /// this path. A no-op if a session is already streaming.
    pub fn connect(self: &Arc<Self>, sink: EventSink) -> Result<(), StreamError> {
        let mut state = self.lock();

        if state
            .session
            .as_ref()
            .map_or(false, StreamSession::is_streaming)
        {
            debug!("connect() ignored: stream already active");
            return Ok(());
        }

        if let Some(mut stale) = state.session.take() {
            stale.stop_timers();
        }

        if let Err(e) = self.connector.open() {
            warn!("Failed to open {} feed: {}", self.connector.name(), e);
            if self.status.set(ConnectionState::Disconnected) {
                let _ = sink.send(StreamEvent::Status(ConnectionState::Disconnected));
            }
            return Err(e);
        }

        let epoch = state.next_epoch();
        let mut session = StreamSession::new(sink);
        self.start_streaming(&mut session, epoch);
        info!(
            "Stream session {} connected to {} feed",
            session.id,
            self.connector.name()
        );
        state.session = Some(session);
        Ok(())
    }

    /// Stop streaming and release the session.
    ///
    /// No tick or reconnect fires after this returns. Calling it again is a
    /// no-op.
    pub fn disconnect(&self) {
        let mut state = self.lock();
        state.next_epoch();

        match state.session.take() {
            Some(mut session) => {
                session.stop_timers();
                self.notify(&session, ConnectionState::Disconnected);
                info!("Stream session {} disconnected", session.id);
            }
            None => debug!("disconnect() with no active session"),
        }
    }

    /// Tear down for a known network outage: disconnect and force the status
    /// to `Disconnected` without scheduling any retry.
    pub fn go_offline(&self) {
        self.disconnect();
        self.status.set(ConnectionState::Disconnected);
    }

    /// Drop the current stream and retry after backoff, keeping the same sink.
    ///
    /// After the ladder has been exhausted this acts as the manual trigger and
    /// starts a fresh ladder.
    pub fn reconnect(self: &Arc<Self>) -> Result<(), StreamError> {
        let mut state = self.lock();
        let epoch = state.next_epoch();
        let session = state.session.as_mut().ok_or(StreamError::NoSession)?;

        session.stop_timers();
        if session.exhausted {
            info!("Manual reconnect after exhaustion; restarting backoff");
            session.exhausted = false;
            session.retry_count = 0;
        }
        self.schedule_reconnect(session, epoch);
        Ok(())
    }

    /// Forget the generator's previous reading (e.g. at session end)
    pub fn reset_generator(&self) {
        self.lock().generator.reset();
    }

    fn lock(&self) -> MutexGuard<'_, SourceState> {
        // every critical section leaves the state consistent
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Update the authority first, then tell the session's consumer.
    fn notify(&self, session: &StreamSession, state: ConnectionState) {
        if self.status.set(state) {
            session.emit(StreamEvent::Status(state));
        }
    }

    fn start_streaming(self: &Arc<Self>, session: &mut StreamSession, epoch: u64) {
        session.retry_count = 0;
        session.exhausted = false;
        self.notify(session, ConnectionState::Connected);
        session.ticker = Some(TimerTask {
            epoch,
            handle: self.spawn_ticker(epoch),
        });
    }

    fn spawn_ticker(self: &Arc<Self>, epoch: u64) -> JoinHandle<()> {
        let source = Arc::downgrade(self);
        let period = self.config.tick_interval;

        tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let source = match source.upgrade() {
                    Some(source) => source,
                    None => break,
                };
                if !source.tick(epoch) {
                    break;
                }
            }
        })
    }

    /// Generate and emit one reading. Returns `false` when the ticker should stop.
    fn tick(&self, epoch: u64) -> bool {
        let mut state = self.lock();
        let SourceState {
            session, generator, ..
        } = &mut *state;

        let current = match session.as_ref() {
            Some(s) => s.ticker.as_ref().map(|t| t.epoch) == Some(epoch),
            None => false,
        };
        if !current {
            return false;
        }

        let reading = generator.next_reading();
        let delivered = session
            .as_ref()
            .map_or(false, |s| s.emit(StreamEvent::Reading(reading)));

        if !delivered {
            warn!("Stream consumer went away; dropping session");
            if let Some(mut gone) = session.take() {
                gone.ticker.take();
                gone.stop_timers();
            }
            self.status.set(ConnectionState::Disconnected);
        }
        delivered
    }

    fn schedule_reconnect(self: &Arc<Self>, session: &mut StreamSession, epoch: u64) {
        let delay = self.config.backoff.delay_for(session.retry_count);
        session.retry_count += 1;
        self.notify(session, ConnectionState::Reconnecting);
        info!(
            "Reconnect attempt {} scheduled in {:?}",
            session.retry_count, delay
        );

        let source = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            time::sleep(delay).await;
            if let Some(source) = source.upgrade() {
                source.on_reconnect_due(epoch);
            }
        });
        session.pending_reconnect = Some(TimerTask { epoch, handle });
    }

    fn on_reconnect_due(self: &Arc<Self>, epoch: u64) {
        let mut state = self.lock();
        let next_epoch = state.next_epoch();
        let session = match state.session.as_mut() {
            Some(session) => session,
            None => return,
        };
        match &session.pending_reconnect {
            Some(pending) if pending.epoch == epoch => {}
            _ => return,
        }
        // this task is the one finishing; dropping its handle does not abort it
        session.pending_reconnect = None;

        if session.retry_count > self.config.backoff.max_retries {
            self.park_exhausted(session);
            return;
        }

        match self.connector.open() {
            Ok(()) => {
                info!(
                    "Stream session {} reconnected after {} attempt(s)",
                    session.id, session.retry_count
                );
                self.start_streaming(session, next_epoch);
            }
            Err(e) => {
                warn!("Reconnect attempt {} failed: {}", session.retry_count, e);
                if self.config.backoff.is_exhausted(session.retry_count) {
                    self.park_exhausted(session);
                } else {
                    self.schedule_reconnect(session, next_epoch);
                }
            }
        }
    }

    /// Settle in `Disconnected` until something external triggers a retry.
    fn park_exhausted(&self, session: &mut StreamSession) {
        session.exhausted = true;
        let attempts = session.retry_count;
        warn!("Giving up on the feed after {} reconnect attempts", attempts);
        self.notify(session, ConnectionState::Disconnected);
        session.emit(StreamEvent::RetriesExhausted { attempts });
    }
}

impl Drop for StreamSource {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(|e| e.into_inner());
        if let Some(mut session) = state.session.take() {
            session.stop_timers();
        }
    }
}
