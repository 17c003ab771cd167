// Acquisition controller - wires the producer task to the consumer poll
//
// The controller manages:
// - Line source lifecycle (create, hand to the reader, stop)
// - The producer task running `Reader::run`
// - A consumer task draining the event queue into the shared session at a
//   fixed cadence
// - Event emission to an optional callback
// - Task cancellation via CancellationToken for graceful shutdown

use crate::buffer::{EventQueue, QueueMetrics};
use crate::config::LoggerConfig;
use crate::reader::{Reader, ReaderCounters, ReaderStats};
use crate::session::TestSession;
use crate::source::{create_source, LineSource};
use crate::types::{ConnectionState, Event, StreamError, StreamResult};
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Callback invoked on the consumer side for every applied event
pub type EventCallback = Box<dyn Fn(&Event) + Send + Sync>;

/// Snapshot of controller activity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerStats {
    pub session_id: Uuid,
    pub connection: ConnectionState,
    pub tests: usize,
    pub reader: ReaderStats,
    pub queue: QueueMetrics,
}

/// Main acquisition controller
pub struct StreamController {
    config: LoggerConfig,
    source: Option<Box<dyn LineSource>>,

    queue: Arc<EventQueue>,
    session: Arc<RwLock<TestSession>>,
    counters: Arc<ReaderCounters>,
    epoch: Instant,

    cancel_token: CancellationToken,
    reader_task: Option<JoinHandle<StreamResult<()>>>,
    consumer_task: Option<JoinHandle<()>>,

    event_callback: Arc<RwLock<Option<EventCallback>>>,
    /// Serializes drain plus callback dispatch across pollers
    dispatch: Arc<Mutex<()>>,
}

impl StreamController {
    /// Create a controller reading from the configured source
    pub fn new(config: LoggerConfig) -> StreamResult<Self> {
        config.validate()?;
        Ok(Self::build(config, None))
    }

    /// Create a controller around an already constructed source
    ///
    /// `config.source` is ignored.
    pub fn with_source(config: LoggerConfig, source: Box<dyn LineSource>) -> StreamResult<Self> {
        config.segmentation.validate()?;
        if config.queue.capacity == 0 || config.poll_interval_ms == 0 {
            return Err(StreamError::InvalidConfig(
                "queue capacity and poll interval must be positive".to_string(),
            ));
        }
        Ok(Self::build(config, Some(source)))
    }

    fn build(config: LoggerConfig, source: Option<Box<dyn LineSource>>) -> Self {
        let queue = Arc::new(EventQueue::from_config(&config.queue));
        let session = TestSession::with_epoch(Arc::clone(&queue), Utc::now());
        let epoch = Instant::now();

        Self {
            config,
            source,
            queue,
            session: Arc::new(RwLock::new(session)),
            counters: Arc::new(ReaderCounters::default()),
            epoch,
            cancel_token: CancellationToken::new(),
            reader_task: None,
            consumer_task: None,
            event_callback: Arc::new(RwLock::new(None)),
            dispatch: Arc::new(Mutex::new(())),
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session.read().id()
    }

    /// Shared handle to the test session
    ///
    /// Readers get a consistent view between two polls. Hold the lock
    /// briefly; the consumer task needs it to apply events.
    pub fn session(&self) -> Arc<RwLock<TestSession>> {
        Arc::clone(&self.session)
    }

    pub fn config(&self) -> &LoggerConfig {
        &self.config
    }

    /// Set event callback function
    ///
    /// Runs on the consumer task after the events of a poll have been
    /// applied, outside the session lock. The callback must not call
    /// [`StreamController::poll`].
    pub fn set_event_callback<F>(&self, callback: F)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        *self.event_callback.write() = Some(Box::new(callback));
    }

    /// Start acquisition
    ///
    /// Must be called from within a tokio runtime. A controller built with
    /// [`StreamController::with_source`] can only be started once.
    pub fn start(&mut self) -> StreamResult<()> {
        if self.is_running() {
            return Err(StreamError::AlreadyRunning);
        }

        let source = match self.source.take() {
            Some(source) => source,
            None => {
                let config = self.config.source.as_ref().ok_or_else(|| {
                    StreamError::InvalidConfig("no source configured".to_string())
                })?;
                create_source(config)?
            }
        };

        log::info!(
            "Starting acquisition {} on {}",
            self.session_id(),
            source.describe()
        );

        self.cancel_token = CancellationToken::new();
        let first_test_id = self.session.read().last_test_id() + 1;

        let reader = Reader::new(
            source,
            self.config.segmentation.clone(),
            self.config.reconnect.clone(),
            Arc::clone(&self.queue),
            self.cancel_token.clone(),
        )
        .with_epoch(self.epoch)
        .with_counters(Arc::clone(&self.counters))
        .with_first_test_id(first_test_id);

        self.reader_task = Some(tokio::spawn(reader.run()));
        self.start_consumer();

        Ok(())
    }

    /// Spawn the timer-driven consumer poll
    fn start_consumer(&mut self) {
        let session = Arc::clone(&self.session);
        let event_callback = Arc::clone(&self.event_callback);
        let dispatch = Arc::clone(&self.dispatch);
        let cancel_token = self.cancel_token.clone();
        let poll_interval = self.config.poll_interval();

        self.consumer_task = Some(tokio::spawn(async move {
            let mut tick = interval(poll_interval);
            tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;

                    _ = cancel_token.cancelled() => {
                        log::debug!("Consumer poll cancelled");
                        break;
                    }

                    _ = tick.tick() => {
                        apply_pending(&session, &event_callback, &dispatch);
                    }
                }
            }
        }));
    }

    /// Drain and apply pending events now, outside the regular cadence
    ///
    /// Safe to call while the consumer task runs: the callback still sees
    /// every event exactly once, in production order.
    pub fn poll(&self) -> Vec<Event> {
        apply_pending(&self.session, &self.event_callback, &self.dispatch)
    }

    /// Stop acquisition
    ///
    /// Signals the reader, waits for it to finalize the active test, then
    /// applies the remaining events. Returns the reader's own error, if it
    /// had already failed.
    pub async fn stop(&mut self) -> StreamResult<()> {
        if self.reader_task.is_none() {
            return Ok(());
        }

        log::info!("Stopping acquisition {}", self.session_id());
        self.cancel_token.cancel();
        let result = self.join().await;

        log::info!("Acquisition stopped");
        result
    }

    /// Wait for the reader to end on its own
    ///
    /// That happens when the source ended and no reconnect is allowed, or
    /// after a fatal source error.
    pub async fn wait(&mut self) -> StreamResult<()> {
        let result = self.join().await;
        self.cancel_token.cancel();
        result
    }

    async fn join(&mut self) -> StreamResult<()> {
        let result = match self.reader_task.take() {
            Some(task) => task
                .await
                .map_err(|e| StreamError::Fatal(format!("reader task failed: {}", e)))
                .and_then(|result| result),
            None => Ok(()),
        };

        self.cancel_token.cancel();
        if let Some(task) = self.consumer_task.take() {
            if let Err(e) = task.await {
                log::error!("Consumer task failed: {}", e);
            }
        }
        apply_pending(&self.session, &self.event_callback, &self.dispatch);

        result
    }

    /// Whether the reader task is still running
    pub fn is_running(&self) -> bool {
        self.reader_task
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Get the cancellation token for external cancellation support
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    pub fn reader_stats(&self) -> ReaderStats {
        self.counters.snapshot()
    }

    pub fn stats(&self) -> ControllerStats {
        let session = self.session.read();
        ControllerStats {
            session_id: session.id(),
            connection: session.connection_state(),
            tests: session.test_count(),
            reader: self.counters.snapshot(),
            queue: self.queue.metrics(),
        }
    }
}

impl Drop for StreamController {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

/// Apply pending events to the session, then hand them to the callback
///
/// The dispatch guard is held from the drain until the last callback
/// returns, so one batch is fully delivered before the next is drained.
fn apply_pending(
    session: &RwLock<TestSession>,
    event_callback: &RwLock<Option<EventCallback>>,
    dispatch: &Mutex<()>,
) -> Vec<Event> {
    let _dispatch = dispatch.lock();
    let events = session.write().process_events();
    if !events.is_empty() {
        if let Some(callback) = event_callback.read().as_ref() {
            for event in &events {
                callback(event);
            }
        }
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ReconnectPolicy, SegmentationConfig};
    use crate::source::{ChannelLineSource, SourceConfig};
    use crate::types::TestState;
    use std::time::Duration;

    fn config() -> LoggerConfig {
        LoggerConfig {
            segmentation: SegmentationConfig::fixed(Duration::from_millis(300)),
            reconnect: ReconnectPolicy::disabled(),
            poll_interval_ms: 100,
            ..Default::default()
        }
    }

    #[test]
    fn test_new_requires_valid_source() {
        assert!(StreamController::new(config()).is_err());
        let mut with_source = config();
        with_source.source = Some(SourceConfig::Tcp {
            host: "127.0.0.1".to_string(),
            port: 9,
        });
        assert!(StreamController::new(with_source).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_twice_is_rejected() {
        let (_feed, source) = ChannelLineSource::new(4);
        let mut controller = StreamController::with_source(config(), Box::new(source)).unwrap();
        controller.start().unwrap();
        assert!(matches!(controller.start(), Err(StreamError::AlreadyRunning)));
        controller.stop().await.unwrap();
        assert!(!controller.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_callback_sees_applied_events() {
        let (feed, source) = ChannelLineSource::new(16);
        let mut controller = StreamController::with_source(config(), Box::new(source)).unwrap();

        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        controller.set_event_callback(move |event| sink.lock().push(event.clone()));
        controller.start().unwrap();

        feed.line("1.5").await.unwrap();
        feed.line("2.5").await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;

        {
            let session = controller.session();
            let session = session.read();
            assert_eq!(session.test_count(), 1);
            assert_eq!(session.get_test(1).unwrap().summary.state, TestState::Active);
        }

        drop(feed);
        controller.wait().await.unwrap();

        let events = seen.lock();
        assert!(matches!(events.first(), Some(Event::ConnectionChanged { .. })));
        assert_eq!(
            events
                .iter()
                .filter(|e| matches!(e, Event::SampleReceived { .. }))
                .count(),
            2
        );
        let stats = controller.stats();
        assert_eq!(stats.tests, 1);
        assert_eq!(stats.reader.samples_accepted, 2);
        assert_eq!(stats.connection, ConnectionState::Disconnected);
    }
}
