// Producer loop
//
// Owns the line source, the parser and the segmenter. One task runs
// `Reader::run`: read a line, parse it, feed the segmenter, push the
// resulting events. The only suspension points are the source read, the
// gap-timeout timer and the reconnect back-off, all raced against the stop
// signal, so a stop never waits on a silent source.

use crate::buffer::EventQueue;
use crate::config::{ReconnectPolicy, SegmentationConfig};
use crate::parser::{ParseError, SampleParser};
use crate::segmenter::Segmenter;
use crate::source::LineSource;
use crate::types::{
    CompletionReason, ConnectionState, Event, StreamError, StreamResult, TestId,
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;

/// Producer-side counters, updated atomically while the reader runs
#[derive(Debug, Default)]
pub struct ReaderCounters {
    lines_read: AtomicU64,
    samples_accepted: AtomicU64,
    lines_rejected: AtomicU64,
    lines_discarded: AtomicU64,
    tests_started: AtomicU64,
    tests_completed: AtomicU64,
    connections: AtomicU64,
    reconnect_attempts: AtomicU64,
}

/// Point-in-time copy of [`ReaderCounters`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReaderStats {
    pub lines_read: u64,
    pub samples_accepted: u64,
    pub lines_rejected: u64,
    /// Over-long lines dropped by the source's framing, never parsed
    pub lines_discarded: u64,
    pub tests_started: u64,
    pub tests_completed: u64,
    pub connections: u64,
    pub reconnect_attempts: u64,
}

impl ReaderCounters {
    pub fn snapshot(&self) -> ReaderStats {
        ReaderStats {
            lines_read: self.lines_read.load(Ordering::Relaxed),
            samples_accepted: self.samples_accepted.load(Ordering::Relaxed),
            lines_rejected: self.lines_rejected.load(Ordering::Relaxed),
            lines_discarded: self.lines_discarded.load(Ordering::Relaxed),
            tests_started: self.tests_started.load(Ordering::Relaxed),
            tests_completed: self.tests_completed.load(Ordering::Relaxed),
            connections: self.connections.load(Ordering::Relaxed),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
        }
    }
}

/// How one connection ended
enum ConnectionEnd {
    Stopped,
    Closed(String),
    Failed(StreamError),
}

pub struct Reader {
    source: Box<dyn LineSource>,
    parser: SampleParser,
    segmenter: Segmenter,
    queue: Arc<EventQueue>,
    reconnect: ReconnectPolicy,
    epoch: Instant,
    counters: Arc<ReaderCounters>,
    cancel: CancellationToken,
}

impl Reader {
    pub fn new(
        source: Box<dyn LineSource>,
        segmentation: SegmentationConfig,
        reconnect: ReconnectPolicy,
        queue: Arc<EventQueue>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            source,
            parser: SampleParser::default(),
            segmenter: Segmenter::new(segmentation),
            queue,
            reconnect,
            epoch: Instant::now(),
            counters: Arc::new(ReaderCounters::default()),
            cancel,
        }
    }

    /// Measure arrival times from `epoch` instead of the moment of creation
    pub fn with_epoch(mut self, epoch: Instant) -> Self {
        self.epoch = epoch;
        self
    }

    /// Share counters with the owner of the reader
    pub fn with_counters(mut self, counters: Arc<ReaderCounters>) -> Self {
        self.counters = counters;
        self
    }

    /// Continue test numbering of an earlier acquisition
    pub fn with_first_test_id(mut self, first_id: TestId) -> Self {
        self.segmenter = self.segmenter.starting_at(first_id);
        self
    }

    pub fn counters(&self) -> Arc<ReaderCounters> {
        Arc::clone(&self.counters)
    }

    pub fn parser(&self) -> &SampleParser {
        &self.parser
    }

    /// Run until stopped, or until the source is gone for good
    ///
    /// Returns `Ok` after a stop or a clean end of stream with no retry left,
    /// and the error that ended the acquisition otherwise. In every case the
    /// active test has been completed and the final connection state
    /// published before this returns.
    pub async fn run(mut self) -> StreamResult<()> {
        log::info!("Reader started on {}", self.source.describe());
        let mut retries: u32 = 0;

        loop {
            self.publish(Event::connection(
                ConnectionState::Connecting,
                Some(self.source.describe()),
            ));

            let connected = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return self.shutdown().await,
                result = self.source.connect() => result,
            };

            let failure = match connected {
                Ok(()) => {
                    retries = 0;
                    self.counters.connections.fetch_add(1, Ordering::Relaxed);
                    self.publish(Event::connection(ConnectionState::Connected, None));

                    match self.pump().await {
                        ConnectionEnd::Stopped => return self.shutdown().await,
                        ConnectionEnd::Closed(reason) => {
                            self.end_connection(&reason).await;
                            None
                        }
                        ConnectionEnd::Failed(e) if e.is_fatal() => {
                            self.close_source().await;
                            return self.fail(e);
                        }
                        ConnectionEnd::Failed(e) => {
                            self.end_connection(&e.to_string()).await;
                            Some(e)
                        }
                    }
                }
                Err(e) if e.is_fatal() => return self.fail(e),
                Err(e) => {
                    log::warn!("Connection attempt failed: {}", e);
                    self.publish(Event::connection(
                        ConnectionState::Disconnected,
                        Some(e.to_string()),
                    ));
                    Some(e)
                }
            };

            if !self.reconnect.allows_retry(retries) {
                return match failure {
                    Some(e) => self.fail(e),
                    None => {
                        log::info!("Reader finished, stream ended");
                        Ok(())
                    }
                };
            }

            retries += 1;
            self.counters
                .reconnect_attempts
                .fetch_add(1, Ordering::Relaxed);
            log::info!(
                "Reconnecting in {} ms (attempt {})",
                self.reconnect.interval_ms,
                retries
            );

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return self.shutdown().await,
                _ = sleep(self.reconnect.interval()) => {}
            }
        }
    }

    /// Read one connection until it ends or the reader is stopped
    async fn pump(&mut self) -> ConnectionEnd {
        loop {
            let deadline = self.segmenter.deadline().map(|d| self.epoch + d);

            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => return ConnectionEnd::Stopped,

                line = self.source.next_line() => {
                    self.counters
                        .lines_discarded
                        .store(self.source.discarded_lines(), Ordering::Relaxed);
                    match line {
                        Ok(Some(line)) => self.handle_line(&line),
                        Ok(None) => return ConnectionEnd::Closed("Connection closed".to_string()),
                        Err(e) => return ConnectionEnd::Failed(e),
                    }
                },

                _ = wait_until(deadline) => {
                    let now = self.now();
                    if let Some(event) = self.segmenter.check_timeout(now) {
                        self.publish(event);
                    }
                }
            }
        }
    }

    fn handle_line(&mut self, line: &str) {
        self.counters.lines_read.fetch_add(1, Ordering::Relaxed);

        match self.parser.parse(line) {
            Ok(value) => {
                self.counters
                    .samples_accepted
                    .fetch_add(1, Ordering::Relaxed);
                let now = self.now();
                for event in self.segmenter.on_sample(value, now) {
                    self.publish(event);
                }
            }
            Err(ParseError::Empty) => {}
            Err(e) => {
                self.counters.lines_rejected.fetch_add(1, Ordering::Relaxed);
                log::debug!("Discarding line: {}", StreamError::from(e));
            }
        }
    }

    /// Complete the active test and report the connection as gone
    async fn end_connection(&mut self, reason: &str) {
        let now = self.now();
        if let Some(event) = self.segmenter.reset(now) {
            self.publish(event);
        }
        self.close_source().await;
        log::warn!("Source disconnected: {}", reason);
        self.publish(Event::connection(
            ConnectionState::Disconnected,
            Some(reason.to_string()),
        ));
    }

    /// Cooperative stop: finalize the active test and close the source
    async fn shutdown(&mut self) -> StreamResult<()> {
        let now = self.now();
        if let Some(event) = self.segmenter.finish(now, CompletionReason::Stopped) {
            self.publish(event);
        }
        self.close_source().await;
        self.publish(Event::connection(
            ConnectionState::Disconnected,
            Some("Stopped".to_string()),
        ));
        log::info!("Reader stopped");
        Ok(())
    }

    async fn close_source(&mut self) {
        if let Err(e) = self.source.close().await {
            log::debug!("Error closing source: {}", e);
        }
    }

    fn fail(&mut self, error: StreamError) -> StreamResult<()> {
        let now = self.now();
        if let Some(event) = self.segmenter.reset(now) {
            self.publish(event);
        }
        log::error!("Source failed: {}", error);
        self.publish(Event::connection(
            ConnectionState::Failed,
            Some(error.to_string()),
        ));
        Err(error)
    }

    fn publish(&self, event: Event) {
        match &event {
            Event::TestStarted { .. } => {
                self.counters.tests_started.fetch_add(1, Ordering::Relaxed);
            }
            Event::TestCompleted { .. } => {
                self.counters.tests_completed.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
        self.queue.push(event);
    }

    fn now(&self) -> Duration {
        Instant::now().saturating_duration_since(self.epoch)
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
