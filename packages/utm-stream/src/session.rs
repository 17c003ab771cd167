// Test session - the consumer-side view of one acquisition
//
// Drains the event queue on each poll and applies the events, in order, to
// the authoritative test collection. Everything handed out is an owned
// snapshot; the live tests keep changing on later polls without affecting
// snapshots already returned.

use crate::buffer::EventQueue;
use crate::stats::{RateEstimator, RunningStats, StatsSnapshot};
use crate::types::{
    duration_secs, option_duration_secs, CompletionReason, ConnectionState, Event, Sample,
    StreamError, StreamResult, TestId, TestState,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// One run of consecutive samples
#[derive(Debug, Clone)]
pub struct Test {
    id: TestId,
    state: TestState,
    samples: Vec<Sample>,
    started_at: Duration,
    ended_at: Option<Duration>,
    completion: Option<CompletionReason>,
    stats: RunningStats,
    rate: RateEstimator,
}

impl Test {
    fn new(id: TestId, started_at: Duration) -> Self {
        Self {
            id,
            state: TestState::Active,
            samples: Vec::new(),
            started_at,
            ended_at: None,
            completion: None,
            stats: RunningStats::new(),
            rate: RateEstimator::new(),
        }
    }

    fn push(&mut self, sample: Sample) {
        self.stats.update(sample.value);
        self.rate.update(sample.at);
        self.samples.push(sample);
    }

    fn complete(&mut self, at: Duration, reason: CompletionReason) {
        self.state = TestState::Completed;
        self.ended_at = Some(at);
        self.completion = Some(reason);
    }

    fn last_sample_at(&self) -> Duration {
        self.samples.last().map_or(self.started_at, |s| s.at)
    }

    pub fn id(&self) -> TestId {
        self.id
    }

    pub fn state(&self) -> TestState {
        self.state
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }
}

/// Statistics and timing of a test, without its samples
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestSummary {
    pub id: TestId,
    pub state: TestState,
    #[serde(with = "duration_secs")]
    pub started_at: Duration,
    #[serde(with = "option_duration_secs")]
    pub ended_at: Option<Duration>,
    pub started_wall: DateTime<Utc>,
    pub completion: Option<CompletionReason>,
    pub stats: StatsSnapshot,
    pub estimated_rate_hz: Option<f64>,
    pub estimated_duration_s: Option<f64>,
}

/// Immutable copy of a test, raw samples included
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestSnapshot {
    #[serde(flatten)]
    pub summary: TestSummary,
    pub samples: Vec<Sample>,
}

impl TestSnapshot {
    pub fn id(&self) -> TestId {
        self.summary.id
    }

    pub fn stats(&self) -> &StatsSnapshot {
        &self.summary.stats
    }

    pub fn values(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.value).collect()
    }
}

/// Authoritative test collection and connection state of one acquisition
pub struct TestSession {
    id: Uuid,
    queue: Arc<EventQueue>,
    epoch_wall: DateTime<Utc>,
    tests: Vec<Test>,
    active: Option<TestId>,
    last_test_id: TestId,
    connection: ConnectionState,
    disconnect_reason: Option<String>,
    ignored_events: u64,
}

impl TestSession {
    /// Create a session consuming `queue`; wall-clock times are relative to now
    pub fn new(queue: Arc<EventQueue>) -> Self {
        Self::with_epoch(queue, Utc::now())
    }

    /// Create a session whose monotonic offsets start at `epoch_wall`
    pub fn with_epoch(queue: Arc<EventQueue>, epoch_wall: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            queue,
            epoch_wall,
            tests: Vec::new(),
            active: None,
            last_test_id: 0,
            connection: ConnectionState::Disconnected,
            disconnect_reason: None,
            ignored_events: 0,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn queue(&self) -> &Arc<EventQueue> {
        &self.queue
    }

    /// Drain the queue and apply every pending event
    ///
    /// Returns the applied events in production order so a consumer can
    /// render them.
    pub fn process_events(&mut self) -> Vec<Event> {
        let events = self.queue.drain();
        for event in &events {
            self.apply(event);
        }
        events
    }

    /// Apply one event to the collection
    pub fn apply(&mut self, event: &Event) {
        match event {
            Event::TestStarted { test_id, at } => {
                if *test_id <= self.last_test_id {
                    log::warn!("test id {} is not newer than {}", test_id, self.last_test_id);
                    self.ignored_events += 1;
                    return;
                }
                if let Some(previous) = self.active.take() {
                    log::warn!(
                        "test {} started while test {} still active, closing it",
                        test_id,
                        previous
                    );
                    if let Some(test) = self.find_mut(previous) {
                        let last = test.last_sample_at();
                        test.complete(last, CompletionReason::Disconnected);
                    }
                }
                self.tests.push(Test::new(*test_id, *at));
                self.active = Some(*test_id);
                self.last_test_id = *test_id;
                log::debug!("started test #{}", test_id);
            }

            Event::SampleReceived { test_id, sample } => match self.find_mut(*test_id) {
                Some(test) if test.state == TestState::Active => test.push(*sample),
                _ => {
                    self.ignored_events += 1;
                    log::trace!("sample for inactive or deleted test {} ignored", test_id);
                }
            },

            Event::TestCompleted {
                test_id,
                at,
                reason,
            } => {
                if self.active == Some(*test_id) {
                    self.active = None;
                }
                match self.find_mut(*test_id) {
                    Some(test) if test.state == TestState::Active => {
                        test.complete(*at, *reason);
                        log::debug!(
                            "completed test #{} ({}), n={}",
                            test_id,
                            reason,
                            test.sample_count()
                        );
                    }
                    _ => self.ignored_events += 1,
                }
            }

            Event::ConnectionChanged { state, detail } => {
                self.connection = *state;
                match state {
                    ConnectionState::Connected => self.disconnect_reason = None,
                    ConnectionState::Connecting => {}
                    ConnectionState::Disconnected | ConnectionState::Failed => {
                        self.disconnect_reason =
                            Some(detail.clone().unwrap_or_else(|| state.to_string()));
                        if let Some(active) = self.active.take() {
                            if let Some(test) = self.find_mut(active) {
                                let last = test.last_sample_at();
                                test.complete(last, CompletionReason::Disconnected);
                            }
                        }
                    }
                }
                log::debug!("connection {}", state);
            }
        }
    }

    /// Snapshots of every visible test, oldest first
    pub fn list_tests(&self) -> Vec<TestSnapshot> {
        self.tests.iter().map(|t| self.snapshot(t)).collect()
    }

    /// Summaries of every visible test, without sample data
    pub fn summaries(&self) -> Vec<TestSummary> {
        self.tests.iter().map(|t| self.summary(t)).collect()
    }

    pub fn get_test(&self, id: TestId) -> StreamResult<TestSnapshot> {
        self.find(id)
            .map(|t| self.snapshot(t))
            .ok_or(StreamError::TestNotFound(id))
    }

    pub fn test_count(&self) -> usize {
        self.tests.len()
    }

    /// Highest test id seen, deleted tests included; 0 before the first test
    pub fn last_test_id(&self) -> TestId {
        self.last_test_id
    }

    pub fn active_test(&self) -> Option<TestId> {
        self.active.filter(|id| self.find(*id).is_some())
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection
    }

    /// Reason given for the last disconnect or failure, cleared on reconnect
    pub fn disconnect_reason(&self) -> Option<&str> {
        self.disconnect_reason.as_deref()
    }

    /// Events that referred to a deleted or already completed test
    pub fn ignored_events(&self) -> u64 {
        self.ignored_events
    }

    /// Remove a test from the collection
    ///
    /// Deleting the active test hides it; its remaining samples are discarded
    /// until the producer completes it.
    pub fn delete_test(&mut self, id: TestId) -> StreamResult<()> {
        let index = self.index_of(id).ok_or(StreamError::TestNotFound(id))?;
        self.tests.remove(index);
        log::debug!("deleted test #{}", id);
        Ok(())
    }

    /// Remove every test
    pub fn clear(&mut self) {
        self.tests.clear();
    }

    fn index_of(&self, id: TestId) -> Option<usize> {
        self.tests.binary_search_by_key(&id, |t| t.id).ok()
    }

    fn find(&self, id: TestId) -> Option<&Test> {
        self.index_of(id).map(|i| &self.tests[i])
    }

    fn find_mut(&mut self, id: TestId) -> Option<&mut Test> {
        self.index_of(id).map(move |i| &mut self.tests[i])
    }

    fn summary(&self, test: &Test) -> TestSummary {
        let offset =
            chrono::Duration::from_std(test.started_at).unwrap_or_else(|_| chrono::Duration::zero());
        TestSummary {
            id: test.id,
            state: test.state,
            started_at: test.started_at,
            ended_at: test.ended_at,
            started_wall: self.epoch_wall + offset,
            completion: test.completion,
            stats: test.stats.snapshot(),
            estimated_rate_hz: test.rate.rate_hz(),
            estimated_duration_s: test.rate.duration_secs(),
        }
    }

    fn snapshot(&self, test: &Test) -> TestSnapshot {
        TestSnapshot {
            summary: self.summary(test),
            samples: test.samples.clone(),
        }
    }
}
