// Test segmentation engine
//
// Groups consecutive samples into tests using gap timing alone. The engine is
// a synchronous state machine driven by the reader with explicit timestamps,
// so the same code runs against a live source and against scripted timelines
// in tests.
//
// States: NoTest -> InTest on the first sample; InTest -> NoTest when the gap
// threshold expires, the source disconnects, or the reader stops.

use crate::config::SegmentationConfig;
use crate::types::{CompletionReason, Event, Sample, TestId};
use std::collections::VecDeque;
use std::time::Duration;

/// Smallest step used to keep arrival times strictly increasing
const MIN_TICK: Duration = Duration::from_nanos(1);

#[derive(Debug, Clone)]
struct ActiveTest {
    id: TestId,
    last_sample_at: Duration,
    sample_count: u64,
    intervals: VecDeque<Duration>,
}

#[derive(Debug, Clone)]
enum SegmentState {
    NoTest,
    InTest(ActiveTest),
}

/// Per-stream segmentation state
///
/// Owns the adaptive threshold, so independent streams never share timing
/// state.
#[derive(Debug, Clone)]
pub struct Segmenter {
    config: SegmentationConfig,
    state: SegmentState,
    threshold: Duration,
    next_test_id: TestId,
    last_arrival: Option<Duration>,
}

impl Segmenter {
    pub fn new(config: SegmentationConfig) -> Self {
        let threshold = config.initial_threshold();
        Self {
            config,
            state: SegmentState::NoTest,
            threshold,
            next_test_id: 1,
            last_arrival: None,
        }
    }

    /// Number tests from `first_id` instead of 1
    pub fn starting_at(mut self, first_id: TestId) -> Self {
        self.next_test_id = first_id.max(1);
        self
    }

    pub fn config(&self) -> &SegmentationConfig {
        &self.config
    }

    /// Gap threshold currently in force
    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    pub fn is_in_test(&self) -> bool {
        matches!(self.state, SegmentState::InTest(_))
    }

    pub fn current_test(&self) -> Option<TestId> {
        match &self.state {
            SegmentState::InTest(active) => Some(active.id),
            SegmentState::NoTest => None,
        }
    }

    /// Earliest time at which [`Segmenter::check_timeout`] will close the
    /// active test, if any
    pub fn deadline(&self) -> Option<Duration> {
        match &self.state {
            SegmentState::InTest(active) => {
                Some(active.last_sample_at + self.threshold + MIN_TICK)
            }
            SegmentState::NoTest => None,
        }
    }

    /// Feed one accepted sample that arrived at `at`
    ///
    /// Returns the events to publish, in order. A gap longer than the
    /// threshold first completes the running test, then starts a new one.
    pub fn on_sample(&mut self, value: f64, at: Duration) -> Vec<Event> {
        // Coarse clocks can hand out equal readings for lines of one read
        let at = match self.last_arrival {
            Some(last) if at <= last => last + MIN_TICK,
            _ => at,
        };
        self.last_arrival = Some(at);

        let mut events = Vec::with_capacity(3);
        if let Some(event) = self.check_timeout(at) {
            events.push(event);
        }

        let sample = Sample::new(value, at);
        match &mut self.state {
            SegmentState::InTest(active) => {
                let gap = at - active.last_sample_at;
                active.last_sample_at = at;
                active.sample_count += 1;
                active.intervals.push_back(gap);
                while active.intervals.len() > self.config.interval_window.max(1) {
                    active.intervals.pop_front();
                }
                events.push(Event::SampleReceived {
                    test_id: active.id,
                    sample,
                });
                self.threshold = adapt_threshold(&self.config, &active.intervals, self.threshold);
            }
            SegmentState::NoTest => {
                let id = self.next_test_id;
                self.next_test_id += 1;
                self.threshold = self.config.initial_threshold();
                self.state = SegmentState::InTest(ActiveTest {
                    id,
                    last_sample_at: at,
                    sample_count: 1,
                    intervals: VecDeque::with_capacity(self.config.interval_window.max(1)),
                });
                log::debug!("test {} started @ {:.6}s", id, at.as_secs_f64());
                events.push(Event::TestStarted { test_id: id, at });
                events.push(Event::SampleReceived { test_id: id, sample });
            }
        }

        events
    }

    /// Close the active test if no sample arrived within the threshold
    ///
    /// The completion is stamped at the moment the threshold expired, not at
    /// `now`, so a late check does not stretch the test.
    pub fn check_timeout(&mut self, now: Duration) -> Option<Event> {
        let expired_at = match &self.state {
            SegmentState::InTest(active) if now > active.last_sample_at + self.threshold => {
                active.last_sample_at + self.threshold
            }
            _ => return None,
        };
        self.complete(expired_at, CompletionReason::GapTimeout)
    }

    /// Close the active test because the stream ended or was stopped
    pub fn finish(&mut self, now: Duration, reason: CompletionReason) -> Option<Event> {
        let at = match &self.state {
            SegmentState::InTest(active) => now.max(active.last_sample_at),
            SegmentState::NoTest => return None,
        };
        self.complete(at, reason)
    }

    /// Return to `NoTest` for a new connection attempt
    ///
    /// A test left open by the previous connection is completed as
    /// disconnected; it is never resumed.
    pub fn reset(&mut self, now: Duration) -> Option<Event> {
        let event = self.finish(now, CompletionReason::Disconnected);
        self.threshold = self.config.initial_threshold();
        event
    }

    fn complete(&mut self, at: Duration, reason: CompletionReason) -> Option<Event> {
        match std::mem::replace(&mut self.state, SegmentState::NoTest) {
            SegmentState::InTest(active) => {
                log::debug!(
                    "test {} complete ({}), n={}, threshold={:?}",
                    active.id,
                    reason,
                    active.sample_count,
                    self.threshold
                );
                Some(Event::TestCompleted {
                    test_id: active.id,
                    at,
                    reason,
                })
            }
            SegmentState::NoTest => None,
        }
    }
}

/// Threshold derived from the median of the recent intervals
fn adapt_threshold(
    config: &SegmentationConfig,
    intervals: &VecDeque<Duration>,
    current: Duration,
) -> Duration {
    if !config.adaptive || intervals.len() < config.min_intervals {
        return current;
    }
    let mut sorted: Vec<Duration> = intervals.iter().copied().collect();
    sorted.sort_unstable();
    let mid = sorted.len() / 2;
    let median = if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2
    } else {
        sorted[mid]
    };
    config.scaled_threshold(median)
}
