// Event queue between the reader and the session
//
// A FIFO with metrics tracking. Capacity is a soft bound: every sample and
// every test boundary is kept, and the only event ever replaced is a
// connection change superseded by a newer one. The consumer only holds the
// lock to swap the pending events out, so the producer is never held up by
// a slow consumer.

use crate::config::QueueConfig;
use crate::types::{Event, StreamError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

/// What happened to a pushed event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// Replaced the pending connection change at the tail
    Coalesced,
    /// Queued beyond capacity
    Overflowed,
}

/// Metrics for queue monitoring
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct QueueMetrics {
    pub total_pushed: u64,
    pub total_drained: u64,
    pub total_coalesced: u64,
    pub current_len: usize,
    pub peak_len: usize,
    pub capacity: usize,
}

/// Ordered hand-off of events from one producer to any consumer
pub struct EventQueue {
    events: Mutex<VecDeque<Event>>,
    capacity: usize,

    total_pushed: AtomicU64,
    total_drained: AtomicU64,
    total_coalesced: AtomicU64,
    peak_len: AtomicUsize,
    overflowing: AtomicBool,
}

impl EventQueue {
    /// Create a queue with the given (non-zero) capacity
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: Mutex::new(VecDeque::with_capacity(capacity.min(1 << 16))),
            capacity,
            total_pushed: AtomicU64::new(0),
            total_drained: AtomicU64::new(0),
            total_coalesced: AtomicU64::new(0),
            peak_len: AtomicUsize::new(0),
            overflowing: AtomicBool::new(false),
        }
    }

    pub fn from_config(config: &QueueConfig) -> Self {
        Self::new(config.capacity)
    }

    /// Append an event without waiting for the consumer
    pub fn push(&self, event: Event) -> PushOutcome {
        let mut events = self.events.lock();
        let mut outcome = PushOutcome::Queued;

        if events.len() >= self.capacity {
            if matches!(event, Event::ConnectionChanged { .. }) {
                if let Some(tail) = events.back_mut() {
                    if matches!(tail, Event::ConnectionChanged { .. }) {
                        *tail = event;
                        self.total_coalesced.fetch_add(1, Ordering::Relaxed);
                        return PushOutcome::Coalesced;
                    }
                }
            }

            outcome = PushOutcome::Overflowed;
            if !self.overflowing.swap(true, Ordering::Relaxed) {
                log::warn!(
                    "{} (capacity {}), consumer is falling behind",
                    StreamError::QueueOverflow(events.len() + 1),
                    self.capacity
                );
            }
        }

        events.push_back(event);
        self.total_pushed.fetch_add(1, Ordering::Relaxed);
        self.peak_len.fetch_max(events.len(), Ordering::Relaxed);
        outcome
    }

    /// Push several events in order
    pub fn push_all(&self, events: impl IntoIterator<Item = Event>) {
        for event in events {
            self.push(event);
        }
    }

    /// Take every pending event, oldest first
    ///
    /// Returns an empty vector when nothing is pending. Consecutive drains
    /// return disjoint slices of the production order.
    pub fn drain(&self) -> Vec<Event> {
        let pending = std::mem::take(&mut *self.events.lock());
        self.overflowing.store(false, Ordering::Relaxed);
        self.total_drained
            .fetch_add(pending.len() as u64, Ordering::Relaxed);
        Vec::from(pending)
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn metrics(&self) -> QueueMetrics {
        QueueMetrics {
            total_pushed: self.total_pushed.load(Ordering::Relaxed),
            total_drained: self.total_drained.load(Ordering::Relaxed),
            total_coalesced: self.total_coalesced.load(Ordering::Relaxed),
            current_len: self.len(),
            peak_len: self.peak_len.load(Ordering::Relaxed),
            capacity: self.capacity,
        }
    }

    /// Discard everything pending
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}
