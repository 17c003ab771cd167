// Common types for the stream ingestion engine
//
// Samples, events and connection state shared by the producer (reader,
// segmenter) and the consumer (session, controller), plus the error taxonomy.

use crate::parser::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Result type for streaming operations
pub type StreamResult<T> = Result<T, StreamError>;

/// Sequence number of a test within one acquisition, starting at 1
pub type TestId = u64;

/// Errors that can occur during acquisition
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Source disconnected: {0}")]
    Disconnected(String),

    #[error("Event queue overflow: {0} events pending")]
    QueueOverflow(usize),

    #[error("Fatal source error: {0}")]
    Fatal(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serial port error: {0}")]
    Serial(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Configuration file error: {0}")]
    Config(#[from] serde_json::Error),

    #[error("Test not found: {0}")]
    TestNotFound(TestId),

    #[error("Acquisition already running")]
    AlreadyRunning,
}

impl StreamError {
    /// Whether the error ends the connection without being worth a retry
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_) | Self::InvalidConfig(_) | Self::Config(_))
    }
}

/// One parsed measurement
///
/// `at` is the monotonic arrival time, measured from the epoch of the
/// acquisition that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub value: f64,
    #[serde(with = "duration_secs")]
    pub at: Duration,
}

impl Sample {
    pub fn new(value: f64, at: Duration) -> Self {
        Self { value, at }
    }
}

/// Lifecycle state of a test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestState {
    Active,
    Completed,
}

/// Why a test was completed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionReason {
    /// No sample arrived within the gap threshold
    GapTimeout,
    /// The source closed or failed
    Disconnected,
    /// The acquisition was stopped by its owner
    Stopped,
}

impl fmt::Display for CompletionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::GapTimeout => "gap timeout",
            Self::Disconnected => "disconnected",
            Self::Stopped => "stopped",
        };
        f.write_str(label)
    }
}

/// Connection state of the line source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No source attached, or the source closed
    #[default]
    Disconnected,

    /// A connection attempt is in progress
    Connecting,

    /// Lines are being read
    Connected,

    /// The source is permanently unavailable; no further attempts will be made
    Failed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Event handed from the producer to the session, in production order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    TestStarted {
        test_id: TestId,
        #[serde(with = "duration_secs")]
        at: Duration,
    },
    SampleReceived {
        test_id: TestId,
        sample: Sample,
    },
    TestCompleted {
        test_id: TestId,
        #[serde(with = "duration_secs")]
        at: Duration,
        reason: CompletionReason,
    },
    ConnectionChanged {
        state: ConnectionState,
        #[serde(default)]
        detail: Option<String>,
    },
}

impl Event {
    pub fn connection(state: ConnectionState, detail: Option<String>) -> Self {
        Self::ConnectionChanged { state, detail }
    }

    /// Test boundaries are never dropped or coalesced by the queue
    pub fn is_boundary(&self) -> bool {
        matches!(self, Self::TestStarted { .. } | Self::TestCompleted { .. })
    }

    pub fn test_id(&self) -> Option<TestId> {
        match self {
            Self::TestStarted { test_id, .. }
            | Self::SampleReceived { test_id, .. }
            | Self::TestCompleted { test_id, .. } => Some(*test_id),
            Self::ConnectionChanged { .. } => None,
        }
    }
}

/// Serde helper storing a `Duration` as fractional seconds
pub(crate) mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

/// Same as [`duration_secs`] for optional values
pub(crate) mod option_duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&d.as_secs_f64()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<f64>::deserialize(deserializer)?
            .map(|secs| Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boundary_classification() {
        let started = Event::TestStarted {
            test_id: 1,
            at: Duration::ZERO,
        };
        let sample = Event::SampleReceived {
            test_id: 1,
            sample: Sample::new(1.0, Duration::ZERO),
        };
        let conn = Event::connection(ConnectionState::Connected, None);

        assert!(started.is_boundary());
        assert!(!sample.is_boundary());
        assert!(!conn.is_boundary());
        assert_eq!(sample.test_id(), Some(1));
        assert_eq!(conn.test_id(), None);
    }

    #[test]
    fn test_event_json_shape() {
        let event = Event::TestCompleted {
            test_id: 3,
            at: Duration::from_millis(1500),
            reason: CompletionReason::GapTimeout,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "test_completed");
        assert_eq!(json["test_id"], 3);
        assert_eq!(json["at"], 1.5);
        assert_eq!(json["reason"], "gap_timeout");

        let back: Event = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_fatal_classification() {
        assert!(StreamError::Fatal("gone".into()).is_fatal());
        assert!(StreamError::InvalidConfig("bad".into()).is_fatal());
        assert!(!StreamError::Disconnected("eof".into()).is_fatal());
        assert!(!StreamError::Network("refused".into()).is_fatal());
    }
}
