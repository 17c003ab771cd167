// Stream ingestion and test segmentation for universal testing machines
//
// Reads the machine's line-oriented output (one decimal value per line),
// groups consecutive samples into tests by gap timing alone, and keeps
// running statistics per test for a consumer that polls at its own cadence.
//
// Architecture:
// - `source`: Trait-based line sources (serial, TCP, Unix socket, file, channel)
// - `parser`: Line to value conversion
// - `segmenter`: Adaptive-gap test boundary detection
// - `stats`: O(1) running statistics and sample-rate estimate
// - `buffer`: Event queue between producer and consumer
// - `reader`: Producer loop with cancellation and reconnect
// - `session`: Consumer-side test collection
// - `controller`: Lifecycle management and coordination

pub mod buffer;
pub mod config;
pub mod controller;
pub mod parser;
pub mod reader;
pub mod segmenter;
pub mod session;
pub mod source;
pub mod stats;
pub mod types;

pub use buffer::{EventQueue, PushOutcome, QueueMetrics};
pub use config::{LoggerConfig, QueueConfig, ReconnectPolicy, SegmentationConfig};
pub use controller::{ControllerStats, EventCallback, StreamController};
pub use parser::{ParseError, SampleParser};
pub use reader::{Reader, ReaderCounters, ReaderStats};
pub use segmenter::Segmenter;
pub use session::{Test, TestSession, TestSnapshot, TestSummary};
pub use source::{
    create_source, list_serial_ports, ChannelInput, ChannelLineSource, LineFeed, LineSource,
    SourceConfig,
};
pub use stats::{RateEstimator, RunningStats, StatsSnapshot};
pub use types::{
    CompletionReason, ConnectionState, Event, Sample, StreamError, StreamResult, TestId,
    TestState,
};
