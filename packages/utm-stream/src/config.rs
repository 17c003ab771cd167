// Resolved acquisition configuration
//
// Plain serde structs so a front-end can persist them however it likes; the
// engine only consumes the resolved values. Every field has a default, so a
// partial JSON document is enough.

use crate::source::SourceConfig;
use crate::types::{StreamError, StreamResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Largest accepted gap multiplier
pub const MAX_MULTIPLIER: f64 = 1000.0;

/// Gap-timing parameters for test segmentation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentationConfig {
    /// Threshold used before any interval has been observed, unless
    /// `expected_interval_ms` is set
    pub initial_threshold_ms: u64,

    /// Nominal inter-sample interval of the machine, when known
    pub expected_interval_ms: Option<u64>,

    /// Threshold = interval * multiplier (clamped)
    pub multiplier: f64,

    /// Lower clamp for the adaptive threshold
    pub min_threshold_ms: u64,

    /// Upper clamp for the adaptive threshold; keep it below the pause
    /// between physical tests
    pub max_threshold_ms: u64,

    /// Recompute the threshold from the observed intervals of the current test
    pub adaptive: bool,

    /// Number of recent intervals the median is taken over
    pub interval_window: usize,

    /// Intervals required before the adaptive threshold replaces the initial one
    pub min_intervals: usize,
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            initial_threshold_ms: 1000,
            expected_interval_ms: None,
            multiplier: 5.0,
            min_threshold_ms: 100,
            max_threshold_ms: 1000,
            adaptive: true,
            interval_window: 32,
            min_intervals: 2,
        }
    }
}

impl SegmentationConfig {
    /// A non-adaptive configuration with a constant gap threshold
    pub fn fixed(threshold: Duration) -> Self {
        let ms = threshold.as_millis() as u64;
        Self {
            initial_threshold_ms: ms,
            min_threshold_ms: ms,
            max_threshold_ms: ms,
            adaptive: false,
            ..Self::default()
        }
    }

    pub fn min_threshold(&self) -> Duration {
        Duration::from_millis(self.min_threshold_ms)
    }

    pub fn max_threshold(&self) -> Duration {
        Duration::from_millis(self.max_threshold_ms)
    }

    /// Clamp a candidate threshold into `[min_threshold, max_threshold]`
    ///
    /// The upper bound wins if the two are inverted.
    pub fn clamp(&self, candidate: Duration) -> Duration {
        candidate.max(self.min_threshold()).min(self.max_threshold())
    }

    /// `interval * multiplier`, clamped
    ///
    /// A product too large for a `Duration` saturates to `max_threshold`.
    pub fn scaled_threshold(&self, interval: Duration) -> Duration {
        match Duration::try_from_secs_f64(interval.as_secs_f64() * self.multiplier) {
            Ok(candidate) => self.clamp(candidate),
            Err(_) => self.max_threshold(),
        }
    }

    /// Threshold in force at the start of every test
    pub fn initial_threshold(&self) -> Duration {
        match self.expected_interval_ms {
            Some(interval) => self.scaled_threshold(Duration::from_millis(interval)),
            None => Duration::from_millis(self.initial_threshold_ms),
        }
    }

    pub fn validate(&self) -> StreamResult<()> {
        if !(self.multiplier.is_finite()
            && self.multiplier > 1.0
            && self.multiplier <= MAX_MULTIPLIER)
        {
            return Err(StreamError::InvalidConfig(format!(
                "multiplier must be in (1, {}], got {}",
                MAX_MULTIPLIER, self.multiplier
            )));
        }
        if self.initial_threshold_ms == 0 || self.min_threshold_ms == 0 {
            return Err(StreamError::InvalidConfig(
                "gap thresholds must be positive".to_string(),
            ));
        }
        if self.min_threshold_ms > self.max_threshold_ms {
            return Err(StreamError::InvalidConfig(format!(
                "min_threshold_ms ({}) exceeds max_threshold_ms ({})",
                self.min_threshold_ms, self.max_threshold_ms
            )));
        }
        if self.expected_interval_ms == Some(0) {
            return Err(StreamError::InvalidConfig(
                "expected_interval_ms must be positive".to_string(),
            ));
        }
        if self.adaptive && (self.interval_window == 0 || self.min_intervals == 0) {
            return Err(StreamError::InvalidConfig(
                "interval_window and min_intervals must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Event queue sizing
///
/// The capacity is a soft bound: past it the queue keeps growing and warns
/// once per backlog, so no sample or test boundary is ever lost.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { capacity: 4096 }
    }
}

/// Retry policy applied when the source disconnects or cannot be opened
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    pub enabled: bool,
    pub interval_ms: u64,
    /// `None` retries forever
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 2000,
            max_attempts: None,
        }
    }
}

impl ReconnectPolicy {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Whether another attempt may follow `attempts_so_far` failed or ended ones
    pub fn allows_retry(&self, attempts_so_far: u32) -> bool {
        self.enabled && self.max_attempts.map_or(true, |max| attempts_so_far < max)
    }
}

/// Everything needed to run one acquisition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggerConfig {
    pub source: Option<SourceConfig>,
    pub segmentation: SegmentationConfig,
    pub queue: QueueConfig,
    pub reconnect: ReconnectPolicy,
    /// Cadence of the consumer-side drain
    pub poll_interval_ms: u64,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            source: None,
            segmentation: SegmentationConfig::default(),
            queue: QueueConfig::default(),
            reconnect: ReconnectPolicy::default(),
            poll_interval_ms: 100,
        }
    }
}

impl LoggerConfig {
    pub fn new(source: SourceConfig) -> Self {
        Self {
            source: Some(source),
            ..Self::default()
        }
    }

    pub fn from_json_str(json: &str) -> StreamResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> StreamResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            StreamError::InvalidConfig(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&json)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn validate(&self) -> StreamResult<()> {
        self.segmentation.validate()?;
        if self.queue.capacity == 0 {
            return Err(StreamError::InvalidConfig(
                "queue capacity must be positive".to_string(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(StreamError::InvalidConfig(
                "poll_interval_ms must be positive".to_string(),
            ));
        }
        match &self.source {
            Some(source) => source.validate(),
            None => Err(StreamError::InvalidConfig("no source configured".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_threshold_from_expected_interval() {
        let config = SegmentationConfig {
            expected_interval_ms: Some(100),
            multiplier: 3.0,
            min_threshold_ms: 100,
            max_threshold_ms: 1000,
            ..Default::default()
        };
        assert_eq!(config.initial_threshold(), Duration::from_millis(300));

        let clamped = SegmentationConfig {
            expected_interval_ms: Some(500),
            ..config.clone()
        };
        assert_eq!(clamped.initial_threshold(), Duration::from_millis(1000));
    }

    #[test]
    fn test_huge_multiplier_saturates_instead_of_panicking() {
        let config = SegmentationConfig {
            expected_interval_ms: Some(100),
            multiplier: 1e300,
            ..Default::default()
        };
        assert!(config.validate().is_err());
        assert_eq!(config.initial_threshold(), config.max_threshold());
        assert_eq!(
            config.scaled_threshold(Duration::from_millis(1)),
            config.max_threshold()
        );

        let bounded = SegmentationConfig {
            multiplier: MAX_MULTIPLIER,
            ..Default::default()
        };
        assert!(bounded.validate().is_ok());
    }

    #[test]
    fn test_fixed_threshold() {
        let config = SegmentationConfig::fixed(Duration::from_millis(300));
        assert!(!config.adaptive);
        assert_eq!(config.initial_threshold(), Duration::from_millis(300));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let bad_multiplier = SegmentationConfig {
            multiplier: 1.0,
            ..Default::default()
        };
        assert!(bad_multiplier.validate().is_err());

        let inverted = SegmentationConfig {
            min_threshold_ms: 2000,
            max_threshold_ms: 1000,
            ..Default::default()
        };
        assert!(inverted.validate().is_err());

        let mut config = LoggerConfig::default();
        assert!(config.validate().is_err(), "missing source must be rejected");
        config.source = Some(SourceConfig::Tcp {
            host: "127.0.0.1".to_string(),
            port: 5000,
        });
        assert!(config.validate().is_ok());
        config.queue.capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = LoggerConfig::from_json_str(
            r#"{
                "source": { "type": "serial", "port": "/dev/ttyACM0", "baud_rate": 9600 },
                "segmentation": { "multiplier": 3.0 },
                "reconnect": { "enabled": false }
            }"#,
        )
        .unwrap();

        assert_eq!(config.segmentation.multiplier, 3.0);
        assert_eq!(config.segmentation.max_threshold_ms, 1000);
        assert!(!config.reconnect.enabled);
        assert_eq!(config.reconnect.interval_ms, 2000);
        assert_eq!(config.queue.capacity, 4096);
        assert_eq!(config.poll_interval_ms, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logger.json");
        let config = LoggerConfig::new(SourceConfig::Unix {
            path: "/tmp/utm.sock".to_string(),
        });
        std::fs::write(&path, serde_json::to_string_pretty(&config).unwrap()).unwrap();

        let loaded = LoggerConfig::from_json_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_reconnect_attempt_budget() {
        let policy = ReconnectPolicy {
            enabled: true,
            interval_ms: 10,
            max_attempts: Some(2),
        };
        assert!(policy.allows_retry(0));
        assert!(policy.allows_retry(1));
        assert!(!policy.allows_retry(2));
        assert!(!ReconnectPolicy::disabled().allows_retry(0));
        assert!(ReconnectPolicy::default().allows_retry(1_000));
    }
}
