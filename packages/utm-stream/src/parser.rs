// Sample parser
//
// Converts one raw line from the source into a measurement value. Lines that
// do not hold a finite decimal number are rejected; the caller discards them
// without touching segmentation timing.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

/// Largest magnitude accepted by default
pub const DEFAULT_MAX_MAGNITUDE: f64 = 1.0e12;

/// Why a line was rejected
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("empty line")]
    Empty,

    #[error("not a decimal number: {0:?}")]
    NotANumber(String),

    #[error("value out of range: {0}")]
    OutOfRange(f64),
}

/// Counters describing parser activity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParserMetrics {
    pub accepted: u64,
    pub rejected: u64,
    pub blank: u64,
}

/// Stateless line parser with diagnostic counters
#[derive(Debug)]
pub struct SampleParser {
    max_magnitude: f64,
    accepted: AtomicU64,
    rejected: AtomicU64,
    blank: AtomicU64,
}

impl Default for SampleParser {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MAGNITUDE)
    }
}

impl SampleParser {
    pub fn new(max_magnitude: f64) -> Self {
        Self {
            max_magnitude,
            accepted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            blank: AtomicU64::new(0),
        }
    }

    /// Parse a line, updating the counters
    ///
    /// Blank lines are counted separately from malformed ones.
    pub fn parse(&self, line: &str) -> Result<f64, ParseError> {
        let result = parse_value(line, self.max_magnitude);
        match &result {
            Ok(_) => self.accepted.fetch_add(1, Ordering::Relaxed),
            Err(ParseError::Empty) => self.blank.fetch_add(1, Ordering::Relaxed),
            Err(_) => self.rejected.fetch_add(1, Ordering::Relaxed),
        };
        result
    }

    pub fn metrics(&self) -> ParserMetrics {
        ParserMetrics {
            accepted: self.accepted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            blank: self.blank.load(Ordering::Relaxed),
        }
    }
}

/// Parse one line as a finite decimal float within `±max_magnitude`
///
/// Surrounding whitespace, carriage returns and NUL padding from torn reads
/// are ignored. Rust's float grammar accepts `inf` and `NaN`; both are
/// rejected here since the machine never sends them.
pub fn parse_value(line: &str, max_magnitude: f64) -> Result<f64, ParseError> {
    let trimmed = line.trim_matches(|c: char| c.is_whitespace() || c == '\0');
    if trimmed.is_empty() {
        return Err(ParseError::Empty);
    }

    if !trimmed
        .bytes()
        .all(|b| b.is_ascii_digit() || matches!(b, b'.' | b'-' | b'+' | b'e' | b'E'))
    {
        return Err(ParseError::NotANumber(trimmed.to_string()));
    }

    let value: f64 = trimmed
        .parse()
        .map_err(|_| ParseError::NotANumber(trimmed.to_string()))?;

    if !value.is_finite() || value.abs() > max_magnitude {
        return Err(ParseError::OutOfRange(value));
    }

    Ok(value)
}
