// File-based line source that simulates a live machine
//
// Replays a recorded session, one line per tick, useful for:
// - Testing acquisition without a machine attached
// - Replaying recorded sessions
// - Demo and development
//
// Blank lines in the recording become pauses of one tick each, so a gap
// between two physical tests can be reproduced with a run of empty lines.

use super::{split_lines, LineSource};
use crate::types::{StreamError, StreamResult};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::{interval, Interval, MissedTickBehavior};

pub struct FileLineSource {
    path: PathBuf,
    interval_ms: u64,
    pending: Option<VecDeque<String>>,
    ticker: Option<Interval>,
}

impl FileLineSource {
    pub fn new(path: impl Into<PathBuf>, interval_ms: u64) -> Self {
        Self {
            path: path.into(),
            interval_ms,
            pending: None,
            ticker: None,
        }
    }

    /// Lines still to be replayed in the current pass
    pub fn remaining(&self) -> usize {
        self.pending.as_ref().map_or(0, |lines| lines.len())
    }
}

#[async_trait]
impl LineSource for FileLineSource {
    async fn connect(&mut self) -> StreamResult<()> {
        if self.pending.is_some() {
            return Ok(());
        }

        let data = tokio::fs::read(&self.path).await.map_err(|e| {
            StreamError::Connection(format!("Cannot open {}: {}", self.path.display(), e))
        })?;

        let lines = data
            .split(|b| *b == b'\n')
            .flat_map(|raw| {
                // Keep empty lines as pauses; the codec would drop them
                let decoded = split_lines(raw);
                if decoded.is_empty() {
                    vec![String::new()]
                } else {
                    decoded
                }
            })
            .collect::<VecDeque<_>>();

        log::info!(
            "Replaying {} ({} lines, every {} ms)",
            self.path.display(),
            lines.len(),
            self.interval_ms
        );

        if self.interval_ms > 0 {
            let mut ticker = interval(Duration::from_millis(self.interval_ms));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            self.ticker = Some(ticker);
        }
        self.pending = Some(lines);
        Ok(())
    }

    async fn next_line(&mut self) -> StreamResult<Option<String>> {
        let Some(pending) = self.pending.as_mut() else {
            return Err(StreamError::Connection("source is not connected".to_string()));
        };

        // Trailing newline of the recording
        if pending.len() == 1 && pending.front().is_some_and(|l| l.is_empty()) {
            pending.clear();
        }

        if pending.is_empty() {
            log::info!("File replay reached EOF");
            self.pending = None;
            self.ticker = None;
            return Ok(None);
        }

        if let Some(ticker) = self.ticker.as_mut() {
            ticker.tick().await;
        }

        Ok(self.pending.as_mut().and_then(|lines| lines.pop_front()))
    }

    async fn close(&mut self) -> StreamResult<()> {
        self.pending = None;
        self.ticker = None;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.pending.is_some()
    }

    fn describe(&self) -> String {
        format!("file {}", self.path.display())
    }
}
