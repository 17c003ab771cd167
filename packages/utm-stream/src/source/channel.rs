// In-memory line source
//
// Lets an embedding application (or a test) push lines directly. The feed
// side can also end the current connection or report a fatal failure, which
// makes every reader path reachable without real hardware.

use super::LineSource;
use crate::types::{StreamError, StreamResult};
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Message accepted by a [`ChannelLineSource`]
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelInput {
    /// One raw line, without terminator
    Line(String),
    /// End the current connection; the next `connect` succeeds
    Hangup,
    /// Fail the current connection with an unrecoverable error
    Fail(String),
}

/// Sending half of a [`ChannelLineSource`]
#[derive(Debug, Clone)]
pub struct LineFeed {
    sender: mpsc::Sender<ChannelInput>,
}

impl LineFeed {
    pub async fn line(&self, line: impl Into<String>) -> StreamResult<()> {
        self.send(ChannelInput::Line(line.into())).await
    }

    pub async fn hangup(&self) -> StreamResult<()> {
        self.send(ChannelInput::Hangup).await
    }

    pub async fn fail(&self, reason: impl Into<String>) -> StreamResult<()> {
        self.send(ChannelInput::Fail(reason.into())).await
    }

    pub async fn send(&self, input: ChannelInput) -> StreamResult<()> {
        self.sender
            .send(input)
            .await
            .map_err(|_| StreamError::Disconnected("line source dropped".to_string()))
    }
}

pub struct ChannelLineSource {
    receiver: mpsc::Receiver<ChannelInput>,
    connected: bool,
    closed: bool,
}

impl ChannelLineSource {
    /// Create a source and the feed that drives it
    pub fn new(buffer: usize) -> (LineFeed, Self) {
        let (sender, receiver) = mpsc::channel(buffer.max(1));
        (LineFeed { sender }, Self::from_receiver(receiver))
    }

    pub fn from_receiver(receiver: mpsc::Receiver<ChannelInput>) -> Self {
        Self {
            receiver,
            connected: false,
            closed: false,
        }
    }
}

#[async_trait]
impl LineSource for ChannelLineSource {
    async fn connect(&mut self) -> StreamResult<()> {
        if self.closed {
            return Err(StreamError::Fatal("line feed closed".to_string()));
        }
        self.connected = true;
        Ok(())
    }

    async fn next_line(&mut self) -> StreamResult<Option<String>> {
        if !self.connected {
            return Err(StreamError::Connection("source is not connected".to_string()));
        }

        match self.receiver.recv().await {
            Some(ChannelInput::Line(line)) => Ok(Some(line)),
            Some(ChannelInput::Hangup) => {
                self.connected = false;
                Ok(None)
            }
            Some(ChannelInput::Fail(reason)) => {
                self.connected = false;
                Err(StreamError::Fatal(reason))
            }
            None => {
                self.connected = false;
                self.closed = true;
                Ok(None)
            }
        }
    }

    async fn close(&mut self) -> StreamResult<()> {
        self.connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn describe(&self) -> String {
        "channel".to_string()
    }
}
