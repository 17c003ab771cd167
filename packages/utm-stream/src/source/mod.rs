// Pluggable line sources
//
// The `LineSource` trait is the only thing the reader knows about the
// transport. New sources can be added by:
// 1. Implementing the LineSource trait
// 2. Adding a variant to SourceConfig
// 3. Registering it in `create_source`
//
// Current implementations:
// - Serial: point-to-point serial link to the machine (Unix)
// - TCP: raw TCP stream
// - Unix: Unix domain stream socket (the machine simulator's transport)
// - File: replay of a recorded session at a fixed cadence
// - Channel: in-memory lines fed by the embedding application

mod channel;
mod codec;
mod file;
mod tcp;

#[cfg(target_family = "unix")]
mod serial;
#[cfg(target_family = "unix")]
mod unix;

use crate::types::{StreamError, StreamResult};
use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncRead;
use tokio_util::codec::FramedRead;

pub use channel::{ChannelInput, ChannelLineSource, LineFeed};
pub use codec::{split_lines, LineCodec, MAX_LINE_LENGTH};
pub use file::FileLineSource;
pub use tcp::TcpLineSource;

#[cfg(target_family = "unix")]
pub use serial::SerialLineSource;
#[cfg(target_family = "unix")]
pub use unix::UnixLineSource;

/// Baud rate of the machine's serial link unless configured otherwise
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Configuration for the different source types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceConfig {
    /// Serial port (e.g., /dev/ttyACM0)
    Serial {
        port: String,
        baud_rate: u32,
        #[serde(default)]
        data_bits: Option<u8>,
        #[serde(default)]
        stop_bits: Option<u8>,
    },

    /// TCP stream socket
    Tcp { host: String, port: u16 },

    /// Unix domain stream socket
    Unix { path: String },

    /// Recorded session, one value per line
    File {
        path: String,
        /// Delay between lines in milliseconds
        #[serde(default)]
        interval_ms: u64,
    },
}

impl SourceConfig {
    pub fn serial(port: impl Into<String>, baud_rate: u32) -> Self {
        Self::Serial {
            port: port.into(),
            baud_rate,
            data_bits: None,
            stop_bits: None,
        }
    }

    /// Short human-readable description, e.g. `serial /dev/ttyACM0 @ 9600`
    pub fn describe(&self) -> String {
        match self {
            Self::Serial {
                port, baud_rate, ..
            } => format!("serial {} @ {}", port, baud_rate),
            Self::Tcp { host, port } => format!("tcp {}:{}", host, port),
            Self::Unix { path } => format!("unix {}", path),
            Self::File { path, .. } => format!("file {}", path),
        }
    }

    pub fn validate(&self) -> StreamResult<()> {
        match self {
            Self::Serial {
                port,
                baud_rate,
                data_bits,
                stop_bits,
            } => {
                if port.trim().is_empty() {
                    return Err(StreamError::InvalidConfig(
                        "serial port must not be empty".to_string(),
                    ));
                }
                if *baud_rate == 0 {
                    return Err(StreamError::InvalidConfig(
                        "baud rate must be positive".to_string(),
                    ));
                }
                if let Some(bits) = data_bits {
                    if !(5..=8).contains(bits) {
                        return Err(StreamError::InvalidConfig(format!(
                            "data bits must be 5-8, got {}",
                            bits
                        )));
                    }
                }
                if let Some(bits) = stop_bits {
                    if !matches!(bits, 1 | 2) {
                        return Err(StreamError::InvalidConfig(format!(
                            "stop bits must be 1 or 2, got {}",
                            bits
                        )));
                    }
                }
                Ok(())
            }
            Self::Tcp { host, port } => {
                if host.trim().is_empty() {
                    return Err(StreamError::InvalidConfig(
                        "host must not be empty".to_string(),
                    ));
                }
                if *port == 0 {
                    return Err(StreamError::InvalidConfig(
                        "port must be positive".to_string(),
                    ));
                }
                Ok(())
            }
            Self::Unix { path } | Self::File { path, .. } => {
                if path.trim().is_empty() {
                    return Err(StreamError::InvalidConfig(
                        "path must not be empty".to_string(),
                    ));
                }
                Ok(())
            }
        }
    }
}

/// Trait for all line sources
///
/// `next_line` must be cancel-safe: the reader races it against the gap
/// timer and the stop signal, and a line must never be lost or split when
/// the race is lost.
#[async_trait]
pub trait LineSource: Send {
    /// Open the underlying channel; called again for every reconnect
    async fn connect(&mut self) -> StreamResult<()>;

    /// Next raw line without its terminator
    ///
    /// `Ok(None)` means the channel closed. An unterminated partial line is
    /// returned before that.
    async fn next_line(&mut self) -> StreamResult<Option<String>>;

    /// Release the underlying channel
    async fn close(&mut self) -> StreamResult<()>;

    fn is_connected(&self) -> bool;

    fn describe(&self) -> String;

    /// Over-long lines dropped by framing, over every connection so far
    fn discarded_lines(&self) -> u64 {
        0
    }
}

/// Create a line source from configuration
pub fn create_source(config: &SourceConfig) -> StreamResult<Box<dyn LineSource>> {
    config.validate()?;

    match config.clone() {
        #[cfg(target_family = "unix")]
        SourceConfig::Serial {
            port,
            baud_rate,
            data_bits,
            stop_bits,
        } => Ok(Box::new(SerialLineSource::new(
            port, baud_rate, data_bits, stop_bits,
        ))),

        SourceConfig::Tcp { host, port } => Ok(Box::new(TcpLineSource::new(host, port))),

        #[cfg(target_family = "unix")]
        SourceConfig::Unix { path } => Ok(Box::new(UnixLineSource::new(path))),

        SourceConfig::File { path, interval_ms } => {
            Ok(Box::new(FileLineSource::new(path, interval_ms)))
        }

        #[cfg(not(target_family = "unix"))]
        other => Err(StreamError::InvalidConfig(format!(
            "{} is not supported on this platform",
            other.describe()
        ))),
    }
}

/// Names of the serial ports present on this machine, sorted
pub fn list_serial_ports() -> StreamResult<Vec<String>> {
    let mut ports: Vec<String> = tokio_serial::available_ports()
        .map_err(|e| StreamError::Serial(format!("Failed to enumerate ports: {}", e)))?
        .into_iter()
        .map(|info| info.port_name)
        .collect();
    ports.sort();
    Ok(ports)
}

/// Read the next line from an open framed reader
///
/// Drops the reader when the stream ends or fails, so the owning source
/// reports itself disconnected.
pub(crate) async fn next_framed_line<R>(
    reader: &mut Option<FramedRead<R, LineCodec>>,
) -> StreamResult<Option<String>>
where
    R: AsyncRead + Unpin + Send,
{
    let framed = reader
        .as_mut()
        .ok_or_else(|| StreamError::Connection("source is not connected".to_string()))?;

    match framed.next().await {
        Some(Ok(line)) => Ok(Some(line)),
        Some(Err(e)) => {
            *reader = None;
            Err(StreamError::Disconnected(format!("read failed: {}", e)))
        }
        None => {
            *reader = None;
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_config_json() {
        let config: SourceConfig =
            serde_json::from_str(r#"{"type":"tcp","host":"localhost","port":5000}"#).unwrap();
        assert_eq!(
            config,
            SourceConfig::Tcp {
                host: "localhost".to_string(),
                port: 5000
            }
        );

        let serial = SourceConfig::serial("/dev/ttyACM0", DEFAULT_BAUD_RATE);
        let json = serde_json::to_value(&serial).unwrap();
        assert_eq!(json["type"], "serial");
        assert_eq!(json["baud_rate"], 9600);
        assert_eq!(serial.describe(), "serial /dev/ttyACM0 @ 9600");
    }

    #[test]
    fn test_validation() {
        assert!(SourceConfig::serial("", 9600).validate().is_err());
        assert!(SourceConfig::serial("/dev/ttyUSB0", 0).validate().is_err());
        assert!(SourceConfig::Serial {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 9600,
            data_bits: Some(9),
            stop_bits: None,
        }
        .validate()
        .is_err());
        assert!(SourceConfig::Tcp {
            host: "localhost".to_string(),
            port: 0
        }
        .validate()
        .is_err());
        assert!(SourceConfig::File {
            path: " ".to_string(),
            interval_ms: 0
        }
        .validate()
        .is_err());
        assert!(SourceConfig::serial("/dev/ttyUSB0", 115_200).validate().is_ok());
    }

    #[test]
    fn test_create_source_rejects_invalid_config() {
        let result = create_source(&SourceConfig::Unix {
            path: String::new(),
        });
        assert!(matches!(result, Err(StreamError::InvalidConfig(_))));

        let source = create_source(&SourceConfig::File {
            path: "run.txt".to_string(),
            interval_ms: 10,
        })
        .unwrap();
        assert!(!source.is_connected());
        assert_eq!(source.describe(), "file run.txt");
    }
}
