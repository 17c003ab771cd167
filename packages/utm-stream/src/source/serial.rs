// Serial port line source (Unix-only)
//
// Connects to the machine's serial port (e.g., /dev/ttyACM0, /dev/ttyUSB0)
// and yields one decimal value per line. Unplugging the cable surfaces as a
// read error, which the reader treats as a disconnect.

use super::{next_framed_line, LineCodec, LineSource};
use crate::types::{StreamError, StreamResult};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_serial::{DataBits, SerialPortBuilderExt, SerialStream, StopBits};
use tokio_util::codec::FramedRead;

pub struct SerialLineSource {
    port: String,
    baud_rate: u32,
    data_bits: u8,
    stop_bits: u8,
    reader: Option<FramedRead<SerialStream, LineCodec>>,
    discarded: Arc<AtomicU64>,
}

impl SerialLineSource {
    pub fn new(port: String, baud_rate: u32, data_bits: Option<u8>, stop_bits: Option<u8>) -> Self {
        Self {
            port,
            baud_rate,
            data_bits: data_bits.unwrap_or(8),
            stop_bits: stop_bits.unwrap_or(1),
            reader: None,
            discarded: Arc::new(AtomicU64::new(0)),
        }
    }

    fn data_bits(&self) -> StreamResult<DataBits> {
        match self.data_bits {
            5 => Ok(DataBits::Five),
            6 => Ok(DataBits::Six),
            7 => Ok(DataBits::Seven),
            8 => Ok(DataBits::Eight),
            other => Err(StreamError::InvalidConfig(format!(
                "unsupported data bits: {}",
                other
            ))),
        }
    }

    fn stop_bits(&self) -> StreamResult<StopBits> {
        match self.stop_bits {
            1 => Ok(StopBits::One),
            2 => Ok(StopBits::Two),
            other => Err(StreamError::InvalidConfig(format!(
                "unsupported stop bits: {}",
                other
            ))),
        }
    }
}

#[async_trait]
impl LineSource for SerialLineSource {
    async fn connect(&mut self) -> StreamResult<()> {
        if self.reader.is_some() {
            return Ok(());
        }

        log::info!(
            "Opening serial port: {} at {} baud",
            self.port,
            self.baud_rate
        );

        let port = tokio_serial::new(&self.port, self.baud_rate)
            .data_bits(self.data_bits()?)
            .stop_bits(self.stop_bits()?)
            .open_native_async()
            .map_err(|e| match e.kind {
                tokio_serial::ErrorKind::InvalidInput => {
                    StreamError::InvalidConfig(format!("Cannot open {}: {}", self.port, e))
                }
                _ => StreamError::Serial(format!("Failed to open port {}: {}", self.port, e)),
            })?;

        let codec = LineCodec::default().with_counter(Arc::clone(&self.discarded));
        self.reader = Some(FramedRead::new(port, codec));
        log::info!("Serial port opened successfully");

        Ok(())
    }

    async fn next_line(&mut self) -> StreamResult<Option<String>> {
        next_framed_line(&mut self.reader).await
    }

    async fn close(&mut self) -> StreamResult<()> {
        if self.reader.take().is_some() {
            log::info!("Closing serial port {}", self.port);
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.reader.is_some()
    }

    fn discarded_lines(&self) -> u64 {
        self.discarded.load(Ordering::Relaxed)
    }

    fn describe(&self) -> String {
        format!("serial {} @ {}", self.port, self.baud_rate)
    }
}
