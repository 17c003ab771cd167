// TCP socket line source
//
// Connects to a TCP server that writes one value per line. Reconnection is
// the reader's business; a closed connection just ends the line stream.

use super::{next_framed_line, LineCodec, LineSource};
use crate::types::{StreamError, StreamResult};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_util::codec::FramedRead;

pub struct TcpLineSource {
    host: String,
    port: u16,
    reader: Option<FramedRead<TcpStream, LineCodec>>,
    discarded: Arc<AtomicU64>,
}

impl TcpLineSource {
    pub fn new(host: String, port: u16) -> Self {
        Self {
            host,
            port,
            reader: None,
            discarded: Arc::new(AtomicU64::new(0)),
        }
    }

    fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[async_trait]
impl LineSource for TcpLineSource {
    async fn connect(&mut self) -> StreamResult<()> {
        if self.reader.is_some() {
            return Ok(());
        }

        log::info!("Connecting to TCP: {}", self.address());

        let stream = TcpStream::connect(self.address())
            .await
            .map_err(|e| StreamError::Network(format!("TCP connection failed: {}", e)))?;
        stream.set_nodelay(true)?;

        let codec = LineCodec::default().with_counter(Arc::clone(&self.discarded));
        self.reader = Some(FramedRead::new(stream, codec));
        log::info!("TCP connected successfully");

        Ok(())
    }

    async fn next_line(&mut self) -> StreamResult<Option<String>> {
        next_framed_line(&mut self.reader).await
    }

    async fn close(&mut self) -> StreamResult<()> {
        if self.reader.take().is_some() {
            log::info!("Closing TCP connection to {}", self.address());
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
        format!("tcp {}", self.address())
    }
}
