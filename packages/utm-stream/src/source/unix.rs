// Unix domain socket line source
//
// Used with the machine simulator, which serves the same line protocol as
// the serial link over a stream socket.

use super::{next_framed_line, LineCodec, LineSource};
use crate::types::{StreamError, StreamResult};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::UnixStream;
use tokio_util::codec::FramedRead;

pub struct UnixLineSource {
    path: PathBuf,
    reader: Option<FramedRead<UnixStream, LineCodec>>,
    discarded: Arc<AtomicU64>,
}

impl UnixLineSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            reader: None,
            discarded: Arc::new(AtomicU64::new(0)),
        }
    }
}

#[async_trait]
impl LineSource for UnixLineSource {
    async fn connect(&mut self) -> StreamResult<()> {
        if self.reader.is_some() {
            return Ok(());
        }

        log::info!("Connecting to socket: {}", self.path.display());

        let stream = UnixStream::connect(&self.path).await.map_err(|e| {
            StreamError::Connection(format!(
                "Socket connection to {} failed: {}",
                self.path.display(),
                e
            ))
        })?;

        let codec = LineCodec::default().with_counter(Arc::clone(&self.discarded));
        self.reader = Some(FramedRead::new(stream, codec));
        log::info!("Socket connected successfully");

        Ok(())
    }

    async fn next_line(&mut self) -> StreamResult<Option<String>> {
        next_framed_line(&mut self.reader).await
    }

    async fn close(&mut self) -> StreamResult<()> {
        if self.reader.take().is_some() {
            log::info!("Closing socket {}", self.path.display());
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
        format!("unix {}", self.path.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::net::UnixListener;

    #[tokio::test]
    async fn test_reads_from_socket_and_reconnects() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("utm.sock");
        let listener = UnixListener::bind(&path).unwrap();

        let server = tokio::spawn(async move {
            for payload in [&b"1.0\n2.0\n"[..], &b"7.0\n"[..]] {
                let (mut socket, _) = listener.accept().await.unwrap();
                socket.write_all(payload).await.unwrap();
            }
        });

        let mut source = UnixLineSource::new(&path);

        source.connect().await.unwrap();
        assert_eq!(source.next_line().await.unwrap().as_deref(), Some("1.0"));
        assert_eq!(source.next_line().await.unwrap().as_deref(), Some("2.0"));
        assert_eq!(source.next_line().await.unwrap(), None);
        assert!(!source.is_connected());

        source.connect().await.unwrap();
        assert_eq!(source.next_line().await.unwrap().as_deref(), Some("7.0"));
        source.close().await.unwrap();
        assert!(!source.is_connected());

        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_socket_is_connection_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = UnixLineSource::new(dir.path().join("absent.sock"));
        assert!(matches!(
            source.connect().await,
            Err(StreamError::Connection(_))
        ));
    }
}
