// Line framing for byte-oriented sources
//
// Splits a byte stream on `\n`, `\r\n` or a bare `\r`. Invalid UTF-8 is
// decoded lossily so a noisy line can never abort the stream; the parser
// rejects it afterwards. Over-long runs without a terminator are discarded up
// to the next terminator.

use bytes::{Buf, BytesMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::codec::Decoder;

/// Longest line kept; the machine sends short decimal numbers
pub const MAX_LINE_LENGTH: usize = 256;

/// Lossy, length-limited line decoder for [`tokio_util::codec::FramedRead`]
#[derive(Debug, Clone)]
pub struct LineCodec {
    max_length: usize,
    /// Bytes of the buffer already scanned without finding a terminator
    next_index: usize,
    /// Dropping an over-long line until its terminator shows up
    discarding: bool,
    /// Shared so the count outlives the framed reader of one connection
    discarded_lines: Arc<AtomicU64>,
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new(MAX_LINE_LENGTH)
    }
}

impl LineCodec {
    pub fn new(max_length: usize) -> Self {
        Self {
            max_length: max_length.max(1),
            next_index: 0,
            discarding: false,
            discarded_lines: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Count dropped lines into `counter` instead of a private one
    pub fn with_counter(mut self, counter: Arc<AtomicU64>) -> Self {
        self.discarded_lines = counter;
        self
    }

    /// Over-long lines dropped so far
    pub fn discarded_lines(&self) -> u64 {
        self.discarded_lines.load(Ordering::Relaxed)
    }

    fn note_discarded(&mut self) {
        self.discarded_lines.fetch_add(1, Ordering::Relaxed);
        log::debug!(
            "discarding line longer than {} bytes",
            self.max_length
        );
    }
}

fn is_terminator(byte: &u8) -> bool {
    *byte == b'\n' || *byte == b'\r'
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = std::io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<String>, Self::Error> {
        loop {
            let terminator = buf[self.next_index..].iter().position(is_terminator);

            match (self.discarding, terminator) {
                (true, Some(offset)) => {
                    buf.advance(self.next_index + offset + 1);
                    self.next_index = 0;
                    self.discarding = false;
                }
                (true, None) => {
                    buf.advance(buf.len());
                    self.next_index = 0;
                    return Ok(None);
                }
                (false, Some(offset)) => {
                    let end = self.next_index + offset;
                    self.next_index = 0;
                    let mut line = buf.split_to(end + 1);
                    line.truncate(end);

                    // `\r\n` yields an empty line after the `\r`
                    if line.is_empty() {
                        continue;
                    }
                    if line.len() > self.max_length {
                        self.note_discarded();
                        continue;
                    }
                    return Ok(Some(String::from_utf8_lossy(&line).into_owned()));
                }
                (false, None) if buf.len() > self.max_length => {
                    self.note_discarded();
                    self.discarding = true;
                }
                (false, None) => {
                    self.next_index = buf.len();
                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<String>, Self::Error> {
        if let Some(line) = self.decode(buf)? {
            return Ok(Some(line));
        }

        // Flush the unterminated tail left when the stream ended
        self.next_index = 0;
        if self.discarding {
            self.discarding = false;
            buf.clear();
            return Ok(None);
        }
        if buf.is_empty() {
            return Ok(None);
        }
        let line = buf.split();
        Ok(Some(String::from_utf8_lossy(&line).into_owned()))
    }
}

/// Split a complete in-memory buffer into lines, flushing the tail
pub fn split_lines(data: &[u8]) -> Vec<String> {
    let mut codec = LineCodec::default();
    let mut buf = BytesMut::from(data);
    let mut lines = Vec::new();
    while let Ok(Some(line)) = codec.decode_eof(&mut buf) {
        lines.push(line);
    }
    lines
}
