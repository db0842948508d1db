//! Timeout-bounded exact-length and line reader
//!
//! Serves protocols that are not frame-delimited. Bytes come from a residual
//! chunk first; once it is exhausted a single link read is raced against the
//! configured window.

use std::time::Duration;

use tracing::{debug, trace};

use super::link::Link;
use super::ProtocolError;

/// Chunk already pulled from the link but not yet consumed.
///
/// Invariant: `offset <= chunk.len()`; equality means empty.
#[derive(Debug, Default)]
struct ResidualBuffer {
    chunk: Vec<u8>,
    offset: usize,
}

impl ResidualBuffer {
    fn is_empty(&self) -> bool {
        self.offset >= self.chunk.len()
    }

    fn remaining(&self) -> usize {
        self.chunk.len() - self.offset
    }

    fn replace(&mut self, chunk: Vec<u8>) {
        self.chunk = chunk;
        self.offset = 0;
    }

    /// Move up to `max` bytes into `out`
    fn take_into(&mut self, out: &mut Vec<u8>, max: usize) -> usize {
        let n = max.min(self.remaining());
        out.extend_from_slice(&self.chunk[self.offset..self.offset + n]);
        self.offset += n;
        n
    }

    /// Put consumed bytes back in front of what remains
    fn unread(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        let mut restored = Vec::with_capacity(bytes.len() + self.remaining());
        restored.extend_from_slice(bytes);
        restored.extend_from_slice(&self.chunk[self.offset..]);
        self.replace(restored);
    }
}

/// Exact-length/line reader with a per-read timeout window.
#[derive(Debug)]
pub struct TimeoutReader {
    residual: ResidualBuffer,
    window: Duration,
}

impl TimeoutReader {
    /// Create a reader that waits at most `window` for each link read
    pub fn new(window: Duration) -> Self {
        Self {
            residual: ResidualBuffer::default(),
            window,
        }
    }

    /// Current timeout window
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Change the timeout window
    pub fn set_window(&mut self, window: Duration) {
        self.window = window;
    }

    /// Bytes received but not yet consumed
    pub fn buffered(&self) -> usize {
        self.residual.remaining()
    }

    /// Read exactly `n` bytes.
    ///
    /// Fails with `Timeout` if a link read makes no progress within the
    /// window, or `Disconnected` if the transport ends. On either failure the
    /// bytes already gathered are kept for the next call.
    pub async fn read_exact(&mut self, link: &mut Link, n: usize) -> Result<Vec<u8>, ProtocolError> {
        let mut out = Vec::with_capacity(n);
        while out.len() < n {
            if self.residual.is_empty() {
                if let Err(e) = self.fill(link).await {
                    self.residual.unread(&out);
                    return Err(e);
                }
            }
            let wanted = n - out.len();
            self.residual.take_into(&mut out, wanted);
        }
        Ok(out)
    }

    /// Read one line terminated by `\n`.
    ///
    /// `\r` bytes are dropped and never end a line. The terminator is not returned.
    pub async fn read_line(&mut self, link: &mut Link) -> Result<Vec<u8>, ProtocolError> {
        let mut line = Vec::new();
        loop {
            let byte = match self.read_exact(link, 1).await {
                Ok(byte) => byte[0],
                Err(e) => {
                    self.residual.unread(&line);
                    return Err(e);
                }
            };
            match byte {
                b'\n' => {
                    trace!(len = line.len(), "line complete");
                    return Ok(line);
                }
                b'\r' => {}
                _ => line.push(byte),
            }
        }
    }

    /// Forget any residual bytes
    pub fn clear(&mut self) -> usize {
        let dropped = self.residual.remaining();
        self.residual.replace(Vec::new());
        dropped
    }

    async fn fill(&mut self, link: &mut Link) -> Result<(), ProtocolError> {
        // The link read is not cancelled by the timer: its chunk stays queued
        // on the link and is picked up by the next fill.
        match tokio::time::timeout(self.window, link.next_chunk()).await {
            Ok(Some(chunk)) => {
                trace!(len = chunk.len(), "reader chunk");
                self.residual.replace(chunk);
                Ok(())
            }
            Ok(None) => {
                debug!("transport ended during read");
                Err(ProtocolError::Disconnected)
            }
            Err(_) => {
                debug!(window_ms = self.window.as_millis() as u64, "read timed out");
                Err(ProtocolError::Timeout)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Unwired;
    use pretty_assertions::assert_eq;
    use tokio::io::AsyncWriteExt;

    #[test]
    fn test_residual_unread_prepends() {
        let mut residual = ResidualBuffer::default();
        residual.replace(vec![1, 2, 3, 4]);
        let mut out = Vec::new();
        residual.take_into(&mut out, 2);
        residual.unread(&[9]);
        let mut rest = Vec::new();
        residual.take_into(&mut rest, 10);
        assert_eq!(rest, vec![9, 3, 4]);
        assert!(residual.is_empty());
    }

    #[tokio::test]
    async fn test_read_exact_spans_chunks() {
        let (host, mut device) = tokio::io::duplex(1024);
        let mut link = Link::spawn(Unwired::new(host), 2);
        let mut reader = TimeoutReader::new(Duration::from_secs(1));

        device.write_all(&[1, 2, 3, 4, 5]).await.unwrap();
        assert_eq!(reader.read_exact(&mut link, 3).await.unwrap(), vec![1, 2, 3]);
        assert_eq!(reader.read_exact(&mut link, 2).await.unwrap(), vec![4, 5]);
    }

    #[tokio::test]
    async fn test_read_line_drops_carriage_return() {
        let (host, mut device) = tokio::io::duplex(1024);
        let mut link = Link::spawn(Unwired::new(host), 64);
        let mut reader = TimeoutReader::new(Duration::from_secs(1));

        device.write_all(b"temp=21\r\nnext\n").await.unwrap();
        assert_eq!(reader.read_line(&mut link).await.unwrap(), b"temp=21".to_vec());
        assert_eq!(reader.read_line(&mut link).await.unwrap(), b"next".to_vec());
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_line_survives_timeout() {
        let (host, mut device) = tokio::io::duplex(1024);
        let mut link = Link::spawn(Unwired::new(host), 64);
        let mut reader = TimeoutReader::new(Duration::from_millis(50));

        device.write_all(b"ab").await.unwrap();
        assert!(reader.read_line(&mut link).await.unwrap_err().is_timeout());

        device.write_all(b"c\n").await.unwrap();
        assert_eq!(reader.read_line(&mut link).await.unwrap(), b"abc".to_vec());
    }

    #[tokio::test]
    async fn test_end_of_stream_is_disconnected() {
        let (host, device) = tokio::io::duplex(1024);
        let mut link = Link::spawn(Unwired::new(host), 64);
        let mut reader = TimeoutReader::new(Duration::from_secs(1));
        drop(device);

        assert!(reader.read_exact(&mut link, 1).await.unwrap_err().is_disconnected());
    }
}
