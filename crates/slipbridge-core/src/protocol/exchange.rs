//! Request/response exchange over a SLIP-framed link
//!
//! One request is outstanding at a time: the decoder and the frame queue are
//! shared by every exchange on the link, so callers must serialize access
//! (enforced here by `&mut self`).

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, trace};

use super::frame::{Frame, FrameQueue};
use super::link::Link;
use super::slip::SlipDecoder;
use super::ProtocolError;

/// Exchange manager: decoder + frame queue on top of a [`Link`].
///
/// Only the decoder fills the queue; callers can look but not push:
///
/// ```compile_fail
/// use slipbridge_core::protocol::{Frame, FrameExchange};
///
/// let mut exchange = FrameExchange::new();
/// exchange.queue_mut().push(Frame::new(vec![0x01]));
/// ```
#[derive(Debug, Default)]
pub struct FrameExchange {
    decoder: SlipDecoder,
    queue: FrameQueue,
    frames_received: u64,
    frames_flushed: u64,
}

impl FrameExchange {
    /// Create an exchange manager with an idle decoder and empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Send `request` and return the first frame completed after it was sent.
    ///
    /// Frames queued before the call are discarded first, so a stale response
    /// to an earlier probe is never returned. Fails with `Disconnected` if the
    /// transport ends before a frame completes.
    pub async fn exchange(&mut self, link: &mut Link, request: &[u8]) -> Result<Frame, ProtocolError> {
        self.begin(link, request).await?;
        loop {
            if let Some(frame) = self.queue.pop() {
                return Ok(frame);
            }
            let chunk = link.next_chunk().await.ok_or(ProtocolError::Disconnected)?;
            self.ingest(&chunk);
        }
    }

    /// [`exchange`](Self::exchange) with an overall response deadline.
    ///
    /// On `Timeout` the decoder keeps any partial frame and late chunks stay
    /// on the link for the next call.
    pub async fn exchange_within(
        &mut self,
        link: &mut Link,
        request: &[u8],
        window: Duration,
    ) -> Result<Frame, ProtocolError> {
        self.begin(link, request).await?;
        let deadline = Instant::now() + window;
        loop {
            if let Some(frame) = self.queue.pop() {
                return Ok(frame);
            }
            match tokio::time::timeout_at(deadline, link.next_chunk()).await {
                Ok(Some(chunk)) => {
                    self.ingest(&chunk);
                }
                Ok(None) => return Err(ProtocolError::Disconnected),
                Err(_) => {
                    debug!(window_ms = window.as_millis() as u64, "no response within window");
                    return Err(ProtocolError::Timeout);
                }
            }
        }
    }

    /// Discard every queued frame, after draining chunks the link already holds.
    pub fn flush(&mut self, link: &mut Link) -> usize {
        while let Some(chunk) = link.try_next_chunk() {
            self.ingest(&chunk);
        }
        let dropped = self.queue.clear();
        if dropped > 0 {
            debug!(dropped, "flushed stale frames");
        }
        self.frames_flushed = self.frames_flushed.saturating_add(dropped as u64);
        dropped
    }

    /// Drop queued frames and any partial frame in the decoder
    pub fn reset(&mut self) {
        self.frames_flushed = self.frames_flushed.saturating_add(self.queue.clear() as u64);
        self.decoder.reset();
    }

    /// Feed raw bytes into the decoder
    pub fn ingest(&mut self, chunk: &[u8]) -> usize {
        let completed = self.decoder.feed(chunk, &mut self.queue);
        if completed > 0 {
            trace!(completed, queued = self.queue.len(), "frames decoded");
        }
        self.frames_received = self.frames_received.saturating_add(completed as u64);
        completed
    }

    /// Frames currently waiting in the queue
    pub fn queue(&self) -> &FrameQueue {
        &self.queue
    }

    #[cfg(test)]
    pub(crate) fn queue_mut(&mut self) -> &mut FrameQueue {
        &mut self.queue
    }

    /// Decoder state and fault counters
    pub fn decoder(&self) -> &SlipDecoder {
        &self.decoder
    }

    /// Frames completed by the decoder
    pub fn frames_received(&self) -> u64 {
        self.frames_received
    }

    /// Frames discarded by flushes
    pub fn frames_flushed(&self) -> u64 {
        self.frames_flushed
    }

    async fn begin(&mut self, link: &mut Link, request: &[u8]) -> Result<(), ProtocolError> {
        self.flush(link);
        trace!(len = request.len(), "sending request");
        link.write(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{encode_frame, Unwired};
    use pretty_assertions::assert_eq;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_exchange_returns_response() {
        let (host, mut device) = tokio::io::duplex(1024);
        let mut link = Link::spawn(Unwired::new(host), 256);
        let mut exchange = FrameExchange::new();

        let responder = tokio::spawn(async move {
            let mut buf = [0u8; 3];
            device.read_exact(&mut buf).await.unwrap();
            device.write_all(&encode_frame(&[0x10, 0xC0])).await.unwrap();
            device
        });

        let frame = exchange.exchange(&mut link, &[0xC0, 0x01, 0xC0]).await.unwrap();
        assert_eq!(frame.into_payload(), vec![0x10, 0xC0]);
        let _device = responder.await.unwrap();
    }

    #[tokio::test]
    async fn test_decoy_frame_is_flushed() {
        let (host, mut device) = tokio::io::duplex(1024);
        let mut link = Link::spawn(Unwired::new(host), 256);
        let mut exchange = FrameExchange::new();
        exchange.queue_mut().push(Frame::new(vec![0xDE, 0xAD]));

        let responder = tokio::spawn(async move {
            let mut buf = [0u8; 1];
            device.read_exact(&mut buf).await.unwrap();
            device.write_all(&encode_frame(&[0x42])).await.unwrap();
            device
        });

        let frame = exchange.exchange(&mut link, &[0x01]).await.unwrap();
        assert_eq!(frame.into_payload(), vec![0x42]);
        assert_eq!(exchange.frames_flushed(), 1);
        let _device = responder.await.unwrap();
    }

    #[tokio::test]
    async fn test_hangup_before_frame_is_disconnected() {
        let (host, mut device) = tokio::io::duplex(1024);
        let mut link = Link::spawn(Unwired::new(host), 256);
        let mut exchange = FrameExchange::new();

        tokio::spawn(async move {
            let mut buf = [0u8; 1];
            device.read_exact(&mut buf).await.unwrap();
            // Half a frame, then hang up
            device.write_all(&[0xC0, 0x01]).await.unwrap();
        });

        let err = exchange.exchange(&mut link, &[0x01]).await.unwrap_err();
        assert!(err.is_disconnected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_exchange_within_times_out() {
        let (host, _device) = tokio::io::duplex(1024);
        let mut link = Link::spawn(Unwired::new(host), 256);
        let mut exchange = FrameExchange::new();

        let err = exchange
            .exchange_within(&mut link, &[0x01], Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }

    #[test]
    fn test_ingest_counts_frames() {
        let mut exchange = FrameExchange::new();
        assert_eq!(exchange.ingest(&[0xC0, 0x01, 0xC0, 0xC0, 0x02, 0xC0]), 2);
        assert_eq!(exchange.frames_received(), 2);
        exchange.reset();
        assert!(exchange.queue().is_empty());
        assert_eq!(exchange.frames_flushed(), 2);
    }
}
