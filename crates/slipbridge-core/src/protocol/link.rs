//! Owned transport task
//!
//! A [`Link`] spawns one task that owns the transport exclusively. Writes and
//! control-signal assignments are sent to it as requests and acknowledged
//! through a oneshot; every chunk it reads is forwarded on an unbounded
//! channel. A write that cannot drain does not stall reads, and closing
//! abandons it (its caller sees `Disconnected`).
//!
//! The chunk channel doubles as the pending-read handle: waiting on it is
//! cancel-safe, so a caller that gives up on a timeout never loses the chunk
//! that arrives afterwards. It is simply delivered to the next caller.
//!
//! Closing cancels the task, which drops the transport (releasing the OS
//! handle) and the chunk sender. Waiters then observe end-of-stream.

use std::future::poll_fn;
use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use tokio::io::ReadBuf;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::stream::{Signal, Transport};
use super::ProtocolError;

/// Requests served by the link task
enum Request {
    Write {
        bytes: Vec<u8>,
        reply: oneshot::Sender<io::Result<()>>,
    },
    SetSignal {
        signal: Signal,
        level: bool,
        reply: oneshot::Sender<io::Result<()>>,
    },
}

/// Cloneable handle that closes a [`Link`] from any task.
#[derive(Debug, Clone)]
pub struct CloseHandle {
    cancel: CancellationToken,
}

impl CloseHandle {
    /// Close the link. Pending reads resolve as end-of-stream.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    /// Check if the link has been closed
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Handle to the task owning an open transport.
pub struct Link {
    requests: mpsc::Sender<Request>,
    chunks: mpsc::UnboundedReceiver<Vec<u8>>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    tx_bytes: u64,
    rx_bytes: u64,
}

impl Link {
    /// Spawn the link task over `transport`, reading at most `buffer_size` bytes per chunk.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<T: Transport>(transport: T, buffer_size: usize) -> Self {
        let (requests_tx, requests_rx) = mpsc::channel(16);
        let (chunks_tx, chunks_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let task = tokio::spawn(link_loop(
            transport,
            buffer_size.max(1),
            requests_rx,
            chunks_tx,
            cancel.clone(),
        ));

        Self {
            requests: requests_tx,
            chunks: chunks_rx,
            cancel,
            task: Some(task),
            tx_bytes: 0,
            rx_bytes: 0,
        }
    }

    /// Write bytes; completes once the transport has accepted them.
    pub async fn write(&mut self, bytes: &[u8]) -> Result<(), ProtocolError> {
        let (reply, ack) = oneshot::channel();
        self.submit(Request::Write {
            bytes: bytes.to_vec(),
            reply,
        })
        .await?;
        match ack.await {
            Ok(Ok(())) => {
                self.tx_bytes = self.tx_bytes.saturating_add(bytes.len() as u64);
                Ok(())
            }
            Ok(Err(e)) => Err(ProtocolError::Io(e)),
            Err(_) => Err(ProtocolError::Disconnected),
        }
    }

    /// Drive a control line
    pub async fn set_signal(&mut self, signal: Signal, level: bool) -> Result<(), ProtocolError> {
        let (reply, ack) = oneshot::channel();
        self.submit(Request::SetSignal {
            signal,
            level,
            reply,
        })
        .await?;
        match ack.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(source)) => Err(ProtocolError::SignalFailed { signal, source }),
            Err(_) => Err(ProtocolError::Disconnected),
        }
    }

    /// Wait for the next chunk. `None` means end-of-stream.
    ///
    /// Cancel-safe: dropping the future never loses a chunk.
    pub async fn next_chunk(&mut self) -> Option<Vec<u8>> {
        let chunk = self.chunks.recv().await?;
        self.rx_bytes = self.rx_bytes.saturating_add(chunk.len() as u64);
        Some(chunk)
    }

    /// Take a chunk that has already arrived, without waiting
    pub fn try_next_chunk(&mut self) -> Option<Vec<u8>> {
        let chunk = self.chunks.try_recv().ok()?;
        self.rx_bytes = self.rx_bytes.saturating_add(chunk.len() as u64);
        Some(chunk)
    }

    /// Handle that can close this link from another task
    pub fn close_handle(&self) -> CloseHandle {
        CloseHandle {
            cancel: self.cancel.clone(),
        }
    }

    /// Check if the link has been closed
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Close the transport and wait for the task to release it. Safe to call twice.
    pub async fn close(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "link task ended abnormally");
            }
        }
    }

    /// Bytes accepted by the transport so far
    pub fn tx_bytes(&self) -> u64 {
        self.tx_bytes
    }

    /// Bytes handed to readers so far
    pub fn rx_bytes(&self) -> u64 {
        self.rx_bytes
    }

    async fn submit(&self, request: Request) -> Result<(), ProtocolError> {
        if self.cancel.is_cancelled() {
            return Err(ProtocolError::Disconnected);
        }
        self.requests
            .send(request)
            .await
            .map_err(|_| ProtocolError::Disconnected)
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Write accepted by the task but not yet fully handed to the transport
struct PendingWrite {
    bytes: Vec<u8>,
    written: usize,
    reply: oneshot::Sender<io::Result<()>>,
}

enum IoEvent {
    Written(io::Result<()>),
    Read(io::Result<usize>),
}

async fn link_loop<T: Transport>(
    mut transport: T,
    buffer_size: usize,
    mut requests: mpsc::Receiver<Request>,
    chunks: mpsc::UnboundedSender<Vec<u8>>,
    cancel: CancellationToken,
) {
    let mut buf = vec![0u8; buffer_size];
    let mut pending: Option<PendingWrite> = None;

    loop {
        // One write at a time; reads keep flowing while it drains.
        let accepting = pending.is_none();

        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                debug!("link closed");
                break;
            }

            request = requests.recv(), if accepting => {
                match request {
                    Some(Request::Write { bytes, reply }) => {
                        pending = Some(PendingWrite { bytes, written: 0, reply });
                    }
                    Some(Request::SetSignal { signal, level, reply }) => {
                        let result = transport.set_signal(signal, level);
                        trace!(%signal, level, ok = result.is_ok(), "link signal");
                        let _ = reply.send(result);
                    }
                    None => {
                        debug!("link handle dropped");
                        break;
                    }
                }
            }

            event = poll_fn(|cx| poll_io(&mut transport, &mut buf, &mut pending, cx)) => {
                match event {
                    IoEvent::Written(result) => {
                        let failed = result.is_err();
                        if let Some(write) = pending.take() {
                            trace!(len = write.bytes.len(), ok = !failed, "link write");
                            let _ = write.reply.send(result);
                        }
                        if failed {
                            warn!("transport write failed");
                            break;
                        }
                    }
                    IoEvent::Read(Ok(0)) => {
                        debug!("transport reached end of stream");
                        break;
                    }
                    IoEvent::Read(Ok(n)) => {
                        trace!(len = n, "link read");
                        if chunks.send(buf[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                    IoEvent::Read(Err(e)) => {
                        warn!(error = %e, "transport read failed");
                        break;
                    }
                }
            }
        }
    }

    // Readers waiting on `chunks` see end-of-stream and an unfinished
    // write sees its reply dropped once this returns.
    cancel.cancel();
}

/// Advance the pending write, then poll for input.
fn poll_io<T: Transport>(
    transport: &mut T,
    buf: &mut [u8],
    pending: &mut Option<PendingWrite>,
    cx: &mut Context<'_>,
) -> Poll<IoEvent> {
    if let Some(write) = pending.as_mut() {
        if let Poll::Ready(result) = poll_write_all(transport, write, cx) {
            return Poll::Ready(IoEvent::Written(result));
        }
    }

    let mut read_buf = ReadBuf::new(buf);
    match Pin::new(&mut *transport).poll_read(cx, &mut read_buf) {
        Poll::Ready(Ok(())) => Poll::Ready(IoEvent::Read(Ok(read_buf.filled().len()))),
        Poll::Ready(Err(e)) => Poll::Ready(IoEvent::Read(Err(e))),
        Poll::Pending => Poll::Pending,
    }
}

fn poll_write_all<T: Transport>(
    transport: &mut T,
    write: &mut PendingWrite,
    cx: &mut Context<'_>,
) -> Poll<io::Result<()>> {
    while write.written < write.bytes.len() {
        let n = ready!(Pin::new(&mut *transport).poll_write(cx, &write.bytes[write.written..]))?;
        if n == 0 {
            return Poll::Ready(Err(io::ErrorKind::WriteZero.into()));
        }
        write.written += n;
    }
    Pin::new(&mut *transport).poll_flush(cx)
}
