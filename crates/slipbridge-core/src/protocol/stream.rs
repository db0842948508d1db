use std::fmt;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio_serial::{SerialPort, SerialStream};

/// Modem control lines driven by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Signal {
    /// Data-terminal-ready (wired to the boot-select pin on typical adapters)
    DataTerminalReady,
    /// Request-to-send (wired to the reset/enable pin)
    RequestToSend,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Signal::DataTerminalReady => f.write_str("DTR"),
            Signal::RequestToSend => f.write_str("RTS"),
        }
    }
}

/// Assignment of control-signal levels
pub trait ControlLines {
    /// Drive `signal` to `level`
    fn set_signal(&mut self, signal: Signal, level: bool) -> io::Result<()>;
}

/// Duplex byte stream with control lines, exclusively owned by a [`Link`](super::Link).
pub trait Transport: AsyncRead + AsyncWrite + ControlLines + Send + Unpin + 'static {}

impl<T> Transport for T where T: AsyncRead + AsyncWrite + ControlLines + Send + Unpin + 'static {}

impl ControlLines for SerialStream {
    fn set_signal(&mut self, signal: Signal, level: bool) -> io::Result<()> {
        let result = match signal {
            Signal::DataTerminalReady => self.write_data_terminal_ready(level),
            Signal::RequestToSend => self.write_request_to_send(level),
        };
        result.map_err(io::Error::from)
    }
}

/// Stream without modem control lines (TCP bridges, pipes).
///
/// Signal assignment fails with [`io::ErrorKind::Unsupported`].
#[derive(Debug)]
pub struct Unwired<T>(pub T);

impl<T> Unwired<T> {
    /// Wrap a stream
    pub fn new(inner: T) -> Self {
        Self(inner)
    }

    /// Recover the wrapped stream
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> ControlLines for Unwired<T> {
    fn set_signal(&mut self, signal: Signal, _level: bool) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            format!("{} is not available on this transport", signal),
        ))
    }
}

impl<T: AsyncRead + Unpin> AsyncRead for Unwired<T> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().0).poll_read(cx, buf)
    }
}

impl<T: AsyncWrite + Unpin> AsyncWrite for Unwired<T> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().0).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().0).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().0).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[test]
    fn test_signal_display() {
        assert_eq!(Signal::DataTerminalReady.to_string(), "DTR");
        assert_eq!(Signal::RequestToSend.to_string(), "RTS");
    }

    #[tokio::test]
    async fn test_unwired_passes_bytes_through() {
        let (a, mut b) = tokio::io::duplex(64);
        let mut wired = Unwired::new(a);
        wired.write_all(b"ping").await.unwrap();

        let mut buf = [0u8; 4];
        b.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
    }

    #[test]
    fn test_unwired_rejects_signals() {
        let (a, _b) = tokio::io::duplex(64);
        let mut wired = Unwired::new(a);
        let err = wired.set_signal(Signal::RequestToSend, true).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Unsupported);
    }
}
