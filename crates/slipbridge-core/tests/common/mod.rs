//! Simulated device shared by the integration tests.
#![allow(dead_code)]

use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use slipbridge_core::protocol::{
    Connection, ConnectionConfig, ControlLines, LinkMode, Signal, SlipCodec,
};
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};
use tokio::time::Instant;
use tokio_util::codec::Framed;

/// One control-line assignment seen by the simulated port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineEvent {
    pub signal: Signal,
    pub level: bool,
    pub at: Instant,
}

/// Shared record of control-line assignments
#[derive(Debug, Clone, Default)]
pub struct LineLog(Arc<Mutex<Vec<LineEvent>>>);

impl LineLog {
    pub fn events(&self) -> Vec<LineEvent> {
        self.0.lock().unwrap().clone()
    }

    /// Assignments as `(signal, level, offset from the first assignment)`
    pub fn timeline(&self) -> Vec<(Signal, bool, Duration)> {
        let events = self.events();
        let Some(start) = events.first().map(|e| e.at) else {
            return Vec::new();
        };
        events
            .iter()
            .map(|e| (e.signal, e.level, e.at - start))
            .collect()
    }
}

/// Host side of a simulated serial port: duplex bytes plus recorded control lines
pub struct SimPort {
    io: DuplexStream,
    lines: LineLog,
}

impl ControlLines for SimPort {
    fn set_signal(&mut self, signal: Signal, level: bool) -> io::Result<()> {
        self.lines.0.lock().unwrap().push(LineEvent {
            signal,
            level,
            at: Instant::now(),
        });
        Ok(())
    }
}

impl AsyncRead for SimPort {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().io).poll_read(cx, buf)
    }
}

impl AsyncWrite for SimPort {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().io).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().io).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().io).poll_shutdown(cx)
    }
}

/// Port whose writes always fail and whose reads never complete
pub struct BrokenPort;

impl ControlLines for BrokenPort {
    fn set_signal(&mut self, _signal: Signal, _level: bool) -> io::Result<()> {
        Ok(())
    }
}

impl AsyncRead for BrokenPort {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Poll::Pending
    }
}

impl AsyncWrite for BrokenPort {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// Create a simulated port, the device end of its wire, and its line log
pub fn sim_port() -> (SimPort, DuplexStream, LineLog) {
    let (host, device) = tokio::io::duplex(64 * 1024);
    let lines = LineLog::default();
    let port = SimPort {
        io: host,
        lines: lines.clone(),
    };
    (port, device, lines)
}

/// Config for an attached simulated port
pub fn sim_config(mode: LinkMode, timeout_ms: u64) -> ConnectionConfig {
    ConnectionConfig {
        port_name: "sim".to_string(),
        mode,
        timeout_ms,
        ..ConnectionConfig::default()
    }
}

/// Connection attached to a simulated port
pub fn connect_sim(mode: LinkMode, timeout_ms: u64) -> (Connection, DuplexStream, LineLog) {
    let (port, device, lines) = sim_port();
    let mut conn = Connection::new(sim_config(mode, timeout_ms));
    conn.attach(port).unwrap();
    (conn, device, lines)
}

/// Wrap the device end so it speaks SLIP frames
pub fn slip_device(device: DuplexStream) -> Framed<DuplexStream, SlipCodec> {
    Framed::new(device, SlipCodec::new())
}
