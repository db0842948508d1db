//! Connection management
//!
//! Handles the session lifecycle and routes operations to the framed, raw or
//! pump channel selected by the configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use super::{
    exchange::FrameExchange,
    frame::Frame,
    link::{CloseHandle, Link},
    packet::Request,
    reader::TimeoutReader,
    reset,
    serial::{list_ports, open_port, PortInfo},
    stream::{Transport, Unwired},
    text::TextDecoder,
    ProtocolError, DEFAULT_BAUD_RATE, DEFAULT_SYNC_ATTEMPTS, DEFAULT_TIMEOUT_MS,
    FRAMED_BUFFER_SIZE, RAW_BUFFER_SIZE,
};

/// Prefix selecting a TCP bridge instead of a local serial device
const TCP_PREFIX: &str = "tcp://";

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Not connected
    Disconnected,
    /// Opening the transport
    Connecting,
    /// Session open and ready
    Connected,
    /// Last open attempt failed
    Error,
}

/// How the read side of a session is consumed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkMode {
    /// SLIP frames, one request/response exchange at a time
    #[default]
    Framed,
    /// Exact-length and line reads with a timeout window
    Raw,
    /// Every received chunk decoded as text and handed to a receiver
    Pump,
}

impl LinkMode {
    /// Minimum input buffer capacity for this mode
    pub fn min_buffer_size(self) -> usize {
        match self {
            LinkMode::Framed | LinkMode::Pump => FRAMED_BUFFER_SIZE,
            LinkMode::Raw => RAW_BUFFER_SIZE,
        }
    }
}

/// Connection configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Serial port name, or `tcp://host:port` for a network bridge
    pub port_name: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Read-side mode
    pub mode: LinkMode,
    /// Read/response window in milliseconds
    pub timeout_ms: u64,
    /// Input buffer capacity override (defaults to the mode minimum)
    pub buffer_size: Option<usize>,
    /// Sync exchanges attempted before giving up
    pub sync_attempts: u32,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: DEFAULT_BAUD_RATE,
            mode: LinkMode::Framed,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            buffer_size: None,
            sync_attempts: DEFAULT_SYNC_ATTEMPTS,
        }
    }
}

impl ConnectionConfig {
    /// Parse a JSON configuration; missing fields take their defaults
    pub fn from_json_str(json: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(json).map_err(|e| ProtocolError::InvalidConfig(e.to_string()))
    }

    /// Load a JSON configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ProtocolError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }

    /// Read/response window
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Input buffer capacity actually used
    pub fn effective_buffer_size(&self) -> usize {
        self.buffer_size
            .unwrap_or_else(|| self.mode.min_buffer_size())
    }

    /// Check the values that can be checked without opening anything
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.baud_rate == 0 {
            return Err(ProtocolError::InvalidConfig("baud rate must be non-zero".into()));
        }
        if self.timeout_ms == 0 {
            return Err(ProtocolError::InvalidConfig("timeout must be non-zero".into()));
        }
        if self.sync_attempts == 0 {
            return Err(ProtocolError::InvalidConfig("sync attempts must be non-zero".into()));
        }
        let min = self.mode.min_buffer_size();
        if let Some(size) = self.buffer_size {
            if size < min {
                return Err(ProtocolError::InvalidConfig(format!(
                    "buffer size {} is below the {:?} minimum of {}",
                    size, self.mode, min
                )));
            }
        }
        Ok(())
    }
}

/// Byte and frame counters for the current session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionCounters {
    /// Bytes accepted by the transport
    pub tx_bytes: u64,
    /// Bytes delivered by the transport
    pub rx_bytes: u64,
    /// Frames completed by the decoder
    pub frames_received: u64,
    /// Stale frames discarded before requests
    pub frames_flushed: u64,
    /// Frames dropped for an invalid escape sequence
    pub malformed_escapes: u64,
    /// Back-to-back delimiter pairs skipped
    pub empty_frames: u64,
}

/// Facts about the open session. Lives exactly as long as the session.
#[derive(Debug, Clone)]
pub struct SessionContext {
    port_name: String,
    mode: LinkMode,
    opened_at: Instant,
}

impl SessionContext {
    /// Port (or bridge address) the session runs on
    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    /// Read-side mode of the session
    pub fn mode(&self) -> LinkMode {
        self.mode
    }

    /// When the session was opened
    pub fn opened_at(&self) -> Instant {
        self.opened_at
    }

    /// Time since the session was opened
    pub fn uptime(&self) -> Duration {
        self.opened_at.elapsed()
    }
}

enum Channel {
    Framed(FrameExchange),
    Raw(TimeoutReader),
    Pump(TextDecoder),
}

struct Session {
    link: Link,
    channel: Channel,
    context: SessionContext,
}

/// Device connection: one open session at a time
pub struct Connection {
    config: ConnectionConfig,
    state: ConnectionState,
    session: Option<Session>,
}

impl Connection {
    /// Create a new connection (not yet connected)
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            state: ConnectionState::Disconnected,
            session: None,
        }
    }

    /// List available serial ports
    pub fn list_ports() -> Vec<PortInfo> {
        list_ports()
    }

    /// Get current connection state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Check if a session is open
    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    /// Active configuration
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Context of the open session, if any
    pub fn session(&self) -> Option<&SessionContext> {
        self.session.as_ref().map(|s| &s.context)
    }

    /// Handle that closes the open session's transport from another task
    pub fn close_handle(&self) -> Option<CloseHandle> {
        self.session.as_ref().map(|s| s.link.close_handle())
    }

    /// Open the configured port and start a session
    pub async fn connect(&mut self) -> Result<(), ProtocolError> {
        if self.session.is_some() {
            return Err(ProtocolError::AlreadyConnected);
        }
        self.config.validate()?;
        if self.config.port_name.is_empty() {
            return Err(ProtocolError::InvalidConfig("no port selected".into()));
        }

        self.state = ConnectionState::Connecting;
        match self.open_link().await {
            Ok(link) => {
                let port_name = self.config.port_name.clone();
                self.install(link, port_name);
                Ok(())
            }
            Err(e) => {
                warn!(port = %self.config.port_name, error = %e, "open failed");
                self.state = ConnectionState::Error;
                Err(e)
            }
        }
    }

    /// Start a session over an already-open transport
    ///
    /// Must be called from within a tokio runtime.
    pub fn attach<T: Transport>(&mut self, transport: T) -> Result<(), ProtocolError> {
        if self.session.is_some() {
            return Err(ProtocolError::AlreadyConnected);
        }
        self.config.validate()?;
        let link = Link::spawn(transport, self.config.effective_buffer_size());
        let port_name = if self.config.port_name.is_empty() {
            "attached".to_string()
        } else {
            self.config.port_name.clone()
        };
        self.install(link, port_name);
        Ok(())
    }

    /// Close the session and release the transport
    pub async fn disconnect(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.link.close().await;
            info!(
                port = %session.context.port_name,
                uptime_ms = session.context.uptime().as_millis() as u64,
                "disconnected"
            );
        }
        self.state = ConnectionState::Disconnected;
    }

    /// Send a request frame and return the correlated response frame
    pub async fn send_and_receive(&mut self, request: &[u8]) -> Result<Frame, ProtocolError> {
        let (link, exchange) = self.framed()?;
        let result = exchange.exchange(link, request).await;
        self.settle(result).await
    }

    /// [`send_and_receive`](Self::send_and_receive) bounded by a response window
    pub async fn send_and_receive_within(
        &mut self,
        request: &[u8],
        window: Duration,
    ) -> Result<Frame, ProtocolError> {
        let (link, exchange) = self.framed()?;
        let result = exchange.exchange_within(link, request, window).await;
        self.settle(result).await
    }

    /// Synchronize with the bootloader.
    ///
    /// One unanswered probe goes out first so the device can lock onto the
    /// baud rate; then up to `sync_attempts` probes are exchanged, retrying on
    /// `Timeout` and aborting on `Disconnected`.
    pub async fn sync(&mut self) -> Result<Frame, ProtocolError> {
        let attempts = self.config.sync_attempts;
        let window = self.config.timeout();
        let probe = Request::sync().to_frame()?;

        let (link, _) = self.framed()?;
        let result = link.write(&probe).await;
        self.settle(result).await?;

        for attempt in 1..=attempts {
            match self.send_and_receive_within(&probe, window).await {
                Ok(frame) => {
                    info!(attempt, len = frame.len(), "bootloader in sync");
                    return Ok(frame);
                }
                Err(ProtocolError::Timeout) => debug!(attempt, "sync attempt timed out"),
                Err(e) => return Err(e),
            }
        }

        warn!(attempts, "no answer to sync");
        Err(ProtocolError::SyncFailed { attempts })
    }

    /// Read exactly `n` bytes (raw mode)
    pub async fn read_exact(&mut self, n: usize) -> Result<Vec<u8>, ProtocolError> {
        let (link, reader) = self.raw()?;
        let result = reader.read_exact(link, n).await;
        self.settle(result).await
    }

    /// Read one `\n`-terminated line, carriage returns dropped (raw mode)
    pub async fn read_line(&mut self) -> Result<Vec<u8>, ProtocolError> {
        let (link, reader) = self.raw()?;
        let result = reader.read_line(link).await;
        self.settle(result).await
    }

    /// Write bytes without waiting for any response
    pub async fn write_raw(&mut self, bytes: &[u8]) -> Result<(), ProtocolError> {
        let link = self.link()?;
        let result = link.write(bytes).await;
        self.settle(result).await
    }

    /// Write UTF-8 text without waiting for any response
    pub async fn send_text(&mut self, text: &str) -> Result<(), ProtocolError> {
        self.write_raw(text.as_bytes()).await
    }

    /// Reset the device into its bootloader
    pub async fn enter_programming_mode(&mut self) -> Result<(), ProtocolError> {
        let link = self.link()?;
        let result = reset::enter_programming_mode(link).await;
        self.settle(result).await
    }

    /// Hard-reset the device into its application
    pub async fn reset_to_run(&mut self) -> Result<(), ProtocolError> {
        let link = self.link()?;
        let result = reset::reset_to_run(link).await;
        self.settle(result).await
    }

    /// Deliver received text to `receiver` until the transport ends (pump mode).
    ///
    /// Chunks are decoded as UTF-8 as they arrive; a character split across
    /// chunks is delivered whole and invalid bytes become U+FFFD. Stop it with
    /// a [`CloseHandle`] from another task. The session is released on return.
    pub async fn pump<F>(&mut self, mut receiver: F) -> Result<(), ProtocolError>
    where
        F: FnMut(&str),
    {
        let (link, text) = self.pumped()?;

        let mut delivered = 0usize;
        while let Some(chunk) = link.next_chunk().await {
            let decoded = text.decode(&chunk);
            if !decoded.is_empty() {
                delivered += decoded.len();
                receiver(&decoded);
            }
        }
        let tail = text.finish();
        if !tail.is_empty() {
            receiver(&tail);
        }

        debug!(delivered, "pump reached end of stream");
        self.disconnect().await;
        Ok(())
    }

    /// Counters for the open session (zero when disconnected)
    pub fn counters(&self) -> SessionCounters {
        let Some(session) = &self.session else {
            return SessionCounters::default();
        };
        let mut counters = SessionCounters {
            tx_bytes: session.link.tx_bytes(),
            rx_bytes: session.link.rx_bytes(),
            ..SessionCounters::default()
        };
        if let Channel::Framed(exchange) = &session.channel {
            counters.frames_received = exchange.frames_received();
            counters.frames_flushed = exchange.frames_flushed();
            counters.malformed_escapes = exchange.decoder().malformed_escapes();
            counters.empty_frames = exchange.decoder().empty_frames();
        }
        counters
    }

    async fn open_link(&self) -> Result<Link, ProtocolError> {
        let buffer_size = self.config.effective_buffer_size();
        let name = self.config.port_name.as_str();

        if let Some(addr) = name.strip_prefix(TCP_PREFIX) {
            let stream = TcpStream::connect(addr)
                .await
                .map_err(|e| ProtocolError::OpenFailure(format!("{}: {}", name, e)))?;
            stream.set_nodelay(true)?;
            return Ok(Link::spawn(Unwired::new(stream), buffer_size));
        }

        let port = open_port(name, Some(self.config.baud_rate))?;
        Ok(Link::spawn(port, buffer_size))
    }

    fn install(&mut self, link: Link, port_name: String) {
        let mode = self.config.mode;
        let channel = match mode {
            LinkMode::Framed => Channel::Framed(FrameExchange::new()),
            LinkMode::Raw => Channel::Raw(TimeoutReader::new(self.config.timeout())),
            LinkMode::Pump => Channel::Pump(TextDecoder::new()),
        };
        info!(port = %port_name, ?mode, "connected");
        self.session = Some(Session {
            link,
            channel,
            context: SessionContext {
                port_name,
                mode,
                opened_at: Instant::now(),
            },
        });
        self.state = ConnectionState::Connected;
    }

    /// End the session on `Disconnected` or a failed write; it needs a fresh open.
    async fn settle<T>(&mut self, result: Result<T, ProtocolError>) -> Result<T, ProtocolError> {
        match &result {
            Err(ProtocolError::Disconnected) => self.disconnect().await,
            Err(ProtocolError::Io(e)) => {
                warn!(error = %e, "transport failed, closing session");
                self.disconnect().await;
            }
            _ => {}
        }
        result
    }

    fn link(&mut self) -> Result<&mut Link, ProtocolError> {
        self.session
            .as_mut()
            .map(|s| &mut s.link)
            .ok_or(ProtocolError::NotConnected)
    }

    fn framed(&mut self) -> Result<(&mut Link, &mut FrameExchange), ProtocolError> {
        let session = self.session.as_mut().ok_or(ProtocolError::NotConnected)?;
        match &mut session.channel {
            Channel::Framed(exchange) => Ok((&mut session.link, exchange)),
            _ => Err(ProtocolError::WrongMode {
                expected: LinkMode::Framed,
                actual: session.context.mode,
            }),
        }
    }

    fn raw(&mut self) -> Result<(&mut Link, &mut TimeoutReader), ProtocolError> {
        let session = self.session.as_mut().ok_or(ProtocolError::NotConnected)?;
        match &mut session.channel {
            Channel::Raw(reader) => Ok((&mut session.link, reader)),
            _ => Err(ProtocolError::WrongMode {
                expected: LinkMode::Raw,
                actual: session.context.mode,
            }),
        }
    }

    fn pumped(&mut self) -> Result<(&mut Link, &mut TextDecoder), ProtocolError> {
        let session = self.session.as_mut().ok_or(ProtocolError::NotConnected)?;
        match &mut session.channel {
            Channel::Pump(text) => Ok((&mut session.link, text)),
            _ => Err(ProtocolError::WrongMode {
                expected: LinkMode::Pump,
                actual: session.context.mode,
            }),
        }
    }
}
