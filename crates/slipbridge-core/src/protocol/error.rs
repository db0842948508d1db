//! Protocol errors

use thiserror::Error;

use super::stream::Signal;
use super::LinkMode;

/// Errors that can occur during link communication
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Failed to open port: {0}")]
    OpenFailure(String),

    #[error("Read timed out")]
    Timeout,

    #[error("Device disconnected")]
    Disconnected,

    #[error("Not connected to device")]
    NotConnected,

    #[error("Already connected")]
    AlreadyConnected,

    #[error("Operation needs a {expected:?} link, session is {actual:?}")]
    WrongMode { expected: LinkMode, actual: LinkMode },

    #[error("Failed to assign {signal}: {source}")]
    SignalFailed {
        signal: Signal,
        #[source]
        source: std::io::Error,
    },

    #[error("No sync response after {attempts} attempts")]
    SyncFailed { attempts: u32 },

    #[error("Payload of {len} bytes exceeds the {max}-byte size field")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// True when no data arrived within the configured window
    pub fn is_timeout(&self) -> bool {
        matches!(self, ProtocolError::Timeout)
    }

    /// True when the transport ended and the session is gone
    pub fn is_disconnected(&self) -> bool {
        matches!(self, ProtocolError::Disconnected)
    }

    /// Whether the caller may retry on the same session.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ProtocolError::Timeout | ProtocolError::WrongMode { .. } | ProtocolError::SyncFailed { .. }
        )
    }
}
