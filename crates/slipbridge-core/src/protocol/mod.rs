//! Serial Protocol Communication
//!
//! Implements the framed serial link used to talk to ROM bootloaders.
//!
//! Supports SLIP-framed request/response exchanges, a raw exact-length/line
//! reader and a text pump over the same transport.

pub mod codec;
mod connection;
mod error;
pub mod exchange;
pub mod frame;
pub mod link;
pub mod packet;
pub mod reader;
pub mod reset;
pub mod serial;
pub mod slip;
pub mod stream;
pub mod text;

pub use codec::SlipCodec;
pub use connection::{
    Connection, ConnectionConfig, ConnectionState, LinkMode, SessionContext, SessionCounters,
};
pub use error::ProtocolError;
pub use exchange::FrameExchange;
pub use frame::{Frame, FrameQueue};
pub use link::{CloseHandle, Link};
pub use packet::{Request, RequestBuilder, MAX_PAYLOAD};
pub use reader::TimeoutReader;
pub use reset::ResetStep;
pub use serial::{list_ports, open_port, PortInfo};
pub use slip::{encode_frame, FramingFault, SlipDecoder};
pub use stream::{ControlLines, Signal, Transport, Unwired};
pub use text::TextDecoder;

/// Default baud rate for bootloader communication
pub const DEFAULT_BAUD_RATE: u32 = 115200;

/// Default read/response window in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 1000;

/// Input buffer capacity when the link carries SLIP frames or pumps text
pub const FRAMED_BUFFER_SIZE: usize = 10_000;

/// Input buffer capacity when the link serves exact-length reads
pub const RAW_BUFFER_SIZE: usize = 65_536;

/// Number of sync exchanges attempted before giving up
pub const DEFAULT_SYNC_ATTEMPTS: u32 = 10;
