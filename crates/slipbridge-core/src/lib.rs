//! # SlipBridge Core Library
//!
//! Serial link layer for talking to microcontroller ROM bootloaders.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - SLIP frame encoding and a resynchronizing stream decoder
//! - Request/response exchanges with stale-frame flushing
//! - Timeout-bounded exact-length and line reads for unframed protocols
//! - A text pump for console output
//! - DTR/RTS reset sequencing into the bootloader or the application
//! - Serial port discovery, plus TCP bridges for remote devices
//!
//! ## Example
//!
//! ```rust,ignore
//! use slipbridge_core::prelude::*;
//!
//! let config = ConnectionConfig {
//!     port_name: "/dev/ttyUSB0".into(),
//!     ..ConnectionConfig::default()
//! };
//! let mut conn = Connection::new(config);
//! conn.connect().await?;
//! conn.enter_programming_mode().await?;
//! let response = conn.sync().await?;
//! println!("sync response: {:02X?}", response.as_bytes());
//! ```

pub mod protocol;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::protocol::{
        encode_frame, list_ports, CloseHandle, Connection, ConnectionConfig, ConnectionState,
        Frame, FrameQueue, LinkMode, PortInfo, ProtocolError, Request, SessionContext,
        SessionCounters, Signal, SlipCodec, SlipDecoder, Transport, Unwired,
    };
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
