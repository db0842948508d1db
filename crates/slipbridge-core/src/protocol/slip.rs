//! SLIP framing
//!
//! Wire format: `0xC0` + escaped payload + `0xC0`.
//!
//! Inside the payload a literal `0xC0` is sent as `0xDB 0xDC` and a literal
//! `0xDB` as `0xDB 0xDD`. The decoder is a byte-at-a-time state machine that
//! survives arbitrary chunk boundaries, drops noise between frames and
//! re-aligns on the next delimiter after any framing fault.

use tracing::trace;

use super::frame::{Frame, FrameQueue};

/// Frame delimiter
pub const END: u8 = 0xC0;
/// Escape marker
pub const ESC: u8 = 0xDB;
/// Escaped delimiter
pub const ESC_END: u8 = 0xDC;
/// Escaped escape marker
pub const ESC_ESC: u8 = 0xDD;

/// Framing faults recovered inside the decoder. They are counted, never returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramingFault {
    /// A byte other than `0xDC`/`0xDD` followed the escape marker
    MalformedEscape,
    /// Two delimiters with nothing between them
    EmptyFrame,
}

#[derive(Debug)]
enum State {
    /// No frame started
    Idle,
    /// Frame in progress
    Collecting(Vec<u8>),
    /// Previous byte was the escape marker
    Escaped(Vec<u8>),
}

/// Stateful SLIP decoder.
#[derive(Debug)]
pub struct SlipDecoder {
    state: State,
    malformed_escapes: u64,
    empty_frames: u64,
}

impl Default for SlipDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl SlipDecoder {
    /// Create a decoder in the idle state
    pub fn new() -> Self {
        Self {
            state: State::Idle,
            malformed_escapes: 0,
            empty_frames: 0,
        }
    }

    /// Feed a raw chunk, pushing every completed frame into `queue`.
    ///
    /// Returns the number of frames completed by this chunk.
    pub fn feed(&mut self, chunk: &[u8], queue: &mut FrameQueue) -> usize {
        let mut completed = 0;
        for &byte in chunk {
            if let Some(frame) = self.step(byte) {
                if queue.push(frame) {
                    completed += 1;
                }
            }
        }
        completed
    }

    /// Advance the state machine by one byte.
    pub fn step(&mut self, byte: u8) -> Option<Frame> {
        match std::mem::replace(&mut self.state, State::Idle) {
            State::Idle => {
                if byte == END {
                    self.state = State::Collecting(Vec::new());
                }
                None
            }
            State::Collecting(mut partial) => match byte {
                END if partial.is_empty() => {
                    // Out of step with the delimiters: this one opens the next frame.
                    self.fault(FramingFault::EmptyFrame);
                    self.state = State::Collecting(partial);
                    None
                }
                END => Some(Frame::new(partial)),
                ESC => {
                    self.state = State::Escaped(partial);
                    None
                }
                _ => {
                    partial.push(byte);
                    self.state = State::Collecting(partial);
                    None
                }
            },
            State::Escaped(mut partial) => match byte {
                ESC_END => {
                    partial.push(END);
                    self.state = State::Collecting(partial);
                    None
                }
                ESC_ESC => {
                    partial.push(ESC);
                    self.state = State::Collecting(partial);
                    None
                }
                END => {
                    // Dangling escape: drop the frame, keep the boundary.
                    self.fault(FramingFault::MalformedEscape);
                    self.state = State::Collecting(Vec::new());
                    None
                }
                _ => {
                    self.fault(FramingFault::MalformedEscape);
                    None
                }
            },
        }
    }

    /// Drop any partial frame and return to idle
    pub fn reset(&mut self) {
        self.state = State::Idle;
    }

    /// Check if a frame is currently being collected
    pub fn in_frame(&self) -> bool {
        !matches!(self.state, State::Idle)
    }

    /// Frames discarded because of an invalid escape sequence
    pub fn malformed_escapes(&self) -> u64 {
        self.malformed_escapes
    }

    /// Back-to-back delimiter pairs skipped
    pub fn empty_frames(&self) -> u64 {
        self.empty_frames
    }

    fn fault(&mut self, fault: FramingFault) {
        match fault {
            FramingFault::MalformedEscape => self.malformed_escapes += 1,
            FramingFault::EmptyFrame => self.empty_frames += 1,
        }
        trace!(?fault, "slip framing fault recovered");
    }
}

/// Encode a payload as a complete SLIP frame, delimiters included.
pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 2);
    encode_frame_into(payload, &mut out);
    out
}

/// Append the SLIP encoding of `payload` to `out`
pub fn encode_frame_into(payload: &[u8], out: &mut Vec<u8>) {
    out.reserve(payload.len() + 2);
    out.push(END);
    for &byte in payload {
        match byte {
            END => out.extend_from_slice(&[ESC, ESC_END]),
            ESC => out.extend_from_slice(&[ESC, ESC_ESC]),
            _ => out.push(byte),
        }
    }
    out.push(END);
}
