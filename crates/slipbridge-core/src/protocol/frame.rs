//! Decoded frames and the queue that holds them until consumed.

use std::collections::VecDeque;
use std::ops::Deref;

/// A complete, unescaped message extracted from the byte stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    payload: Vec<u8>,
}

impl Frame {
    /// Wrap an unescaped payload
    pub fn new(payload: Vec<u8>) -> Self {
        Self { payload }
    }

    /// Payload bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.payload
    }

    /// Take ownership of the payload
    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }
}

impl Deref for Frame {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.payload
    }
}

impl AsRef<[u8]> for Frame {
    fn as_ref(&self) -> &[u8] {
        &self.payload
    }
}

impl From<Vec<u8>> for Frame {
    fn from(payload: Vec<u8>) -> Self {
        Self::new(payload)
    }
}

impl From<Frame> for Vec<u8> {
    fn from(frame: Frame) -> Self {
        frame.payload
    }
}

impl PartialEq<[u8]> for Frame {
    fn eq(&self, other: &[u8]) -> bool {
        self.payload == other
    }
}

impl PartialEq<&[u8]> for Frame {
    fn eq(&self, other: &&[u8]) -> bool {
        self.payload == *other
    }
}

impl<const N: usize> PartialEq<[u8; N]> for Frame {
    fn eq(&self, other: &[u8; N]) -> bool {
        self.payload == other
    }
}

/// FIFO of decoded frames, in the order their closing delimiter arrived.
///
/// Never holds a zero-length frame.
#[derive(Debug, Default)]
pub struct FrameQueue {
    frames: VecDeque<Frame>,
}

impl FrameQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a completed frame. Empty frames are refused and `false` is returned.
    pub fn push(&mut self, frame: Frame) -> bool {
        if frame.is_empty() {
            return false;
        }
        self.frames.push_back(frame);
        true
    }

    /// Remove and return the oldest frame
    pub fn pop(&mut self) -> Option<Frame> {
        self.frames.pop_front()
    }

    /// Discard every queued frame, returning how many were dropped
    pub fn clear(&mut self) -> usize {
        let dropped = self.frames.len();
        self.frames.clear();
        dropped
    }

    /// Number of queued frames
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Check if no frames are waiting
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}
