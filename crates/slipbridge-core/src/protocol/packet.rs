//! Request encoding
//!
//! Bootloader request layout (inside the SLIP frame):
//! - 1 byte: direction (`0x00` = host to device)
//! - 1 byte: opcode
//! - 2 bytes: payload length (little-endian)
//! - 4 bytes: checksum (little-endian, only meaningful for data-carrying opcodes)
//! - N bytes: payload

use byteorder::{ByteOrder, LittleEndian};

use super::slip;
use super::ProtocolError;

/// Direction byte of host-to-device requests
pub const DIRECTION_REQUEST: u8 = 0x00;

/// Opcode of the synchronization probe
pub const OP_SYNC: u8 = 0x08;

/// Payload of the synchronization probe: `07 07 12 20` then 32 x `0x55`
pub const SYNC_PAYLOAD: [u8; 36] = {
    let mut payload = [0x55u8; 36];
    payload[0] = 0x07;
    payload[1] = 0x07;
    payload[2] = 0x12;
    payload[3] = 0x20;
    payload
};

const HEADER_SIZE: usize = 8;

/// Largest payload the 16-bit size field can describe
pub const MAX_PAYLOAD: usize = u16::MAX as usize;

/// A bootloader request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Command opcode
    pub opcode: u8,
    /// Checksum field
    pub checksum: u32,
    /// Request payload
    pub payload: Vec<u8>,
}

impl Request {
    /// Create a request with a zero checksum
    pub fn new(opcode: u8, payload: Vec<u8>) -> Self {
        Self {
            opcode,
            checksum: 0,
            payload,
        }
    }

    /// The synchronization probe
    pub fn sync() -> Self {
        Self::new(OP_SYNC, SYNC_PAYLOAD.to_vec())
    }

    /// Encode header and payload, without SLIP framing.
    ///
    /// Fails with `PayloadTooLarge` if the payload does not fit the size field.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        let size = u16::try_from(self.payload.len()).map_err(|_| ProtocolError::PayloadTooLarge {
            len: self.payload.len(),
            max: MAX_PAYLOAD,
        })?;

        let mut bytes = Vec::with_capacity(self.encoded_size());
        let mut header = [0u8; HEADER_SIZE];
        header[0] = DIRECTION_REQUEST;
        header[1] = self.opcode;
        LittleEndian::write_u16(&mut header[2..4], size);
        LittleEndian::write_u32(&mut header[4..8], self.checksum);
        bytes.extend_from_slice(&header);
        bytes.extend_from_slice(&self.payload);
        Ok(bytes)
    }

    /// Encode as a complete SLIP frame, ready for the wire
    pub fn to_frame(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(slip::encode_frame(&self.to_bytes()?))
    }

    /// Unframed encoded size
    pub fn encoded_size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }
}

/// Builder for constructing requests
pub struct RequestBuilder {
    opcode: u8,
    checksum: u32,
    payload: Vec<u8>,
}

impl RequestBuilder {
    /// Start a request for `opcode`
    pub fn new(opcode: u8) -> Self {
        Self {
            opcode,
            checksum: 0,
            payload: Vec::new(),
        }
    }

    /// Set the checksum field
    pub fn checksum(mut self, checksum: u32) -> Self {
        self.checksum = checksum;
        self
    }

    /// Add a single byte
    pub fn byte(mut self, b: u8) -> Self {
        self.payload.push(b);
        self
    }

    /// Add a 32-bit value (little-endian)
    pub fn u32_le(mut self, value: u32) -> Self {
        let mut bytes = [0u8; 4];
        LittleEndian::write_u32(&mut bytes, value);
        self.payload.extend_from_slice(&bytes);
        self
    }

    /// Add raw bytes
    pub fn bytes(mut self, data: &[u8]) -> Self {
        self.payload.extend_from_slice(data);
        self
    }

    /// Build the request
    pub fn build(self) -> Request {
        Request {
            opcode: self.opcode,
            checksum: self.checksum,
            payload: self.payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_sync_frame_matches_wire_literal() {
        let mut expected = vec![
            0xC0, 0x00, 0x08, 0x24, 0x00, 0x00, 0x00, 0x00, 0x00, 0x07, 0x07, 0x12, 0x20,
        ];
        expected.extend_from_slice(&[0x55; 32]);
        expected.push(0xC0);

        let frame = Request::sync().to_frame().unwrap();
        assert_eq!(frame.len(), 46);
        assert_eq!(frame, expected);
    }

    #[test]
    fn test_builder_layout() {
        let request = RequestBuilder::new(0x0A)
            .checksum(0xEF)
            .u32_le(0x1234_5678)
            .byte(0xC0)
            .build();

        let bytes = request.to_bytes().unwrap();
        assert_eq!(bytes[0], DIRECTION_REQUEST);
        assert_eq!(bytes[1], 0x0A);
        assert_eq!(LittleEndian::read_u16(&bytes[2..4]), 5);
        assert_eq!(LittleEndian::read_u32(&bytes[4..8]), 0xEF);
        assert_eq!(&bytes[8..], &[0x78, 0x56, 0x34, 0x12, 0xC0]);
        // The literal delimiter in the payload must be escaped on the wire
        assert!(request.to_frame().unwrap().windows(2).any(|w| w == &[0xDB, 0xDC]));
    }

    #[test]
    fn test_oversized_payload_is_rejected() {
        let request = RequestBuilder::new(0x03).bytes(&vec![0u8; MAX_PAYLOAD + 2]).build();
        assert!(matches!(
            request.to_frame(),
            Err(ProtocolError::PayloadTooLarge { len, max: MAX_PAYLOAD }) if len == MAX_PAYLOAD + 2
        ));

        let largest = RequestBuilder::new(0x03).bytes(&vec![0u8; MAX_PAYLOAD]).build();
        let bytes = largest.to_bytes().unwrap();
        assert_eq!(LittleEndian::read_u16(&bytes[2..4]), u16::MAX);
    }
}
