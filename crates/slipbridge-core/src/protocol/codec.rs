//! tokio-util codec for SLIP frames
//!
//! Lets any `AsyncRead + AsyncWrite` be wrapped in
//! [`Framed`](tokio_util::codec::Framed) and used as a stream/sink of frames.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::frame::Frame;
use super::slip::{self, SlipDecoder};

/// Codec pairing the [`SlipDecoder`] state machine with the SLIP encoder.
#[derive(Debug, Default)]
pub struct SlipCodec {
    decoder: SlipDecoder,
}

impl SlipCodec {
    /// Create a codec with a fresh decoder
    pub fn new() -> Self {
        Self::default()
    }

    /// Decoder state and fault counters
    pub fn decoder(&self) -> &SlipDecoder {
        &self.decoder
    }
}

impl Decoder for SlipCodec {
    type Item = Frame;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, Self::Error> {
        // Bytes are consumed as they are stepped; partial frames live in the decoder.
        while src.has_remaining() {
            let byte = src.get_u8();
            if let Some(frame) = self.decoder.step(byte) {
                return Ok(Some(frame));
            }
        }
        Ok(None)
    }
}

impl Encoder<&[u8]> for SlipCodec {
    type Error = std::io::Error;

    fn encode(&mut self, payload: &[u8], dst: &mut BytesMut) -> Result<(), Self::Error> {
        let encoded = slip::encode_frame(payload);
        dst.reserve(encoded.len());
        dst.put_slice(&encoded);
        Ok(())
    }
}

impl Encoder<Frame> for SlipCodec {
    type Error = std::io::Error;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        Encoder::<&[u8]>::encode(self, frame.as_bytes(), dst)
    }
}
