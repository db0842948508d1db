//! Incremental UTF-8 decoding of received chunks
//!
//! A multi-byte character split across two chunks is held back until the
//! rest arrives. Invalid sequences become U+FFFD.

/// Lossy UTF-8 decoder that carries incomplete sequences between chunks.
#[derive(Debug, Default)]
pub struct TextDecoder {
    carry: Vec<u8>,
}

impl TextDecoder {
    /// Create a decoder with nothing carried over
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode `chunk`, prefixed by any bytes carried from the previous call.
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        let mut input = std::mem::take(&mut self.carry);
        input.extend_from_slice(chunk);

        let mut out = String::with_capacity(input.len());
        let mut rest = input.as_slice();
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    out.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        None => {
                            // Truncated character: wait for the next chunk.
                            self.carry = after.to_vec();
                            break;
                        }
                    }
                }
            }
        }
        out
    }

    /// Flush bytes still carried at end of stream
    pub fn finish(&mut self) -> String {
        let carry = std::mem::take(&mut self.carry);
        String::from_utf8_lossy(&carry).into_owned()
    }

    /// Bytes held back waiting for the rest of a character
    pub fn pending(&self) -> usize {
        self.carry.len()
    }
}
