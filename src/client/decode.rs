//! Incremental UTF-8 decoding of a chunked body.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("invalid UTF-8 at byte {offset} of the response body")]
    Invalid { offset: usize },

    #[error("response body ended inside a UTF-8 sequence ({pending} bytes pending)")]
    Truncated { pending: usize },
}

/// Decodes a byte stream whose chunks may split multi-byte characters.
///
/// Incomplete trailing sequences are carried into the next push.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
    consumed: usize,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes as much of `bytes` (after any carried-over prefix) as possible.
    pub fn push(&mut self, bytes: &[u8]) -> Result<String, DecodeError> {
        self.pending.extend_from_slice(bytes);

        let valid = match std::str::from_utf8(&self.pending) {
            Ok(_) => self.pending.len(),
            Err(e) if e.error_len().is_none() => e.valid_up_to(),
            Err(e) => {
                return Err(DecodeError::Invalid {
                    offset: self.consumed + e.valid_up_to(),
                });
            }
        };

        let text = String::from_utf8_lossy(&self.pending[..valid]).into_owned();
        self.pending.drain(..valid);
        self.consumed += valid;
        Ok(text)
    }

    /// Checks that the body did not end mid-character.
    pub fn finish(&self) -> Result<(), DecodeError> {
        if self.pending.is_empty() {
            Ok(())
        } else {
            Err(DecodeError::Truncated {
                pending: self.pending.len(),
            })
        }
    }
}
