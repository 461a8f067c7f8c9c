//! Payload decoding
//!
//! Every raw frame is decoded exactly once according to the project's
//! [`DecoderMethod`]:
//!
//! - **Plain text**: the frame must be valid UTF-8. Invalid sequences are
//!   rejected, never replaced, so a corrupted frame can't silently turn into
//!   `U+FFFD` fields.
//! - **Hexadecimal**: ASCII whitespace is ignored; the remaining digits must
//!   come in pairs.
//! - **Base64**: standard alphabet, standard padding.
//!
//! Decode failures are per-frame: the caller drops the frame and continues.

use super::{DecoderMethod, RawFrame};
use crate::error::DecodeError;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

/// A decoded frame payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    bytes: Vec<u8>,
    method: DecoderMethod,
}

impl Payload {
    /// Wrap already-canonical bytes
    pub fn new(bytes: Vec<u8>, method: DecoderMethod) -> Self {
        Self { bytes, method }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn method(&self) -> DecoderMethod {
        self.method
    }

    /// View the payload as UTF-8 text
    pub fn as_text(&self) -> Result<&str, DecodeError> {
        std::str::from_utf8(&self.bytes).map_err(|e| DecodeError::InvalidUtf8 {
            valid_up_to: e.valid_up_to(),
        })
    }
}

/// Decode a raw frame into its canonical payload
pub fn decode(frame: &RawFrame, method: DecoderMethod) -> Result<Payload, DecodeError> {
    let data = frame.as_bytes();
    let bytes = match method {
        DecoderMethod::PlainText => {
            std::str::from_utf8(data).map_err(|e| DecodeError::InvalidUtf8 {
                valid_up_to: e.valid_up_to(),
            })?;
            data.to_vec()
        }
        DecoderMethod::Hexadecimal => {
            let digits: Vec<u8> = data
                .iter()
                .copied()
                .filter(|b| !b.is_ascii_whitespace())
                .collect();
            hex::decode(&digits).map_err(|e| DecodeError::InvalidHex(e.to_string()))?
        }
        DecoderMethod::Base64 => STANDARD
            .decode(data.trim_ascii())
            .map_err(|e| DecodeError::InvalidBase64(e.to_string()))?,
    };

    Ok(Payload::new(bytes, method))
}

/// Encode bytes the way a device using `method` would transmit them
pub fn encode(data: &[u8], method: DecoderMethod) -> Vec<u8> {
    match method {
        DecoderMethod::PlainText => data.to_vec(),
        DecoderMethod::Hexadecimal => hex::encode(data).into_bytes(),
        DecoderMethod::Base64 => STANDARD.encode(data).into_bytes(),
    }
}
