//! Input Layer
//!
//! Turns files, encoded bytes, and base64 payloads into a [`PixelBuffer`].
//! Every failure here is an [`OcrError::InputDecode`]; the pipeline never starts.

pub mod frame;

pub use frame::{ChannelOrder, PixelBuffer};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use std::path::Path;
use tracing::debug;

use crate::error::OcrError;

/// Decode an image file from disk
pub fn load_path(path: impl AsRef<Path>) -> Result<PixelBuffer, OcrError> {
    let path = path.as_ref();
    let image = image::open(path)
        .map_err(|e| OcrError::input_decode(format!("{}: {}", path.display(), e)))?;
    debug!("Decoded {:?} ({}x{})", path, image.width(), image.height());
    PixelBuffer::from_dynamic(image)
}

/// Decode an encoded image (PNG, JPEG, ...) held in memory
pub fn load_bytes(bytes: &[u8]) -> Result<PixelBuffer, OcrError> {
    if bytes.is_empty() {
        return Err(OcrError::input_decode("empty image payload"));
    }
    let image = image::load_from_memory(bytes)?;
    debug!("Decoded {} bytes ({}x{})", bytes.len(), image.width(), image.height());
    PixelBuffer::from_dynamic(image)
}

/// Decode a base64 image payload, optionally wrapped in a `data:` URI
pub fn load_base64(payload: &str) -> Result<PixelBuffer, OcrError> {
    let bytes = decode_base64_payload(payload)?;
    load_bytes(&bytes)
}

/// Strip a data-URI prefix, restore missing padding and decode.
///
/// Payloads that fail strict decoding get one retry with every character
/// outside the base64 alphabet removed (line breaks, URL-escaping leftovers).
pub fn decode_base64_payload(payload: &str) -> Result<Vec<u8>, OcrError> {
    let trimmed = payload.trim();
    if trimmed.is_empty() {
        return Err(OcrError::input_decode("empty base64 payload"));
    }

    let body = if trimmed.starts_with("data:") {
        match trimmed.split_once(',') {
            Some((_, body)) => body,
            None => return Err(OcrError::input_decode("data URI without a payload")),
        }
    } else {
        trimmed
    };

    match STANDARD.decode(pad_base64(body)) {
        Ok(bytes) => Ok(bytes),
        Err(first) => {
            let cleaned: String = body
                .chars()
                .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '/' | '='))
                .collect();
            debug!("Strict base64 decode failed ({}), retrying on cleaned payload", first);
            STANDARD
                .decode(pad_base64(cleaned.trim_end_matches('=')))
                .map_err(|e| OcrError::input_decode(format!("invalid base64 payload: {}", e)))
        }
    }
}

fn pad_base64(body: &str) -> String {
    let mut padded = body.to_string();
    let remainder = padded.len() % 4;
    if remainder != 0 {
        padded.push_str(&"=".repeat(4 - remainder));
    }
    padded
}
