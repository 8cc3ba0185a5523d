//! Utility module
//!
//! Fixed-width UTF-8 text fields and fixed-point quantisation shared by the
//! payload and profile codecs.

use crate::core::{Error, Result};

/// Writes `text` into a `width`-byte field, truncating at the last whole
/// character that fits and padding with zeros.
pub fn encode_text(text: &str, width: usize) -> Vec<u8> {
    let mut end = text.len().min(width);
    while !text.is_char_boundary(end) {
        end -= 1;
    }

    let mut field = vec![0u8; width];
    field[..end].copy_from_slice(&text.as_bytes()[..end]);
    field
}

/// Reads a fixed-width text field. Stops at the first zero byte and keeps the
/// longest valid UTF-8 prefix; anything after it is filler.
pub fn decode_text(field: &[u8]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    let bytes = &field[..end];
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_owned(),
        Err(e) => String::from_utf8_lossy(&bytes[..e.valid_up_to()]).into_owned(),
    }
}

/// Converts a physical value to an 8-bit fixed-point step count
pub fn quantize_u8(field: &'static str, value: f32, scale: f32) -> Result<u8> {
    let steps = (value / scale).round();
    if !steps.is_finite() || steps < 0.0 || steps > u8::MAX as f32 {
        return Err(Error::ValueOutOfRange { field, value });
    }
    Ok(steps as u8)
}

/// Converts a 8-bit fixed-point step count back to a physical value
pub fn dequantize_u8(raw: u8, scale: f32) -> f32 {
    raw as f32 * scale
}
