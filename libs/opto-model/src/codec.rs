//! Raw register bytes to engineering value strings.
//!
//! The heating unit answers every register request with a little-endian
//! unsigned integer. Two device quirks must be reproduced exactly:
//!
//! - At one decimal place the unit encodes negative temperatures in the top
//!   of the 16-bit range; a scaled value strictly inside `(6400, 6553.6)` is
//!   actually negative and corrected by subtracting 6553.5.
//! - Runtime counters tick in tenths of seconds and are displayed as
//!   `" H:MM:SS"` with unpadded hours, so multi-day totals roll into the
//!   hour field instead of overflowing.
//!
//! All arithmetic is integer-exact; the rendered text never goes through
//! floating point.

use thiserror::Error;

use crate::register::{RegisterSpec, ValueFormat};

/// Decode failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The response byte count does not match the register specification.
    /// This means the configuration disagrees with the device and must
    /// surface loudly rather than be padded or truncated away.
    #[error("invalid response length for register 0x{address:X}: expected {expected} bytes, got {actual}")]
    InvalidLength {
        address: u16,
        expected: usize,
        actual: usize,
    },
}

/// Lower bound of the negative-correction band, in tenths.
const CORRECTION_BAND_LOW: u64 = 64_000;
/// Upper bound (exclusive) of the band, in tenths; equals the full u16 range.
const CORRECTION_BAND_HIGH: u64 = 65_536;
/// Offset subtracted from in-band values, in tenths (6553.5).
const CORRECTION_OFFSET: i64 = 65_535;

/// Decode a raw response into the engineering value string for `spec`.
pub fn decode(bytes: &[u8], spec: &RegisterSpec) -> Result<String, CodecError> {
    if bytes.len() != spec.byte_length {
        return Err(CodecError::InvalidLength {
            address: spec.address,
            expected: spec.byte_length,
            actual: bytes.len(),
        });
    }

    let mut raw: u64 = 0;
    for (index, byte) in bytes.iter().enumerate() {
        raw |= u64::from(*byte) << (index * 8);
    }

    Ok(match spec.format {
        ValueFormat::Default => render_scaled(raw, spec.decimal_places),
        ValueFormat::Hhmmss => render_duration(raw),
    })
}

/// Scale `raw` down by `10^decimal_places` and render without trailing zeros.
fn render_scaled(raw: u64, decimal_places: u32) -> String {
    let mut value = raw as i64;
    if decimal_places == 1 && raw > CORRECTION_BAND_LOW && raw < CORRECTION_BAND_HIGH {
        value -= CORRECTION_OFFSET;
    }
    render_decimal(value, decimal_places)
}

/// Render `value / 10^decimal_places` as a plain decimal string, trimming
/// trailing fractional zeros (`0`, not `0.0`; `10.5`, not `10.50`).
fn render_decimal(value: i64, decimal_places: u32) -> String {
    if decimal_places == 0 {
        return value.to_string();
    }

    let scale = 10u64.pow(decimal_places);
    let sign = if value < 0 { "-" } else { "" };
    let magnitude = value.unsigned_abs();
    let integer = magnitude / scale;
    let mut fraction = format!(
        "{:0width$}",
        magnitude % scale,
        width = decimal_places as usize
    );
    while fraction.ends_with('0') {
        fraction.pop();
    }

    if fraction.is_empty() {
        format!("{sign}{integer}")
    } else {
        format!("{sign}{integer}.{fraction}")
    }
}

/// Render a tenths-of-seconds counter as `" H:MM:SS"`, hours unpadded.
fn render_duration(raw: u64) -> String {
    let total_seconds = raw / 10;
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    format!(" {hours}:{minutes:02}:{seconds:02}")
}
