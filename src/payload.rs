//! # Payload Codec
//!
//! Every benchmark message carries its own send time. The first
//! [`TIMESTAMP_WIDTH`] bytes of a payload are the producer's wall-clock send
//! time in nanoseconds since the Unix epoch, written as zero-padded ASCII
//! decimal. The rest of the payload is [`FILLER_BYTE`] up to the configured
//! message size.
//!
//! Nanosecond epoch timestamps are 19 digits wide until the year 2286, so the
//! header width is fixed rather than negotiated. A consumer that cannot parse
//! the header is looking at a stream produced with a different message size or
//! codec, and the caller treats that as fatal for the whole run.

use crate::error::PayloadError;

/// Width of the decimal timestamp header in bytes.
pub const TIMESTAMP_WIDTH: usize = 19;

/// Byte used to pad a payload after the timestamp header (`*`).
pub const FILLER_BYTE: u8 = b'*';

/// Build a payload of exactly `size` bytes stamped with `send_time_ns`.
///
/// Fails when `size` cannot hold the header or when the timestamp needs more
/// than [`TIMESTAMP_WIDTH`] digits.
pub fn encode(send_time_ns: u64, size: usize) -> Result<Vec<u8>, PayloadError> {
    if size < TIMESTAMP_WIDTH {
        return Err(PayloadError::TooSmall {
            size,
            width: TIMESTAMP_WIDTH,
        });
    }

    let header = format!("{:0width$}", send_time_ns, width = TIMESTAMP_WIDTH);
    if header.len() != TIMESTAMP_WIDTH {
        return Err(PayloadError::TimestampOverflow(send_time_ns));
    }

    let mut payload = Vec::with_capacity(size);
    payload.extend_from_slice(header.as_bytes());
    payload.resize(size, FILLER_BYTE);
    Ok(payload)
}

/// Parse the send time embedded at the start of `payload`.
pub fn decode(payload: &[u8]) -> Result<u64, PayloadError> {
    if payload.len() < TIMESTAMP_WIDTH {
        return Err(PayloadError::TooShort { len: payload.len() });
    }

    let header = &payload[..TIMESTAMP_WIDTH];
    if !header.iter().all(u8::is_ascii_digit) {
        return Err(PayloadError::NotNumeric {
            header: String::from_utf8_lossy(header).into_owned(),
        });
    }

    // 19 decimal digits always fit in a u64.
    Ok(header
        .iter()
        .fold(0u64, |acc, digit| acc * 10 + u64::from(digit - b'0')))
}
