//! EF01 frame checksum
//!
//! From the module datasheet:
//! 1. Sum the packet identifier, the two length bytes and every payload byte
//! 2. Truncate the sum to 16 bits
//!
//! The checksum field itself is not covered. Public documentation for some
//! ZFM-compatible chips is ambiguous on the covered range, so the summation
//! lives here alone: a captured exchange from real hardware can be checked
//! against `verify` in one place.

use tracing::trace;

/// Calculate the checksum for one frame
///
/// `length` is the declared length field (payload length + 2).
///
/// # Examples
///
/// ```
/// use fprust_core::checksum;
///
/// // GenImg command payload: length = 1 + 2 = 3
/// let checksum = checksum::calculate(0x01, 3, &[0x01]);
/// assert_eq!(checksum, 0x0005);
/// ```
pub fn calculate(id: u8, length: u16, payload: &[u8]) -> u16 {
    let [len_hi, len_lo] = length.to_be_bytes();

    let mut sum = u32::from(id) + u32::from(len_hi) + u32::from(len_lo);
    for &byte in payload {
        sum = sum.wrapping_add(u32::from(byte));
    }

    let checksum = (sum & 0xFFFF) as u16;

    trace!(
        id = id,
        length = length,
        payload_len = payload.len(),
        checksum = format!("0x{:04X}", checksum),
        "Calculated checksum"
    );

    checksum
}

/// Verify a received checksum
pub fn verify(id: u8, length: u16, payload: &[u8], expected: u16) -> bool {
    calculate(id, length, payload) == expected
}
