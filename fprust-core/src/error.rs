//! Error types for fprust-core



/// Result type alias for protocol operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core protocol errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Packet is too short to be valid
    #[error("Packet too short: expected at least {expected} bytes, got {actual} bytes")]
    PacketTooShort {
        expected: usize,
        actual: usize,
    },

    /// Start code does not match 0xEF01
    #[error("Start code mismatch: expected 0xEF01, found 0x{found:04X}")]
    StartCodeMismatch {
        found: u16,
    },

    /// Unknown packet identifier byte
    #[error("Unknown packet identifier: 0x{0:02X}")]
    UnknownPacketId(u8),

    /// Declared length field is below the protocol minimum (checksum only)
    #[error("Invalid declared length: {0} (minimum is 2)")]
    InvalidLength(u16),

    /// Checksum verification failed
    #[error("Checksum mismatch: expected 0x{expected:04X}, received 0x{received:04X}")]
    ChecksumMismatch {
        expected: u16,
        received: u16,
    },

    /// Unknown instruction code
    #[error("Unknown instruction code: 0x{0:02X}")]
    UnknownInstruction(u8),

    /// Acknowledge packet carried no status byte
    #[error("Acknowledge payload is empty")]
    EmptyAcknowledge,

    /// Payload too large for the 2-byte length field
    #[error("Payload too large: {size} bytes (max: {max} bytes)")]
    PayloadTooLarge {
        size: usize,
        max: usize,
    },

    /// A protocol field holds a value outside its defined set
    #[error("Invalid {what} value: 0x{value:02X}")]
    InvalidValue {
        what: &'static str,
        value: u8,
    },
}
