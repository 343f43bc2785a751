//! Protocol constants

use std::time::Duration;

use crate::error::{Error, Result};

/// Fixed 2-byte start code marking every packet
pub const START_CODE: u16 = 0xEF01;

/// Factory default module address
pub const DEFAULT_ADDRESS: u32 = 0xFFFF_FFFF;

/// Factory default module password
pub const DEFAULT_PASSWORD: u32 = 0x0000_0000;

/// Default per-command response timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Notepad page count
pub const NOTEPAD_PAGES: u8 = 16;

/// Notepad page size in bytes
pub const NOTEPAD_PAGE_SIZE: usize = 32;

/// Raw fingerprint image dimensions (4 bits per pixel on the wire)
pub const IMAGE_WIDTH: usize = 256;
pub const IMAGE_HEIGHT: usize = 288;

/// Feature buffer slots on the module
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BufferId {
    Buffer1 = 0x01,
    Buffer2 = 0x02,
}

impl TryFrom<u8> for BufferId {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x01 => Ok(Self::Buffer1),
            0x02 => Ok(Self::Buffer2),
            _ => Err(Error::InvalidValue {
                what: "buffer",
                value,
            }),
        }
    }
}

/// Writable system parameters (SetSysPara register numbers)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ParameterId {
    BaudRate = 4,
    SecurityLevel = 5,
    PacketLength = 6,
}

/// Serial baud rate settings, stored as multiples of 9600 bps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BaudRate {
    B9600 = 1,
    B19200 = 2,
    B28800 = 3,
    B38400 = 4,
    B48000 = 5,
    B57600 = 6,
    B67200 = 7,
    B76800 = 8,
    B86400 = 9,
    B96000 = 10,
    B105600 = 11,
    B115200 = 12,
}

impl BaudRate {
    /// Bits per second
    pub fn bps(self) -> u32 {
        9600 * self as u32
    }
}

impl TryFrom<u8> for BaudRate {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(Self::B9600),
            2 => Ok(Self::B19200),
            3 => Ok(Self::B28800),
            4 => Ok(Self::B38400),
            5 => Ok(Self::B48000),
            6 => Ok(Self::B57600),
            7 => Ok(Self::B67200),
            8 => Ok(Self::B76800),
            9 => Ok(Self::B86400),
            10 => Ok(Self::B96000),
            11 => Ok(Self::B105600),
            12 => Ok(Self::B115200),
            _ => Err(Error::InvalidValue {
                what: "baud rate",
                value,
            }),
        }
    }
}

/// Matching security level (higher = stricter, lower false accept rate)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SecurityLevel {
    Level1 = 1,
    Level2 = 2,
    Level3 = 3,
    Level4 = 4,
    Level5 = 5,
}

impl TryFrom<u8> for SecurityLevel {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(Self::Level1),
            2 => Ok(Self::Level2),
            3 => Ok(Self::Level3),
            4 => Ok(Self::Level4),
            5 => Ok(Self::Level5),
            _ => Err(Error::InvalidValue {
                what: "security level",
                value,
            }),
        }
    }
}

/// Data-packet payload size negotiated with the module
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketLength {
    Bytes32 = 0,
    Bytes64 = 1,
    Bytes128 = 2,
    Bytes256 = 3,
}

impl PacketLength {
    /// Chunk size in bytes
    pub fn bytes(self) -> usize {
        32 << (self as usize)
    }
}

impl TryFrom<u8> for PacketLength {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Bytes32),
            1 => Ok(Self::Bytes64),
            2 => Ok(Self::Bytes128),
            3 => Ok(Self::Bytes256),
            _ => Err(Error::InvalidValue {
                what: "packet length",
                value,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_baud_rate_bps() {
        assert_eq!(BaudRate::B9600.bps(), 9600);
        assert_eq!(BaudRate::B57600.bps(), 57600);
        assert_eq!(BaudRate::B115200.bps(), 115200);
    }

    #[test]
    fn test_packet_length_bytes() {
        assert_eq!(PacketLength::Bytes32.bytes(), 32);
        assert_eq!(PacketLength::Bytes64.bytes(), 64);
        assert_eq!(PacketLength::Bytes128.bytes(), 128);
        assert_eq!(PacketLength::Bytes256.bytes(), 256);
    }

    #[test]
    fn test_invalid_values() {
        assert!(BufferId::try_from(0x03).is_err());
        assert!(BaudRate::try_from(0).is_err());
        assert!(SecurityLevel::try_from(6).is_err());
        assert!(PacketLength::try_from(4).is_err());
    }
}
