//! Parsed system parameter block

use std::fmt;
use std::io::Cursor;

use bitflags::bitflags;
use byteorder::{BigEndian, ReadBytesExt};
use fprust_core::{BaudRate, PacketLength, SecurityLevel};

use crate::error::{Error, Result};

bitflags! {
    /// Module status register bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct StatusRegister: u16 {
        /// Module is executing a command
        const BUSY = 1 << 0;

        /// Last matching operation found a finger
        const FINGER_MATCH = 1 << 1;

        /// Password has been verified this session
        const PASSWORD_VERIFIED = 1 << 2;

        /// Image buffer holds a valid image
        const IMAGE_VALID = 1 << 3;
    }
}

/// System parameters reported by ReadSysPara
///
/// Wire layout (16 bytes, all big-endian):
///
/// ```text
/// 0  - 1   status register
/// 2  - 3   system identifier
/// 4  - 5   template library capacity
/// 6  - 7   security level
/// 8  - 11  device address
/// 12 - 13  data packet length code
/// 14 - 15  baud rate multiplier
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemParameters {
    pub status: StatusRegister,
    pub system_id: u16,
    pub capacity: u16,
    pub security: SecurityLevel,
    pub address: u32,
    pub packet_length: PacketLength,
    pub baud_rate: BaudRate,
}

impl SystemParameters {
    /// Wire size of the parameter block
    pub const LENGTH: usize = 16;

    /// Parse the ReadSysPara response data
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < Self::LENGTH {
            return Err(Error::Parse(format!(
                "system parameter block too short: {} bytes, need {}",
                data.len(),
                Self::LENGTH
            )));
        }

        let mut cur = Cursor::new(data);
        let read_err = |e: std::io::Error| Error::Parse(e.to_string());

        let status = cur.read_u16::<BigEndian>().map_err(read_err)?;
        let system_id = cur.read_u16::<BigEndian>().map_err(read_err)?;
        let capacity = cur.read_u16::<BigEndian>().map_err(read_err)?;
        let security = cur.read_u16::<BigEndian>().map_err(read_err)?;
        let address = cur.read_u32::<BigEndian>().map_err(read_err)?;
        let packet_length = cur.read_u16::<BigEndian>().map_err(read_err)?;
        let baud_rate = cur.read_u16::<BigEndian>().map_err(read_err)?;

        let narrow = |value: u16, what: &str| -> Result<u8> {
            u8::try_from(value)
                .map_err(|_| Error::Parse(format!("{} out of range: {:#06X}", what, value)))
        };

        Ok(Self {
            status: StatusRegister::from_bits_retain(status),
            system_id,
            capacity,
            security: SecurityLevel::try_from(narrow(security, "security level")?)
                .map_err(|e| Error::Parse(e.to_string()))?,
            address,
            packet_length: PacketLength::try_from(narrow(packet_length, "packet length")?)
                .map_err(|e| Error::Parse(e.to_string()))?,
            baud_rate: BaudRate::try_from(narrow(baud_rate, "baud rate")?)
                .map_err(|e| Error::Parse(e.to_string()))?,
        })
    }
}

impl fmt::Display for SystemParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SystemParameters[id=0x{:04X}, capacity={}, security={:?}, address=0x{:08X}, packet={}B, baud={}bps]",
            self.system_id,
            self.capacity,
            self.security,
            self.address,
            self.packet_length.bytes(),
            self.baud_rate.bps()
        )
    }
}
