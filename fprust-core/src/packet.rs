//! EF01 protocol packet structure and encoding/decoding

use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

use crate::{
    checksum,
    constants::START_CODE,
    error::{Error, Result},
};

/// Packet identifier byte
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketId {
    /// Command from host to module
    Command = 0x01,

    /// Data chunk (follow-up to an accepted transfer command)
    Data = 0x02,

    /// Acknowledge from module to host
    Acknowledge = 0x07,

    /// Final data chunk of a transfer
    EndOfData = 0x08,
}

impl From<PacketId> for u8 {
    fn from(id: PacketId) -> u8 {
        id as u8
    }
}

impl TryFrom<u8> for PacketId {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x01 => Ok(Self::Command),
            0x02 => Ok(Self::Data),
            0x07 => Ok(Self::Acknowledge),
            0x08 => Ok(Self::EndOfData),
            _ => Err(Error::UnknownPacketId(value)),
        }
    }
}

impl fmt::Display for PacketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Command => "COMMAND",
            Self::Data => "DATA",
            Self::Acknowledge => "ACK",
            Self::EndOfData => "END_OF_DATA",
        };
        write!(f, "{}(0x{:02X})", name, *self as u8)
    }
}

/// EF01 protocol packet
///
/// # Packet Structure
///
/// ```text
/// ┌────────────┬────────────┬────────────┬────────────┬────────────┬────────────┐
/// │ Start code │  Address   │ Identifier │   Length   │  Payload   │  Checksum  │
/// │  2 bytes   │  4 bytes   │   1 byte   │  2 bytes   │  N bytes   │  2 bytes   │
/// │  (0xEF01)  │  (BE u32)  │            │  (BE u16)  │            │  (BE u16)  │
/// └────────────┴────────────┴────────────┴────────────┴────────────┴────────────┘
/// ```
///
/// All multi-byte values are in big-endian format. The length field counts the
/// payload plus the two checksum bytes; the checksum is the truncated 16-bit
/// sum of identifier, length bytes and payload.
///
/// # Examples
///
/// ```
/// use fprust_core::{Packet, PacketId};
///
/// let packet = Packet::with_payload(0xFFFFFFFF, PacketId::Command, vec![0x01]);
/// let encoded = packet.encode();
///
/// let decoded = Packet::decode(&encoded).unwrap();
/// assert_eq!(packet, decoded);
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct Packet {
    /// Device address shared by all packets of a session
    pub address: u32,

    /// Packet identifier
    pub id: PacketId,

    /// Packet payload (instruction + parameters, status + data, or raw data)
    pub payload: Bytes,
}

impl Packet {
    /// Fixed header size: start code + address + identifier + length
    pub const HEADER_SIZE: usize = 9;

    /// Framing overhead of an empty packet (header + checksum)
    pub const OVERHEAD: usize = Self::HEADER_SIZE + 2;

    /// Maximum payload size the 2-byte length field can declare
    pub const MAX_PAYLOAD_SIZE: usize = 65535 - 2;

    /// Create a new packet with empty payload
    pub fn new(address: u32, id: PacketId) -> Self {
        Self {
            address,
            id,
            payload: Bytes::new(),
        }
    }

    /// Create a packet with payload
    ///
    /// The payload must not exceed [`Packet::MAX_PAYLOAD_SIZE`]; every
    /// payload this crate builds is orders of magnitude below that bound.
    pub fn with_payload(address: u32, id: PacketId, payload: impl Into<Bytes>) -> Self {
        Self {
            address,
            id,
            payload: payload.into(),
        }
    }

    /// Declared length field value: payload length + 2 checksum bytes
    pub fn length(&self) -> u16 {
        (self.payload.len() + 2) as u16
    }

    /// Calculate the checksum for this packet
    pub fn checksum(&self) -> u16 {
        checksum::calculate(self.id.into(), self.length(), &self.payload)
    }

    /// Encode packet to bytes
    ///
    /// Deterministic; the checksum is always recomputed.
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(Self::OVERHEAD + self.payload.len());

        buf.put_u16(START_CODE);
        buf.put_u32(self.address);
        buf.put_u8(self.id.into());
        buf.put_u16(self.length());
        buf.put_slice(&self.payload);
        buf.put_u16(self.checksum());

        buf
    }

    /// Decode one packet from a complete buffer
    ///
    /// Bytes beyond the declared packet length are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Fewer bytes are available than the declared length requires
    /// - The start code is not 0xEF01
    /// - The identifier byte is unknown
    /// - Checksum verification fails
    ///
    /// A packet failing checksum is never returned.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        match Self::decode_partial(buf)? {
            Some((packet, _)) => Ok(packet),
            None => Err(Error::PacketTooShort {
                expected: Self::expected_len(buf),
                actual: buf.len(),
            }),
        }
    }

    /// Attempt to decode a packet from the front of a partially received buffer
    ///
    /// Returns `Ok(None)` when the buffer holds a valid prefix of a packet and
    /// more bytes are needed. On success returns the packet and the number of
    /// bytes it consumed, so a read loop can drain its accumulator. Input is
    /// never mutated.
    pub fn decode_partial(buf: &[u8]) -> Result<Option<(Self, usize)>> {
        if buf.len() < 2 {
            return Ok(None);
        }

        let start = u16::from_be_bytes([buf[0], buf[1]]);
        if start != START_CODE {
            return Err(Error::StartCodeMismatch { found: start });
        }

        if buf.len() < Self::HEADER_SIZE {
            return Ok(None);
        }

        let address = u32::from_be_bytes([buf[2], buf[3], buf[4], buf[5]]);
        let id = PacketId::try_from(buf[6])?;
        let declared = u16::from_be_bytes([buf[7], buf[8]]);

        if declared < 2 {
            return Err(Error::InvalidLength(declared));
        }

        let total = Self::HEADER_SIZE + declared as usize;
        if buf.len() < total {
            return Ok(None);
        }

        let payload = &buf[Self::HEADER_SIZE..total - 2];
        let received = u16::from_be_bytes([buf[total - 2], buf[total - 1]]);
        let calculated = checksum::calculate(id.into(), declared, payload);

        if calculated != received {
            return Err(Error::ChecksumMismatch {
                expected: calculated,
                received,
            });
        }

        let packet = Self {
            address,
            id,
            payload: Bytes::copy_from_slice(payload),
        };

        Ok(Some((packet, total)))
    }

    /// Total encoded size of this packet
    pub fn size(&self) -> usize {
        Self::OVERHEAD + self.payload.len()
    }

    fn expected_len(buf: &[u8]) -> usize {
        if buf.len() >= Self::HEADER_SIZE {
            Self::HEADER_SIZE + u16::from_be_bytes([buf[7], buf[8]]) as usize
        } else {
            Self::OVERHEAD
        }
    }
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packet")
            .field("address", &format!("0x{:08X}", self.address))
            .field("id", &self.id)
            .field("checksum", &format!("0x{:04X}", self.checksum()))
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Packet[{}](address=0x{:08X}, len={})",
            self.id,
            self.address,
            self.payload.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn test_packet_new() {
        let packet = Packet::new(0xFFFFFFFF, PacketId::Command);
        assert_eq!(packet.address, 0xFFFFFFFF);
        assert_eq!(packet.id, PacketId::Command);
        assert_eq!(packet.payload.len(), 0);
        assert_eq!(packet.length(), 2);
    }

    #[test]
    fn test_encode_known_vector_default_address() {
        // GenImg command frame from the module datasheet
        let packet = Packet::with_payload(0xFFFFFFFF, PacketId::Command, vec![0x01]);
        let expected: &[u8] = &[
            0xEF, 0x01, 0xFF, 0xFF, 0xFF, 0xFF, 0x01, 0x00, 0x03, 0x01, 0x00, 0x05,
        ];

        assert_eq!(packet.encode().as_ref(), expected);
    }

    #[test]
    fn test_encode_known_vector_low_address() {
        let packet = Packet::with_payload(0x00000001, PacketId::Command, vec![0x01]);
        let expected: &[u8] = &[
            0xEF, 0x01, 0x00, 0x00, 0x00, 0x01, 0x01, 0x00, 0x03, 0x01, 0x00, 0x05,
        ];

        assert_eq!(packet.encode().as_ref(), expected);
    }

    #[test]
    fn test_packet_encode_decode() {
        let original = Packet::with_payload(0x00000001, PacketId::Command, vec![1, 2, 3, 4]);

        let encoded = original.encode();
        let decoded = Packet::decode(&encoded).unwrap();

        assert_eq!(original, decoded);
    }

    #[test]
    fn test_encode_decode_every_id() {
        for id in [
            PacketId::Command,
            PacketId::Data,
            PacketId::Acknowledge,
            PacketId::EndOfData,
        ] {
            let original = Packet::with_payload(0xDEADBEEF, id, vec![0x42; 17]);
            let decoded = Packet::decode(&original.encode()).unwrap();
            assert_eq!(original, decoded);
        }
    }

    #[test]
    fn test_decode_checksum_corruption() {
        let packet = Packet::with_payload(0xFFFFFFFF, PacketId::Command, vec![0x01]);
        let mut encoded = packet.encode();

        // Corrupt the low checksum byte
        let last = encoded.len() - 1;
        encoded[last] ^= 0x01;

        let result = Packet::decode(&encoded);
        assert!(matches!(result, Err(Error::ChecksumMismatch { .. })));
    }

    #[test]
    fn test_decode_single_bit_flips() {
        // Any single-bit flip in payload or checksum must be caught: the
        // additive checksum cannot collide under a one-bit change.
        let packet = Packet::with_payload(
            0xFFFFFFFF,
            PacketId::Command,
            vec![0x04, 0x01, 0x00, 0x00, 0x03, 0xE8],
        );
        let encoded = packet.encode();

        for byte_idx in Packet::HEADER_SIZE..encoded.len() {
            for bit in 0..8 {
                let mut corrupted = encoded.clone();
                corrupted[byte_idx] ^= 1 << bit;

                let result = Packet::decode(&corrupted);
                assert!(
                    matches!(result, Err(Error::ChecksumMismatch { .. })),
                    "flip at byte {} bit {} went undetected",
                    byte_idx,
                    bit
                );
            }
        }
    }

    #[test]
    fn test_decode_start_code_mismatch() {
        let result = Packet::decode(&[0xAA, 0x55, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x02]);
        assert!(matches!(
            result,
            Err(Error::StartCodeMismatch { found: 0xAA55 })
        ));
    }

    #[test]
    fn test_decode_unknown_packet_id() {
        let mut encoded = Packet::new(0xFFFFFFFF, PacketId::Command).encode();
        encoded[6] = 0x42;

        let result = Packet::decode(&encoded);
        assert!(matches!(result, Err(Error::UnknownPacketId(0x42))));
    }

    #[test]
    fn test_decode_too_short() {
        let packet = Packet::with_payload(0xFFFFFFFF, PacketId::Command, vec![0x01]);
        let encoded = packet.encode();

        let result = Packet::decode(&encoded[..encoded.len() - 3]);
        assert!(matches!(result, Err(Error::PacketTooShort { .. })));
    }

    #[test]
    fn test_decode_partial_incremental() {
        // Feed the encoded frame one byte at a time; only the final byte
        // completes the packet.
        let packet = Packet::with_payload(0xFFFFFFFF, PacketId::Acknowledge, vec![0x00, 0x12]);
        let encoded = packet.encode();

        for end in 0..encoded.len() {
            let result = Packet::decode_partial(&encoded[..end]).unwrap();
            assert!(result.is_none(), "incomplete at {} bytes", end);
        }

        let (decoded, consumed) = Packet::decode_partial(&encoded).unwrap().unwrap();
        assert_eq!(decoded, packet);
        assert_eq!(consumed, encoded.len());
    }

    #[test]
    fn test_decode_partial_reports_consumed() {
        let first = Packet::with_payload(0xFFFFFFFF, PacketId::Acknowledge, vec![0x00]);
        let second = Packet::with_payload(0xFFFFFFFF, PacketId::Data, vec![0xAB; 8]);

        let mut stream = first.encode();
        stream.extend_from_slice(&second.encode());

        let (decoded, consumed) = Packet::decode_partial(&stream).unwrap().unwrap();
        assert_eq!(decoded, first);

        let (decoded, _) = Packet::decode_partial(&stream[consumed..]).unwrap().unwrap();
        assert_eq!(decoded, second);
    }

    #[test]
    fn test_decode_invalid_length() {
        let mut encoded = Packet::new(0xFFFFFFFF, PacketId::Command).encode();
        encoded[7] = 0x00;
        encoded[8] = 0x01;

        let result = Packet::decode(&encoded);
        assert!(matches!(result, Err(Error::InvalidLength(1))));
    }

    #[test]
    fn test_packet_large_payload() {
        let payload = vec![0xAB; 1000];
        let packet = Packet::with_payload(0x00000001, PacketId::Data, payload.clone());

        let decoded = Packet::decode(&packet.encode()).unwrap();
        assert_eq!(decoded.payload.as_ref(), payload.as_slice());
    }

    proptest! {
        #[test]
        fn prop_roundtrip(
            address: u32,
            id_byte in prop_oneof![Just(0x01u8), Just(0x02), Just(0x07), Just(0x08)],
            payload in proptest::collection::vec(any::<u8>(), 0..2048),
        ) {
            let id = PacketId::try_from(id_byte).unwrap();
            let original = Packet::with_payload(address, id, payload);

            let decoded = Packet::decode(&original.encode()).unwrap();
            prop_assert_eq!(original, decoded);
        }
    }
}
