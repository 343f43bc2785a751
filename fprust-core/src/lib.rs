//! # fprust-core
//!
//! Core protocol implementation for ZFM-x / R30x fingerprint modules.
//!
//! This crate provides the low-level protocol primitives:
//! - Packet structure and encoding/decoding
//! - Checksum calculation
//! - Instruction and command definitions
//! - Confirmation-code table
//! - Protocol constants

pub mod checksum;
pub mod command;
pub mod confirm;
pub mod constants;
pub mod error;
pub mod packet;

pub use command::{Command, Instruction};
pub use confirm::{Confirmation, ConfirmationCode};
pub use constants::{BaudRate, BufferId, PacketLength, ParameterId, SecurityLevel};
pub use error::{Error, Result};
pub use packet::{Packet, PacketId};

/// Maximum encoded packet size
pub const MAX_PACKET_SIZE: usize = Packet::OVERHEAD + Packet::MAX_PAYLOAD_SIZE;

/// Packet header size (start code + address + identifier + length)
pub const HEADER_SIZE: usize = Packet::HEADER_SIZE;
