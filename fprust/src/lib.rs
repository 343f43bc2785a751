//! # fprust
//!
//! Async driver for ZFM-x / R30x / FPM10A optical fingerprint modules
//! speaking the EF01 framed serial protocol.
//!
//! ## Features
//!
//! - Bit-exact packet framing with verified checksums
//! - Strict command/response exchange discipline over any byte channel
//! - Multi-step operations (enroll, search, verify) as explicit state
//!   machines with step-level failure reporting
//! - Async/await API using Tokio
//!
//! ## Quick Start
//!
//! ```no_run
//! use fprust::{Device, EnrollConfig, TcpTransport};
//!
//! #[tokio::main]
//! async fn main() -> fprust::Result<()> {
//!     // The module hangs off a serial bridge
//!     let transport = TcpTransport::new("192.168.1.50", 4001);
//!     let mut device = Device::open(transport, 0xFFFFFFFF);
//!
//!     device.connect().await?;
//!     device.verify_password().await?;
//!
//!     // Enroll a finger into slot 3
//!     let slot = device.enroll(&EnrollConfig::new(3)).await?;
//!     println!("Enrolled into slot {}", slot);
//!
//!     device.close().await?;
//!     Ok(())
//! }
//! ```

pub mod device;
pub mod engine;
pub mod error;
pub mod ops;

// Re-exports
pub use device::Device;
pub use engine::ProtocolEngine;
pub use error::{Error, Result};
pub use ops::{CancelToken, EnrollConfig, EnrollStep, MatchOutcome, SearchOutcome};

// Re-export protocol types
pub use fprust_core::{
    BaudRate, BufferId, Command, Confirmation, ConfirmationCode, Instruction, Packet,
    PacketId, PacketLength, SecurityLevel,
};
pub use fprust_transport::{LoopbackTransport, TcpTransport, Transport};
pub use fprust_types::{IndexTable, StatusRegister, SystemParameters};
