//! Transport layer for the EF01 fingerprint protocol
//!
//! The module is a half-duplex serial device; the driver only needs a duplex
//! byte channel with per-read deadlines. This crate defines that contract and
//! ships two adapters: a TCP adapter for serial-device network bridges and an
//! in-memory loopback adapter used by the test suites.

pub mod error;
pub mod loopback;
pub mod tcp;

pub use error::{Error, Result};
pub use loopback::{LoopbackHandle, LoopbackTransport};
pub use tcp::TcpTransport;

use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;

/// Duplex byte channel to a fingerprint module
#[async_trait]
pub trait Transport: Send {
    /// Open the channel
    async fn connect(&mut self) -> Result<()>;

    /// Release the channel
    async fn disconnect(&mut self) -> Result<()>;

    /// Check if the channel is open
    fn is_connected(&self) -> bool;

    /// Send raw bytes
    async fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Receive whatever bytes are available before the deadline
    ///
    /// Partial reads are expected; the caller reassembles packets. Returns
    /// [`Error::ReadTimeout`] when nothing arrives in time.
    async fn receive(&mut self, timeout: Duration) -> Result<BytesMut>;

    /// Human-readable peer description for logs
    fn endpoint(&self) -> String;
}
