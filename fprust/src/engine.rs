//! Command protocol engine
//!
//! Drives one command/response exchange at a time over the transport: encode
//! a command packet, send it, then accumulate received bytes and re-attempt
//! decode until a complete acknowledge arrives or the deadline passes. The
//! channel may deliver arbitrary fragments; reassembly happens here.
//!
//! The engine has no retry policy. Malformed packets, transport failures and
//! timeouts surface to the caller unchanged.

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use fprust_core::{Command, Confirmation, Packet, PacketId};
use fprust_transport::Transport;

use crate::error::{Error, Result};

/// Response deadline for one exchange
struct Deadline {
    at: Instant,
    budget: Duration,
}

impl Deadline {
    fn new(budget: Duration) -> Self {
        Self {
            at: Instant::now() + budget,
            budget,
        }
    }

    fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    fn expired(&self) -> Error {
        Error::Timeout { after: self.budget }
    }
}

/// Protocol engine owning the transport and the session address
pub struct ProtocolEngine {
    transport: Box<dyn Transport>,
    address: u32,
    rx: BytesMut,
}

impl ProtocolEngine {
    pub fn new(transport: Box<dyn Transport>, address: u32) -> Self {
        Self {
            transport,
            address,
            rx: BytesMut::with_capacity(1024),
        }
    }

    /// Session address stamped on every packet
    pub fn address(&self) -> u32 {
        self.address
    }

    /// Re-address the session (after a successful SetAdder exchange)
    pub fn set_address(&mut self, address: u32) {
        self.address = address;
    }

    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    pub fn transport_mut(&mut self) -> &mut dyn Transport {
        self.transport.as_mut()
    }

    /// Execute one command and wait for its acknowledge
    ///
    /// # Errors
    ///
    /// - [`Error::Transport`] — channel failure, not retried here
    /// - [`Error::Timeout`] — no complete acknowledge within `timeout`
    /// - [`Error::Protocol`] — framing or checksum failure
    ///
    /// Packets carrying a different address are discarded and the wait
    /// continues; the overall deadline still applies.
    pub async fn execute(&mut self, command: &Command, timeout: Duration) -> Result<Confirmation> {
        // A late acknowledge from an aborted exchange must never satisfy a
        // new command.
        self.rx.clear();

        debug!(command = %command, "Executing command");

        let packet = Packet::with_payload(
            self.address,
            PacketId::Command,
            command.encode_payload(),
        );
        self.send_packet(&packet).await?;

        let deadline = Deadline::new(timeout);
        loop {
            let packet = self.read_packet(&deadline).await?;
            if packet.id != PacketId::Acknowledge {
                warn!(packet = %packet, "Expected acknowledge, discarding");
                continue;
            }

            let confirmation = Confirmation::parse(&packet.payload)?;
            debug!(confirmation = %confirmation, "Command acknowledged");
            return Ok(confirmation);
        }
    }

    /// Collect the data phase following an accepted transfer command
    ///
    /// Concatenates Data-packet payloads until an EndOfData packet arrives.
    /// The deadline is refreshed for each packet, matching module behavior
    /// during long image transfers.
    pub async fn read_data(&mut self, timeout: Duration) -> Result<Bytes> {
        let mut data = BytesMut::new();

        loop {
            let deadline = Deadline::new(timeout);
            let packet = self.read_packet(&deadline).await?;

            match packet.id {
                PacketId::Data => data.extend_from_slice(&packet.payload),
                PacketId::EndOfData => {
                    data.extend_from_slice(&packet.payload);
                    debug!(len = data.len(), "Data transfer complete");
                    return Ok(data.freeze());
                }
                _ => warn!(packet = %packet, "Expected data packet, discarding"),
            }
        }
    }

    /// Send a data phase: `chunk`-sized Data packets, then EndOfData
    pub async fn send_data(&mut self, data: &[u8], chunk: usize) -> Result<()> {
        let chunk = chunk.max(1);
        let full_chunks = data.len().saturating_sub(1) / chunk;
        let tail_start = full_chunks * chunk;

        for piece in data[..tail_start].chunks(chunk) {
            let packet = Packet::with_payload(
                self.address,
                PacketId::Data,
                Bytes::copy_from_slice(piece),
            );
            self.send_packet(&packet).await?;
        }

        let packet = Packet::with_payload(
            self.address,
            PacketId::EndOfData,
            Bytes::copy_from_slice(&data[tail_start..]),
        );
        self.send_packet(&packet).await?;

        debug!(len = data.len(), chunk = chunk, "Data sent");
        Ok(())
    }

    async fn send_packet(&mut self, packet: &Packet) -> Result<()> {
        trace!(packet = %packet, "TX");

        let encoded = packet.encode();
        trace!(
            "TX {} bytes: {}",
            encoded.len(),
            hex::encode(&encoded[..encoded.len().min(32)])
        );

        self.transport.send(&encoded).await?;
        Ok(())
    }

    /// Read until one complete packet for this session decodes
    async fn read_packet(&mut self, deadline: &Deadline) -> Result<Packet> {
        loop {
            match Packet::decode_partial(&self.rx)? {
                Some((packet, consumed)) => {
                    let _ = self.rx.split_to(consumed);
                    trace!(packet = %packet, "RX");

                    // Stray traffic (noise, another module on the bus) must
                    // not abort the wait.
                    if packet.address != self.address {
                        warn!(
                            address = format!("0x{:08X}", packet.address),
                            "Discarding packet with unexpected address"
                        );
                        continue;
                    }

                    return Ok(packet);
                }
                None => {
                    let remaining = deadline.remaining();
                    if remaining.is_zero() {
                        return Err(deadline.expired());
                    }

                    let chunk = self.transport.receive(remaining).await.map_err(|e| match e {
                        fprust_transport::Error::ReadTimeout => deadline.expired(),
                        other => Error::Transport(other),
                    })?;

                    trace!(
                        "RX {} bytes: {}",
                        chunk.len(),
                        hex::encode(&chunk[..chunk.len().min(32)])
                    );
                    self.rx.extend_from_slice(&chunk);
                }
            }
        }
    }
}
