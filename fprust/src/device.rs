//! High-level device session

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, info, warn};

use fprust_core::{
    constants::{DEFAULT_PASSWORD, DEFAULT_TIMEOUT, NOTEPAD_PAGES, NOTEPAD_PAGE_SIZE},
    BaudRate, BufferId, Command, Confirmation, ConfirmationCode, PacketLength, ParameterId,
    SecurityLevel,
};
use fprust_transport::Transport;
use fprust_types::{IndexTable, SystemParameters};

use crate::engine::ProtocolEngine;
use crate::error::{Error, Result};
use crate::ops::{self, EnrollConfig, MatchOutcome, SearchOutcome};

/// Releases the session's busy flag when an operation ends
///
/// The flag is the session's only synchronization primitive: acquired or
/// released, never queued.
struct OperationGuard {
    busy: Arc<AtomicBool>,
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

/// Session with one fingerprint module
///
/// Owns the transport exclusively for its whole lifetime; one logical
/// operation owns the session for its whole duration, which may span several
/// packet round trips. The protocol has no request identifiers, so nothing
/// may interleave.
///
/// # Examples
///
/// ```no_run
/// use fprust::{Device, TcpTransport};
///
/// #[tokio::main]
/// async fn main() -> fprust::Result<()> {
///     let transport = TcpTransport::new("192.168.1.50", 4001);
///     let mut device = Device::open(transport, 0xFFFFFFFF);
///
///     device.connect().await?;
///     device.verify_password().await?;
///
///     let count = device.template_count().await?;
///     println!("{} templates stored", count);
///
///     device.close().await?;
///     Ok(())
/// }
/// ```
pub struct Device {
    engine: ProtocolEngine,
    password: u32,
    timeout: Duration,
    chunk_size: usize,
    capacity: Option<u16>,
    busy: Arc<AtomicBool>,
    closed: bool,
}

impl Device {
    /// Create a session over a transport
    ///
    /// Stores the transport and address only. No handshake is performed:
    /// modules without a password answer any command straight away, so the
    /// first exchange is an explicit [`Device::handshake`] or
    /// [`Device::verify_password`] call.
    pub fn open(transport: impl Transport + 'static, address: u32) -> Self {
        Self {
            engine: ProtocolEngine::new(Box::new(transport), address),
            password: DEFAULT_PASSWORD,
            timeout: DEFAULT_TIMEOUT,
            chunk_size: PacketLength::Bytes128.bytes(),
            capacity: None,
            busy: Arc::new(AtomicBool::new(false)),
            closed: false,
        }
    }

    /// Set the module password used by [`Device::verify_password`]
    pub fn with_password(mut self, password: u32) -> Self {
        self.password = password;
        self
    }

    /// Set the per-command response timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Session address stamped on every packet
    pub fn address(&self) -> u32 {
        self.engine.address()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Open the underlying transport
    pub async fn connect(&mut self) -> Result<()> {
        self.ensure_open()?;

        info!("Connecting to {}...", self.engine.transport().endpoint());
        self.engine.transport_mut().connect().await?;

        Ok(())
    }

    /// Release the transport and close the session
    ///
    /// Every later operation fails with [`Error::SessionClosed`]; a session
    /// is never implicitly reopened.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }

        let _op = self.begin_operation()?;

        info!("Closing session to {}", self.engine.transport().endpoint());
        self.engine.transport_mut().disconnect().await?;
        self.closed = true;

        Ok(())
    }

    // --- single-command operations ---

    /// Check that the module answers on this address
    pub async fn handshake(&mut self) -> Result<()> {
        let _op = self.begin_operation()?;
        self.run(Command::handshake()).await?;
        Ok(())
    }

    /// Verify the session password with the module
    ///
    /// Required instead of [`Device::handshake`] when the module has a
    /// password set.
    pub async fn verify_password(&mut self) -> Result<()> {
        let _op = self.begin_operation()?;
        let password = self.password;
        self.run(Command::verify_password(password)).await?;
        Ok(())
    }

    /// Write a new module password and use it from now on
    pub async fn set_password(&mut self, password: u32) -> Result<()> {
        let _op = self.begin_operation()?;
        self.run(Command::set_password(password)).await?;
        self.password = password;
        Ok(())
    }

    /// Re-address the module; the session follows the new address
    pub async fn set_address(&mut self, address: u32) -> Result<()> {
        let _op = self.begin_operation()?;
        self.run(Command::set_address(address)).await?;
        self.engine.set_address(address);
        info!(address = format!("0x{:08X}", address), "Module re-addressed");
        Ok(())
    }

    /// Set the module baud rate
    ///
    /// Takes effect on the module immediately; the caller must reconfigure
    /// the physical link (the serial bridge) to match before the next
    /// command.
    pub async fn set_baud_rate(&mut self, baud_rate: BaudRate) -> Result<()> {
        let _op = self.begin_operation()?;
        self.run(Command::set_parameter(ParameterId::BaudRate, baud_rate as u8))
            .await?;
        warn!(bps = baud_rate.bps(), "Module baud rate changed; adjust the link");
        Ok(())
    }

    /// Set the matching security level
    pub async fn set_security_level(&mut self, level: SecurityLevel) -> Result<()> {
        let _op = self.begin_operation()?;
        self.run(Command::set_parameter(ParameterId::SecurityLevel, level as u8))
            .await?;
        Ok(())
    }

    /// Set the data packet length; later transfers use the new chunk size
    pub async fn set_packet_length(&mut self, length: PacketLength) -> Result<()> {
        let _op = self.begin_operation()?;
        self.run(Command::set_parameter(ParameterId::PacketLength, length as u8))
            .await?;
        self.chunk_size = length.bytes();
        Ok(())
    }

    /// Read the module's system parameter block
    pub async fn read_parameters(&mut self) -> Result<SystemParameters> {
        let _op = self.begin_operation()?;
        self.read_parameters_unguarded().await
    }

    /// Number of templates stored in the library
    pub async fn template_count(&mut self) -> Result<u16> {
        let _op = self.begin_operation()?;
        let confirmation = self.run(Command::template_count()).await?;
        be_u16(&confirmation.data, "template count")
    }

    /// Capture a fingerprint image into the image buffer
    pub async fn capture_image(&mut self) -> Result<()> {
        let _op = self.begin_operation()?;
        self.capture_image_unguarded().await
    }

    /// Capture without driving the backlight
    pub async fn capture_image_free(&mut self) -> Result<()> {
        let _op = self.begin_operation()?;
        self.run(Command::capture_image_free()).await?;
        Ok(())
    }

    /// Extract features from the image buffer into a feature buffer
    pub async fn extract_features(&mut self, buffer: BufferId) -> Result<()> {
        let _op = self.begin_operation()?;
        self.extract_features_unguarded(buffer).await
    }

    /// Merge the feature buffers into one model (stored back in both)
    pub async fn create_model(&mut self) -> Result<()> {
        let _op = self.begin_operation()?;
        self.create_model_unguarded().await
    }

    /// Write the model in a feature buffer to a library slot
    pub async fn store_model(&mut self, buffer: BufferId, slot: u16) -> Result<()> {
        let _op = self.begin_operation()?;
        self.store_model_unguarded(buffer, slot).await
    }

    /// Load a stored template into a feature buffer
    pub async fn load_model(&mut self, buffer: BufferId, slot: u16) -> Result<()> {
        let _op = self.begin_operation()?;
        self.load_model_unguarded(buffer, slot).await
    }

    /// Delete `count` templates starting at `start`
    pub async fn delete_models(&mut self, start: u16, count: u16) -> Result<()> {
        if count == 0 {
            return Err(Error::InvalidArgument("delete count must be non-zero".into()));
        }

        let _op = self.begin_operation()?;
        self.run(Command::delete_models(start, count)).await?;
        info!(start, count, "Templates deleted");
        Ok(())
    }

    /// Wipe the entire template library
    pub async fn empty_database(&mut self) -> Result<()> {
        let _op = self.begin_operation()?;
        self.run(Command::empty_database()).await?;
        warn!("Template library emptied");
        Ok(())
    }

    /// Compare the two feature buffers
    pub async fn match_buffers(&mut self) -> Result<MatchOutcome> {
        let _op = self.begin_operation()?;
        self.match_buffers_unguarded().await
    }

    /// Search a slot range for the features in `buffer`
    pub async fn search(&mut self, buffer: BufferId, start: u16, count: u16) -> Result<SearchOutcome> {
        let _op = self.begin_operation()?;
        self.search_unguarded(buffer, start, count).await
    }

    /// Search a slot range using the module's fast search
    pub async fn fast_search(&mut self, buffer: BufferId, start: u16, count: u16) -> Result<SearchOutcome> {
        let _op = self.begin_operation()?;
        match self.run(Command::fast_search(buffer, start, count)).await {
            Ok(confirmation) => parse_search_match(&confirmation.data),
            Err(Error::Rejected(ConfirmationCode::NotFound)) => Ok(SearchOutcome::NotFound),
            Err(e) => Err(e),
        }
    }

    /// Random 32-bit number from the module's generator
    pub async fn random_number(&mut self) -> Result<u32> {
        let _op = self.begin_operation()?;
        let confirmation = self.run(Command::random_number()).await?;
        be_u32(&confirmation.data, "random number")
    }

    /// Switch the sensor backlight
    pub async fn backlight(&mut self, on: bool) -> Result<()> {
        let _op = self.begin_operation()?;
        self.run(Command::backlight(on)).await?;
        Ok(())
    }

    /// Read one 32-byte notepad page
    pub async fn read_notepad(&mut self, page: u8) -> Result<Bytes> {
        check_notepad_page(page)?;

        let _op = self.begin_operation()?;
        let confirmation = self.run(Command::read_notepad(page)).await?;

        if confirmation.data.len() < NOTEPAD_PAGE_SIZE {
            return Err(fprust_types::Error::Parse(format!(
                "notepad page holds {} bytes, expected {}",
                confirmation.data.len(),
                NOTEPAD_PAGE_SIZE
            ))
            .into());
        }

        Ok(confirmation.data.slice(..NOTEPAD_PAGE_SIZE))
    }

    /// Write up to 32 bytes to a notepad page (zero-padded)
    pub async fn write_notepad(&mut self, page: u8, data: &[u8]) -> Result<()> {
        check_notepad_page(page)?;
        if data.len() > NOTEPAD_PAGE_SIZE {
            return Err(Error::InvalidArgument(format!(
                "notepad data is {} bytes, page holds {}",
                data.len(),
                NOTEPAD_PAGE_SIZE
            )));
        }

        let mut padded = data.to_vec();
        padded.resize(NOTEPAD_PAGE_SIZE, 0x00);

        let _op = self.begin_operation()?;
        self.run(Command::write_notepad(page, &padded)).await?;
        Ok(())
    }

    /// Occupancy bitmap of the template library
    pub async fn read_index_table(&mut self) -> Result<IndexTable> {
        let _op = self.begin_operation()?;

        let capacity = self.capacity_unguarded().await?;
        let pages = (usize::from(capacity)).div_ceil(IndexTable::SLOTS_PER_PAGE);

        let mut bitmaps = Vec::with_capacity(pages);
        for page in 0..pages {
            let confirmation = self.run(Command::read_index_table(page as u8)).await?;
            bitmaps.push(confirmation.data);
        }

        Ok(IndexTable::from_pages(bitmaps, usize::from(capacity)))
    }

    /// Transfer the image buffer to the host
    ///
    /// Returns the raw 4-bit-per-pixel stream; rendering it is up to the
    /// caller.
    pub async fn read_image(&mut self) -> Result<Bytes> {
        let _op = self.begin_operation()?;

        let timeout = self.timeout;
        self.run(Command::upload_image()).await?;
        let image = self.engine.read_data(timeout).await?;

        debug!(len = image.len(), "Image received");
        Ok(image)
    }

    /// Transfer a feature buffer to the host
    pub async fn read_features(&mut self, buffer: BufferId) -> Result<Bytes> {
        let _op = self.begin_operation()?;
        self.read_features_unguarded(buffer).await
    }

    /// Push feature data into a module buffer, then read it back to verify
    pub async fn write_features(&mut self, buffer: BufferId, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Err(Error::InvalidArgument("feature data is empty".into()));
        }

        let _op = self.begin_operation()?;

        let timeout = self.timeout;
        let chunk = self.chunk_size;
        self.run(Command::download_features(buffer)).await?;
        self.engine.send_data(data, chunk).await?;

        // The transfer has no acknowledge of its own; verify by read-back
        let echoed = self.read_features_unguarded(buffer).await?;
        if echoed.as_ref() != data {
            return Err(fprust_types::Error::Validation(
                "feature buffer read-back does not match uploaded data".into(),
            )
            .into());
        }

        Ok(())
    }

    // --- multi-step operations ---

    /// Enroll a finger into a library slot
    ///
    /// Captures the configured number of images of the same finger (waiting
    /// for a finger within the configured retry bound), extracts each into a
    /// feature buffer, merges the buffers into a model and stores it.
    pub async fn enroll(&mut self, config: &EnrollConfig) -> Result<u16> {
        let _op = self.begin_operation()?;
        ops::enroll(self, config).await
    }

    /// Capture a finger and search the whole library for it
    pub async fn search_finger(&mut self) -> Result<SearchOutcome> {
        let _op = self.begin_operation()?;
        let capacity = self.capacity_unguarded().await?;
        ops::search_finger(self, 0, capacity).await
    }

    /// Capture a finger and search a slot range for it
    pub async fn search_finger_in(&mut self, start: u16, count: u16) -> Result<SearchOutcome> {
        let _op = self.begin_operation()?;
        ops::search_finger(self, start, count).await
    }

    /// Capture a finger and compare it against one stored slot
    pub async fn verify_finger(&mut self, slot: u16) -> Result<MatchOutcome> {
        let _op = self.begin_operation()?;
        ops::verify_finger(self, slot).await
    }

    // --- internals ---

    /// Acquire the session for one operation
    ///
    /// Fails with [`Error::SessionClosed`] after `close`, and with
    /// [`Error::SessionBusy`] while another operation holds the session —
    /// without writing a byte to the shared transport.
    fn begin_operation(&self) -> Result<OperationGuard> {
        self.ensure_open()?;

        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::SessionBusy);
        }

        Ok(OperationGuard {
            busy: Arc::clone(&self.busy),
        })
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::SessionClosed);
        }
        Ok(())
    }

    /// Execute one command and map its confirmation
    ///
    /// Success passes the confirmation through; a known failure code becomes
    /// [`Error::Rejected`], an unlisted code [`Error::UnknownConfirmation`].
    /// The session stays usable after either.
    pub(crate) async fn run(&mut self, command: Command) -> Result<Confirmation> {
        self.ensure_open()?;

        let confirmation = self.engine.execute(&command, self.timeout).await?;

        match confirmation.code {
            code if code.is_success() => Ok(confirmation),
            ConfirmationCode::Unknown(code) => Err(Error::UnknownConfirmation(code)),
            code => Err(Error::Rejected(code)),
        }
    }

    pub(crate) async fn capture_image_unguarded(&mut self) -> Result<()> {
        self.run(Command::capture_image()).await?;
        Ok(())
    }

    pub(crate) async fn extract_features_unguarded(&mut self, buffer: BufferId) -> Result<()> {
        self.run(Command::extract_features(buffer)).await?;
        Ok(())
    }

    pub(crate) async fn create_model_unguarded(&mut self) -> Result<()> {
        self.run(Command::create_model()).await?;
        Ok(())
    }

    pub(crate) async fn store_model_unguarded(&mut self, buffer: BufferId, slot: u16) -> Result<()> {
        self.run(Command::store_model(buffer, slot)).await?;
        Ok(())
    }

    pub(crate) async fn load_model_unguarded(&mut self, buffer: BufferId, slot: u16) -> Result<()> {
        self.run(Command::load_model(buffer, slot)).await?;
        Ok(())
    }

    pub(crate) async fn search_unguarded(
        &mut self,
        buffer: BufferId,
        start: u16,
        count: u16,
    ) -> Result<SearchOutcome> {
        match self.run(Command::search(buffer, start, count)).await {
            Ok(confirmation) => parse_search_match(&confirmation.data),
            // Not-found is an outcome, not a session failure
            Err(Error::Rejected(ConfirmationCode::NotFound)) => Ok(SearchOutcome::NotFound),
            Err(e) => Err(e),
        }
    }

    pub(crate) async fn match_buffers_unguarded(&mut self) -> Result<MatchOutcome> {
        match self.run(Command::match_buffers()).await {
            Ok(confirmation) => {
                let score = be_u16(&confirmation.data, "match score")?;
                Ok(MatchOutcome::Match { score })
            }
            Err(Error::Rejected(ConfirmationCode::NoMatch)) => Ok(MatchOutcome::Mismatch),
            Err(e) => Err(e),
        }
    }

    async fn read_features_unguarded(&mut self, buffer: BufferId) -> Result<Bytes> {
        let timeout = self.timeout;
        self.run(Command::upload_features(buffer)).await?;
        let features = self.engine.read_data(timeout).await?;

        debug!(len = features.len(), "Features received");
        Ok(features)
    }

    async fn read_parameters_unguarded(&mut self) -> Result<SystemParameters> {
        let confirmation = self.run(Command::read_parameters()).await?;
        let params = SystemParameters::parse(&confirmation.data)?;

        self.capacity = Some(params.capacity);
        self.chunk_size = params.packet_length.bytes();

        debug!(params = %params, "System parameters read");
        Ok(params)
    }

    /// Library capacity, read from the module once and cached
    async fn capacity_unguarded(&mut self) -> Result<u16> {
        match self.capacity {
            Some(capacity) => Ok(capacity),
            None => Ok(self.read_parameters_unguarded().await?.capacity),
        }
    }
}

fn check_notepad_page(page: u8) -> Result<()> {
    if page >= NOTEPAD_PAGES {
        return Err(Error::InvalidArgument(format!(
            "notepad page {} out of range (0..{})",
            page, NOTEPAD_PAGES
        )));
    }
    Ok(())
}

fn parse_search_match(data: &[u8]) -> Result<SearchOutcome> {
    if data.len() < 4 {
        return Err(fprust_types::Error::Parse(
            "search response shorter than slot + score".into(),
        )
        .into());
    }
    Ok(SearchOutcome::Match {
        slot: u16::from_be_bytes([data[0], data[1]]),
        score: u16::from_be_bytes([data[2], data[3]]),
    })
}

fn be_u16(data: &[u8], what: &str) -> Result<u16> {
    if data.len() < 2 {
        return Err(fprust_types::Error::Parse(format!("{} missing from response", what)).into());
    }
    Ok(u16::from_be_bytes([data[0], data[1]]))
}

fn be_u32(data: &[u8], what: &str) -> Result<u32> {
    if data.len() < 4 {
        return Err(fprust_types::Error::Parse(format!("{} missing from response", what)).into());
    }
    Ok(u32::from_be_bytes([data[0], data[1], data[2], data[3]]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use fprust_core::{Packet, PacketId};
    use fprust_transport::{LoopbackHandle, LoopbackTransport};
    use pretty_assertions::assert_eq;

    const ADDRESS: u32 = 0xFFFFFFFF;

    async fn device() -> (Device, LoopbackHandle) {
        let (mut transport, handle) = LoopbackTransport::new();
        transport.connect().await.unwrap();
        (Device::open(transport, ADDRESS), handle)
    }

    fn ack(code: u8, data: &[u8]) -> Vec<u8> {
        let mut payload = vec![code];
        payload.extend_from_slice(data);
        Packet::with_payload(ADDRESS, PacketId::Acknowledge, payload)
            .encode()
            .to_vec()
    }

    fn parameter_block(capacity: u16) -> Vec<u8> {
        let mut block = vec![
            0x00, 0x00, // status
            0x00, 0x09, // system id
        ];
        block.extend_from_slice(&capacity.to_be_bytes());
        block.extend_from_slice(&[
            0x00, 0x03, // security level 3
            0xFF, 0xFF, 0xFF, 0xFF, // address
            0x00, 0x02, // packet length code 2 (128 bytes)
            0x00, 0x06, // baud multiplier 6
        ]);
        block
    }

    fn sent_instructions(written: &[u8]) -> Vec<u8> {
        let mut rest = written;
        let mut instructions = Vec::new();
        while !rest.is_empty() {
            let (packet, consumed) = Packet::decode_partial(rest).unwrap().unwrap();
            if packet.id == PacketId::Command {
                instructions.push(packet.payload[0]);
            }
            rest = &rest[consumed..];
        }
        instructions
    }

    #[tokio::test]
    async fn test_handshake() {
        let (mut device, handle) = device().await;
        handle.push(ack(0x00, &[])).await;

        device.handshake().await.unwrap();

        assert_eq!(sent_instructions(&handle.written().await), vec![0x53]);
    }

    #[tokio::test]
    async fn test_verify_password_rejected() {
        let (mut transport, handle) = LoopbackTransport::new();
        transport.connect().await.unwrap();
        let mut device = Device::open(transport, ADDRESS).with_password(0x1234);
        handle.push(ack(0x13, &[])).await;

        let result = device.verify_password().await;

        assert!(matches!(
            result,
            Err(Error::Rejected(ConfirmationCode::WrongPassword))
        ));

        // The password went out on the wire big-endian
        let written = handle.written().await;
        let (sent, _) = Packet::decode_partial(&written).unwrap().unwrap();
        assert_eq!(sent.payload.as_ref(), &[0x13, 0x00, 0x00, 0x12, 0x34]);
    }

    #[tokio::test]
    async fn test_unknown_confirmation_is_not_fatal() {
        let (mut device, handle) = device().await;
        handle.push(ack(0xC3, &[])).await;

        let err = device.handshake().await.unwrap_err();
        assert!(matches!(err, Error::UnknownConfirmation(0xC3)));
        assert!(err.is_recoverable());

        // Session still usable
        handle.push(ack(0x00, &[])).await;
        device.handshake().await.unwrap();
    }

    #[tokio::test]
    async fn test_template_count() {
        let (mut device, handle) = device().await;
        handle.push(ack(0x00, &[0x00, 0x2A])).await;

        assert_eq!(device.template_count().await.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_search_not_found_keeps_session_usable() {
        let (mut device, handle) = device().await;
        handle.push(ack(0x09, &[])).await;

        let outcome = device.search(BufferId::Buffer1, 0, 200).await.unwrap();
        assert_eq!(outcome, SearchOutcome::NotFound);

        handle.push(ack(0x00, &[])).await;
        device.handshake().await.unwrap();
    }

    #[tokio::test]
    async fn test_search_match() {
        let (mut device, handle) = device().await;
        handle.push(ack(0x00, &[0x00, 0x07, 0x00, 0x64])).await;

        let outcome = device.search(BufferId::Buffer1, 0, 200).await.unwrap();
        assert_eq!(outcome, SearchOutcome::Match { slot: 7, score: 100 });
    }

    #[tokio::test]
    async fn test_fast_search() {
        let (mut device, handle) = device().await;
        handle.push(ack(0x00, &[0x00, 0x03, 0x00, 0x50])).await;

        let outcome = device.fast_search(BufferId::Buffer1, 0, 200).await.unwrap();
        assert_eq!(outcome, SearchOutcome::Match { slot: 3, score: 80 });

        assert_eq!(sent_instructions(&handle.written().await), vec![0x1B]);
    }

    #[tokio::test]
    async fn test_match_buffers_outcomes() {
        let (mut device, handle) = device().await;

        handle.push(ack(0x00, &[0x00, 0x40])).await;
        let outcome = device.match_buffers().await.unwrap();
        assert_eq!(outcome, MatchOutcome::Match { score: 64 });

        handle.push(ack(0x08, &[])).await;
        let outcome = device.match_buffers().await.unwrap();
        assert_eq!(outcome, MatchOutcome::Mismatch);
    }

    #[tokio::test]
    async fn test_set_address_readdresses_session() {
        let (mut device, handle) = device().await;
        handle.push(ack(0x00, &[])).await;

        device.set_address(0x00000001).await.unwrap();
        assert_eq!(device.address(), 0x00000001);
        handle.take_written().await;

        // The next command is framed with, and answered on, the new address
        handle
            .push(
                Packet::with_payload(0x00000001, PacketId::Acknowledge, vec![0x00])
                    .encode()
                    .to_vec(),
            )
            .await;
        device.handshake().await.unwrap();

        let written = handle.written().await;
        let (sent, _) = Packet::decode_partial(&written).unwrap().unwrap();
        assert_eq!(sent.address, 0x00000001);
    }

    #[tokio::test]
    async fn test_read_parameters_caches_capacity_and_chunk() {
        let (mut device, handle) = device().await;
        handle.push(ack(0x00, &parameter_block(200))).await;

        let params = device.read_parameters().await.unwrap();
        assert_eq!(params.capacity, 200);
        assert_eq!(device.capacity, Some(200));
        assert_eq!(device.chunk_size, 128);
    }

    #[tokio::test]
    async fn test_read_index_table() {
        let (mut device, handle) = device().await;

        // Capacity is unknown: the device reads parameters first
        handle.push(ack(0x00, &parameter_block(200))).await;
        let mut bitmap = vec![0x00u8; 32];
        bitmap[0] = 0x05; // slots 0 and 2
        handle.push(ack(0x00, &bitmap)).await;

        let table = device.read_index_table().await.unwrap();
        assert_eq!(table.len(), 200);
        assert_eq!(table.occupied_slots(), vec![0, 2]);

        assert_eq!(sent_instructions(&handle.written().await), vec![0x0F, 0x1F]);
    }

    #[tokio::test]
    async fn test_read_image_collects_data_phase() {
        let (mut device, handle) = device().await;

        handle.push(ack(0x00, &[])).await;
        handle
            .push(Packet::with_payload(ADDRESS, PacketId::Data, vec![1, 2, 3]).encode().to_vec())
            .await;
        handle
            .push(Packet::with_payload(ADDRESS, PacketId::EndOfData, vec![4]).encode().to_vec())
            .await;

        let image = device.read_image().await.unwrap();
        assert_eq!(image.as_ref(), &[1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_session_busy_writes_nothing() {
        let (mut device, handle) = device().await;

        let guard = device.begin_operation().unwrap();
        let result = device.handshake().await;

        assert!(matches!(result, Err(Error::SessionBusy)));
        assert!(handle.written().await.is_empty());

        // Released flag frees the session
        drop(guard);
        handle.push(ack(0x00, &[])).await;
        device.handshake().await.unwrap();
    }

    #[tokio::test]
    async fn test_close_then_command_fails() {
        let (mut device, handle) = device().await;

        device.close().await.unwrap();
        assert!(device.is_closed());

        let err = device.handshake().await.unwrap_err();
        assert!(matches!(err, Error::SessionClosed));
        assert!(err.requires_reconnect());
        assert!(handle.written().await.is_empty());

        // Close is idempotent
        device.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_models_validates_count() {
        let (mut device, handle) = device().await;

        let result = device.delete_models(0, 0).await;
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
        assert!(handle.written().await.is_empty());
    }

    #[tokio::test]
    async fn test_notepad_page_validation() {
        let (mut device, handle) = device().await;

        assert!(matches!(
            device.read_notepad(16).await,
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            device.write_notepad(3, &[0u8; 33]).await,
            Err(Error::InvalidArgument(_))
        ));
        assert!(handle.written().await.is_empty());
    }

    #[tokio::test]
    async fn test_write_notepad_pads_page() {
        let (mut device, handle) = device().await;
        handle.push(ack(0x00, &[])).await;

        device.write_notepad(3, b"hello").await.unwrap();

        let written = handle.written().await;
        let (sent, _) = Packet::decode_partial(&written).unwrap().unwrap();
        // instruction + page + 32 padded bytes
        assert_eq!(sent.payload.len(), 34);
        assert_eq!(&sent.payload[..7], &[0x18, 0x03, b'h', b'e', b'l', b'l', b'o']);
        assert_eq!(sent.payload[7..], [0u8; 27]);
    }

    #[tokio::test]
    async fn test_write_features_verifies_readback() {
        let (mut device, handle) = device().await;
        let features = vec![0xABu8; 300];

        // DownChar accepted, then UpChar accepted and echoed back
        handle.push(ack(0x00, &[])).await;
        handle.push(ack(0x00, &[])).await;
        handle
            .push(
                Packet::with_payload(ADDRESS, PacketId::EndOfData, features.clone())
                    .encode()
                    .to_vec(),
            )
            .await;

        device
            .write_features(BufferId::Buffer1, &features)
            .await
            .unwrap();

        // 300 bytes at the default 128-byte chunk: two Data + one EndOfData
        let written = handle.written().await;
        let mut rest = &written[..];
        let mut frames = Vec::new();
        while !rest.is_empty() {
            let (packet, consumed) = Packet::decode_partial(rest).unwrap().unwrap();
            frames.push(packet);
            rest = &rest[consumed..];
        }
        let data_frames: Vec<_> = frames
            .iter()
            .filter(|p| matches!(p.id, PacketId::Data | PacketId::EndOfData))
            .collect();
        assert_eq!(data_frames.len(), 3);
        assert_eq!(data_frames[0].payload.len(), 128);
        assert_eq!(data_frames[2].id, PacketId::EndOfData);
    }

    #[tokio::test]
    async fn test_write_features_rejects_mismatched_readback() {
        let (mut device, handle) = device().await;

        handle.push(ack(0x00, &[])).await;
        handle.push(ack(0x00, &[])).await;
        handle
            .push(
                Packet::with_payload(ADDRESS, PacketId::EndOfData, vec![0x00, 0x01])
                    .encode()
                    .to_vec(),
            )
            .await;

        let result = device.write_features(BufferId::Buffer1, &[0x00, 0x02]).await;
        assert!(matches!(result, Err(Error::Types(_))));
    }
}
