//! Instruction codes and command construction
//!
//! Naming follows the host's point of view: `UploadFeatures` moves a feature
//! buffer from the module up to the host, `DownloadFeatures` pushes host data
//! down into the module (the datasheet mnemonics `UpChar`/`DownChar` are kept
//! in [`Instruction::name`]).

use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

use crate::{
    constants::{BufferId, ParameterId},
    error::{Error, Result},
};

/// Protocol instruction codes
///
/// All instructions from the ZFM-x / R30x command table.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Instruction {
    // Image acquisition
    CaptureImage = 0x01,
    ExtractFeatures = 0x02,

    // Matching
    MatchBuffers = 0x03,
    Search = 0x04,
    FastSearch = 0x1B,

    // Template management
    CreateModel = 0x05,
    StoreModel = 0x06,
    LoadModel = 0x07,
    UploadFeatures = 0x08,
    DownloadFeatures = 0x09,
    UploadImage = 0x0A,
    DownloadImage = 0x0B,
    DeleteModels = 0x0C,
    EmptyDatabase = 0x0D,
    TemplateCount = 0x1D,
    ReadIndexTable = 0x1F,

    // System configuration
    SetParameter = 0x0E,
    ReadParameters = 0x0F,
    SetPassword = 0x12,
    VerifyPassword = 0x13,
    SetAddress = 0x15,

    // Extras
    RandomNumber = 0x14,
    WriteNotepad = 0x18,
    ReadNotepad = 0x19,
    BacklightOn = 0x50,
    BacklightOff = 0x51,
    CaptureImageFree = 0x52,
    Handshake = 0x53,
}

impl Instruction {
    /// Datasheet mnemonic
    pub fn name(self) -> &'static str {
        match self {
            Self::CaptureImage => "GenImg",
            Self::ExtractFeatures => "Img2Tz",
            Self::MatchBuffers => "Match",
            Self::Search => "Search",
            Self::FastSearch => "HiSpeedSearch",
            Self::CreateModel => "RegModel",
            Self::StoreModel => "Store",
            Self::LoadModel => "LoadChar",
            Self::UploadFeatures => "UpChar",
            Self::DownloadFeatures => "DownChar",
            Self::UploadImage => "UpImage",
            Self::DownloadImage => "DownImage",
            Self::DeleteModels => "DeletChar",
            Self::EmptyDatabase => "Empty",
            Self::TemplateCount => "TemplateNum",
            Self::ReadIndexTable => "ReadConList",
            Self::SetParameter => "SetSysPara",
            Self::ReadParameters => "ReadSysPara",
            Self::SetPassword => "SetPwd",
            Self::VerifyPassword => "VfyPwd",
            Self::SetAddress => "SetAdder",
            Self::RandomNumber => "GetRandomCode",
            Self::WriteNotepad => "WriteNotepad",
            Self::ReadNotepad => "ReadNotepad",
            Self::BacklightOn => "BacklightOn",
            Self::BacklightOff => "BacklightOff",
            Self::CaptureImageFree => "GenImgFree",
            Self::Handshake => "Handshake",
        }
    }
}

impl From<Instruction> for u8 {
    fn from(instruction: Instruction) -> u8 {
        instruction as u8
    }
}

impl TryFrom<u8> for Instruction {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x01 => Ok(Self::CaptureImage),
            0x02 => Ok(Self::ExtractFeatures),
            0x03 => Ok(Self::MatchBuffers),
            0x04 => Ok(Self::Search),
            0x05 => Ok(Self::CreateModel),
            0x06 => Ok(Self::StoreModel),
            0x07 => Ok(Self::LoadModel),
            0x08 => Ok(Self::UploadFeatures),
            0x09 => Ok(Self::DownloadFeatures),
            0x0A => Ok(Self::UploadImage),
            0x0B => Ok(Self::DownloadImage),
            0x0C => Ok(Self::DeleteModels),
            0x0D => Ok(Self::EmptyDatabase),
            0x0E => Ok(Self::SetParameter),
            0x0F => Ok(Self::ReadParameters),
            0x12 => Ok(Self::SetPassword),
            0x13 => Ok(Self::VerifyPassword),
            0x14 => Ok(Self::RandomNumber),
            0x15 => Ok(Self::SetAddress),
            0x18 => Ok(Self::WriteNotepad),
            0x19 => Ok(Self::ReadNotepad),
            0x1B => Ok(Self::FastSearch),
            0x1D => Ok(Self::TemplateCount),
            0x1F => Ok(Self::ReadIndexTable),
            0x50 => Ok(Self::BacklightOn),
            0x51 => Ok(Self::BacklightOff),
            0x52 => Ok(Self::CaptureImageFree),
            0x53 => Ok(Self::Handshake),
            _ => Err(Error::UnknownInstruction(value)),
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(0x{:02X})", self.name(), *self as u8)
    }
}

/// One command exchange: instruction code plus parameter bytes
///
/// Commands are constructed per call and consumed by the protocol engine;
/// they are never reused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub instruction: Instruction,
    pub params: Bytes,
}

impl Command {
    /// Create a parameterless command
    pub fn new(instruction: Instruction) -> Self {
        Self {
            instruction,
            params: Bytes::new(),
        }
    }

    /// Create a command with raw parameter bytes
    pub fn with_params(instruction: Instruction, params: impl Into<Bytes>) -> Self {
        Self {
            instruction,
            params: params.into(),
        }
    }

    /// Command-packet payload: instruction byte followed by parameters
    pub fn encode_payload(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(1 + self.params.len());
        buf.put_u8(self.instruction.into());
        buf.put_slice(&self.params);
        buf.freeze()
    }

    // Typed constructors, one per operation.

    pub fn capture_image() -> Self {
        Self::new(Instruction::CaptureImage)
    }

    /// Capture without driving the backlight
    pub fn capture_image_free() -> Self {
        Self::new(Instruction::CaptureImageFree)
    }

    pub fn extract_features(buffer: BufferId) -> Self {
        Self::with_params(Instruction::ExtractFeatures, vec![buffer as u8])
    }

    pub fn match_buffers() -> Self {
        Self::new(Instruction::MatchBuffers)
    }

    pub fn search(buffer: BufferId, start: u16, count: u16) -> Self {
        let mut params = BytesMut::with_capacity(5);
        params.put_u8(buffer as u8);
        params.put_u16(start);
        params.put_u16(count);
        Self::with_params(Instruction::Search, params.freeze())
    }

    pub fn fast_search(buffer: BufferId, start: u16, count: u16) -> Self {
        let mut params = BytesMut::with_capacity(5);
        params.put_u8(buffer as u8);
        params.put_u16(start);
        params.put_u16(count);
        Self::with_params(Instruction::FastSearch, params.freeze())
    }

    pub fn create_model() -> Self {
        Self::new(Instruction::CreateModel)
    }

    pub fn store_model(buffer: BufferId, slot: u16) -> Self {
        let mut params = BytesMut::with_capacity(3);
        params.put_u8(buffer as u8);
        params.put_u16(slot);
        Self::with_params(Instruction::StoreModel, params.freeze())
    }

    pub fn load_model(buffer: BufferId, slot: u16) -> Self {
        let mut params = BytesMut::with_capacity(3);
        params.put_u8(buffer as u8);
        params.put_u16(slot);
        Self::with_params(Instruction::LoadModel, params.freeze())
    }

    pub fn upload_features(buffer: BufferId) -> Self {
        Self::with_params(Instruction::UploadFeatures, vec![buffer as u8])
    }

    pub fn download_features(buffer: BufferId) -> Self {
        Self::with_params(Instruction::DownloadFeatures, vec![buffer as u8])
    }

    pub fn upload_image() -> Self {
        Self::new(Instruction::UploadImage)
    }

    pub fn delete_models(start: u16, count: u16) -> Self {
        let mut params = BytesMut::with_capacity(4);
        params.put_u16(start);
        params.put_u16(count);
        Self::with_params(Instruction::DeleteModels, params.freeze())
    }

    pub fn empty_database() -> Self {
        Self::new(Instruction::EmptyDatabase)
    }

    pub fn template_count() -> Self {
        Self::new(Instruction::TemplateCount)
    }

    pub fn read_index_table(page: u8) -> Self {
        Self::with_params(Instruction::ReadIndexTable, vec![page])
    }

    pub fn set_parameter(parameter: ParameterId, value: u8) -> Self {
        Self::with_params(Instruction::SetParameter, vec![parameter as u8, value])
    }

    pub fn read_parameters() -> Self {
        Self::new(Instruction::ReadParameters)
    }

    pub fn set_password(password: u32) -> Self {
        Self::with_params(Instruction::SetPassword, password.to_be_bytes().to_vec())
    }

    pub fn verify_password(password: u32) -> Self {
        Self::with_params(Instruction::VerifyPassword, password.to_be_bytes().to_vec())
    }

    pub fn set_address(address: u32) -> Self {
        Self::with_params(Instruction::SetAddress, address.to_be_bytes().to_vec())
    }

    pub fn random_number() -> Self {
        Self::new(Instruction::RandomNumber)
    }

    pub fn write_notepad(page: u8, data: &[u8]) -> Self {
        let mut params = BytesMut::with_capacity(1 + data.len());
        params.put_u8(page);
        params.put_slice(data);
        Self::with_params(Instruction::WriteNotepad, params.freeze())
    }

    pub fn read_notepad(page: u8) -> Self {
        Self::with_params(Instruction::ReadNotepad, vec![page])
    }

    pub fn backlight(on: bool) -> Self {
        Self::new(if on {
            Instruction::BacklightOn
        } else {
            Instruction::BacklightOff
        })
    }

    pub fn handshake() -> Self {
        Self::new(Instruction::Handshake)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(params={})", self.instruction.name(), self.params.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_instruction_conversion() {
        assert_eq!(u8::from(Instruction::CaptureImage), 0x01);
        assert_eq!(Instruction::try_from(0x01).unwrap(), Instruction::CaptureImage);
        assert_eq!(Instruction::try_from(0x53).unwrap(), Instruction::Handshake);
    }

    #[test]
    fn test_unknown_instruction() {
        assert!(matches!(
            Instruction::try_from(0x42),
            Err(Error::UnknownInstruction(0x42))
        ));
    }

    #[test]
    fn test_capture_payload() {
        let payload = Command::capture_image().encode_payload();
        assert_eq!(payload.as_ref(), &[0x01]);
    }

    #[test]
    fn test_search_payload_big_endian() {
        let payload = Command::search(BufferId::Buffer1, 0x0012, 0x0345).encode_payload();
        assert_eq!(payload.as_ref(), &[0x04, 0x01, 0x00, 0x12, 0x03, 0x45]);
    }

    #[test]
    fn test_store_model_payload() {
        let payload = Command::store_model(BufferId::Buffer2, 7).encode_payload();
        assert_eq!(payload.as_ref(), &[0x06, 0x02, 0x00, 0x07]);
    }

    #[test]
    fn test_verify_password_payload() {
        let payload = Command::verify_password(0x00010203).encode_payload();
        assert_eq!(payload.as_ref(), &[0x13, 0x00, 0x01, 0x02, 0x03]);
    }

    #[test]
    fn test_delete_models_payload() {
        let payload = Command::delete_models(10, 3).encode_payload();
        assert_eq!(payload.as_ref(), &[0x0C, 0x00, 0x0A, 0x00, 0x03]);
    }

    #[test]
    fn test_backlight_selects_instruction() {
        assert_eq!(Command::backlight(true).instruction, Instruction::BacklightOn);
        assert_eq!(Command::backlight(false).instruction, Instruction::BacklightOff);
    }
}
