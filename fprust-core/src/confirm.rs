//! Confirmation codes returned by the module
//!
//! The table is a fixed mapping from the acknowledge status byte to an
//! outcome kind. Codes outside the table map to [`ConfirmationCode::Unknown`]
//! instead of failing, so newer firmware revisions degrade gracefully.

use bytes::Bytes;
use std::fmt;

use crate::error::{Error, Result};

/// Status byte of an acknowledge packet
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ConfirmationCode {
    /// Command executed
    Ok,

    /// Handshake acknowledged (reported by some firmware instead of `Ok`)
    HandshakeOk,

    /// Error receiving the command packet
    PacketReceiveError,

    /// No finger on the sensor window
    NoFinger,

    /// Failed to enroll the finger
    EnrollFailed,

    /// Image too disordered to extract features
    ImageTooMessy,

    /// Too few feature points in the image
    TooFewFeatures,

    /// Buffers do not contain the same finger
    NoMatch,

    /// No matching template in the searched range
    NotFound,

    /// Feature buffers could not be combined into one model
    CombineMismatch,

    /// Slot index beyond the template library
    BadSlot,

    /// Failed to read a template from the library
    TemplateReadError,

    /// Failed to upload features to the host
    UploadFeatureFail,

    /// Module cannot receive follow-up data packets
    PacketResponseFail,

    /// Failed to upload the image to the host
    UploadImageFail,

    /// Failed to delete templates
    DeleteFail,

    /// Failed to clear the template library
    ClearFail,

    /// Password does not match
    WrongPassword,

    /// No valid primary image in the buffer
    MissingValidImage,

    /// Flash write failed
    FlashError,

    /// Undefined firmware error
    UndefinedError,

    /// Invalid register number
    InvalidRegister,

    /// Invalid configuration value
    InvalidConfig,

    /// Notepad page number out of range
    BadNotepadPage,

    /// Communication port failure
    CommPortFailure,

    /// Address mismatch reported by the module
    AddressError,

    /// Password must be verified first
    PasswordRequired,

    /// Code not in the table; kept verbatim for forward compatibility
    Unknown(u8),
}

impl ConfirmationCode {
    /// True for codes that acknowledge successful execution
    pub fn is_success(self) -> bool {
        matches!(self, Self::Ok | Self::HandshakeOk)
    }

    /// Raw status byte
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Ok => 0x00,
            Self::PacketReceiveError => 0x01,
            Self::NoFinger => 0x02,
            Self::EnrollFailed => 0x03,
            Self::ImageTooMessy => 0x06,
            Self::TooFewFeatures => 0x07,
            Self::NoMatch => 0x08,
            Self::NotFound => 0x09,
            Self::CombineMismatch => 0x0A,
            Self::BadSlot => 0x0B,
            Self::TemplateReadError => 0x0C,
            Self::UploadFeatureFail => 0x0D,
            Self::PacketResponseFail => 0x0E,
            Self::UploadImageFail => 0x0F,
            Self::DeleteFail => 0x10,
            Self::ClearFail => 0x11,
            Self::WrongPassword => 0x13,
            Self::MissingValidImage => 0x15,
            Self::FlashError => 0x18,
            Self::UndefinedError => 0x19,
            Self::InvalidRegister => 0x1A,
            Self::InvalidConfig => 0x1B,
            Self::BadNotepadPage => 0x1C,
            Self::CommPortFailure => 0x1D,
            Self::AddressError => 0x20,
            Self::PasswordRequired => 0x21,
            Self::HandshakeOk => 0x55,
            Self::Unknown(code) => code,
        }
    }

    /// Short name for logs
    pub fn name(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::HandshakeOk => "HANDSHAKE_OK",
            Self::PacketReceiveError => "PACKET_RECEIVE_ERROR",
            Self::NoFinger => "NO_FINGER",
            Self::EnrollFailed => "ENROLL_FAILED",
            Self::ImageTooMessy => "IMAGE_TOO_MESSY",
            Self::TooFewFeatures => "TOO_FEW_FEATURES",
            Self::NoMatch => "NO_MATCH",
            Self::NotFound => "NOT_FOUND",
            Self::CombineMismatch => "COMBINE_MISMATCH",
            Self::BadSlot => "BAD_SLOT",
            Self::TemplateReadError => "TEMPLATE_READ_ERROR",
            Self::UploadFeatureFail => "UPLOAD_FEATURE_FAIL",
            Self::PacketResponseFail => "PACKET_RESPONSE_FAIL",
            Self::UploadImageFail => "UPLOAD_IMAGE_FAIL",
            Self::DeleteFail => "DELETE_FAIL",
            Self::ClearFail => "CLEAR_FAIL",
            Self::WrongPassword => "WRONG_PASSWORD",
            Self::MissingValidImage => "MISSING_VALID_IMAGE",
            Self::FlashError => "FLASH_ERROR",
            Self::UndefinedError => "UNDEFINED_ERROR",
            Self::InvalidRegister => "INVALID_REGISTER",
            Self::InvalidConfig => "INVALID_CONFIG",
            Self::BadNotepadPage => "BAD_NOTEPAD_PAGE",
            Self::CommPortFailure => "COMM_PORT_FAILURE",
            Self::AddressError => "ADDRESS_ERROR",
            Self::PasswordRequired => "PASSWORD_REQUIRED",
            Self::Unknown(_) => "UNKNOWN",
        }
    }
}

impl From<u8> for ConfirmationCode {
    fn from(value: u8) -> Self {
        match value {
            0x00 => Self::Ok,
            0x01 => Self::PacketReceiveError,
            0x02 => Self::NoFinger,
            0x03 => Self::EnrollFailed,
            0x06 => Self::ImageTooMessy,
            0x07 => Self::TooFewFeatures,
            0x08 => Self::NoMatch,
            0x09 => Self::NotFound,
            0x0A => Self::CombineMismatch,
            0x0B => Self::BadSlot,
            0x0C => Self::TemplateReadError,
            0x0D => Self::UploadFeatureFail,
            0x0E => Self::PacketResponseFail,
            0x0F => Self::UploadImageFail,
            0x10 => Self::DeleteFail,
            0x11 => Self::ClearFail,
            0x13 => Self::WrongPassword,
            0x15 => Self::MissingValidImage,
            0x18 => Self::FlashError,
            0x19 => Self::UndefinedError,
            0x1A => Self::InvalidRegister,
            0x1B => Self::InvalidConfig,
            0x1C => Self::BadNotepadPage,
            0x1D => Self::CommPortFailure,
            0x20 => Self::AddressError,
            0x21 => Self::PasswordRequired,
            0x55 => Self::HandshakeOk,
            code => Self::Unknown(code),
        }
    }
}

impl From<ConfirmationCode> for u8 {
    fn from(code: ConfirmationCode) -> u8 {
        code.as_u8()
    }
}

impl fmt::Display for ConfirmationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(0x{:02X})", self.name(), self.as_u8())
    }
}

/// Parsed acknowledge payload: status byte plus optional result data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Confirmation {
    pub code: ConfirmationCode,
    pub data: Bytes,
}

impl Confirmation {
    /// Parse an acknowledge-packet payload
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyAcknowledge`] when the payload carries no
    /// status byte.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let (&code, data) = payload.split_first().ok_or(Error::EmptyAcknowledge)?;
        Ok(Self {
            code: ConfirmationCode::from(code),
            data: Bytes::copy_from_slice(data),
        })
    }

    pub fn is_success(&self) -> bool {
        self.code.is_success()
    }
}

impl fmt::Display for Confirmation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Confirmation[{}](data={})", self.code, self.data.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_code_roundtrip() {
        for byte in 0u8..=255 {
            let code = ConfirmationCode::from(byte);
            assert_eq!(code.as_u8(), byte);
        }
    }

    #[test]
    fn test_known_codes() {
        assert_eq!(ConfirmationCode::from(0x00), ConfirmationCode::Ok);
        assert_eq!(ConfirmationCode::from(0x02), ConfirmationCode::NoFinger);
        assert_eq!(ConfirmationCode::from(0x09), ConfirmationCode::NotFound);
        assert_eq!(ConfirmationCode::from(0x55), ConfirmationCode::HandshakeOk);
    }

    #[test]
    fn test_unlisted_code_is_unknown_not_error() {
        let code = ConfirmationCode::from(0xC3);
        assert_eq!(code, ConfirmationCode::Unknown(0xC3));
        assert!(!code.is_success());
    }

    #[test]
    fn test_success_codes() {
        assert!(ConfirmationCode::Ok.is_success());
        assert!(ConfirmationCode::HandshakeOk.is_success());
        assert!(!ConfirmationCode::NoFinger.is_success());
    }

    #[test]
    fn test_parse_with_data() {
        let confirmation = Confirmation::parse(&[0x00, 0x00, 0x12, 0x00, 0x64]).unwrap();
        assert_eq!(confirmation.code, ConfirmationCode::Ok);
        assert_eq!(confirmation.data.as_ref(), &[0x00, 0x12, 0x00, 0x64]);
        assert!(confirmation.is_success());
    }

    #[test]
    fn test_parse_empty_payload() {
        assert!(matches!(
            Confirmation::parse(&[]),
            Err(Error::EmptyAcknowledge)
        ));
    }
}
