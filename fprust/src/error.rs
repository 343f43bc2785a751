//! High-level error types

use std::time::Duration;

use fprust_core::ConfirmationCode;

use crate::ops::EnrollStep;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Framing or checksum failure; never auto-retried
    #[error("Protocol error: {0}")]
    Protocol(#[from] fprust_core::Error),

    /// Channel failure; fatal to the session, caller must reopen
    #[error("Transport error: {0}")]
    Transport(#[from] fprust_transport::Error),

    #[error("Type error: {0}")]
    Types(#[from] fprust_types::Error),

    /// No complete response within the deadline; caller decides on retry
    #[error("Timeout waiting for response after {after:?}")]
    Timeout {
        after: Duration,
    },

    /// Another operation owns the session
    #[error("Session busy with another operation")]
    SessionBusy,

    /// The session was closed; it is never implicitly reopened
    #[error("Session closed")]
    SessionClosed,

    /// The module returned a known failure confirmation
    #[error("Sensor rejected command: {0}")]
    Rejected(ConfirmationCode),

    /// Confirmation code outside the known table; not fatal to the session
    #[error("Unrecognized confirmation code: 0x{0:02X}")]
    UnknownConfirmation(u8),

    /// A multi-step enrollment aborted; reports the failing step
    #[error("Enrollment aborted at {step}: {source}")]
    Enrollment {
        step: EnrollStep,
        #[source]
        source: Box<Error>,
    },

    /// Cooperative cancellation between packet round trips
    #[error("Operation cancelled")]
    Cancelled,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl Error {
    /// Check if a retry of the same call might succeed
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. }
                | Self::SessionBusy
                | Self::Rejected(_)
                | Self::UnknownConfirmation(_)
        )
    }

    /// Check if the session must be reopened before further use
    pub fn requires_reconnect(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::SessionClosed)
    }
}
