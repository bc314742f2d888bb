//! Error types for GlobalPlatform operations
//!
//! Centralizes every error the secure channel and the command layer can
//! raise. No retry happens at this layer; each failure propagates to the
//! caller.

use opengp_apdu_core::StatusWord;
use thiserror::Error;

/// Result type for GlobalPlatform operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for GlobalPlatform operations
#[derive(Debug, Error)]
pub enum Error {
    /// Core APDU or transport error
    #[error(transparent)]
    Core(#[from] opengp_apdu_core::Error),

    /// Card returned a non-success status word
    #[error("card returned status {0}")]
    CardStatus(StatusWord),

    /// Card or key set is locked (INITIALIZE UPDATE refused)
    #[error("security domain is locked")]
    Locked,

    /// Length or structure violation in a card response
    #[error("malformed response: {0}")]
    MalformedResponse(&'static str),

    /// Card cryptogram mismatch or EXTERNAL AUTHENTICATE rejected
    #[error("mutual authentication failed")]
    AuthenticationFailed,

    /// Negotiated SCP version does not match the requested variant
    #[error("SCP version mismatch: requested {requested:#04x}, card reported {reported:#04x}")]
    VersionMismatch {
        /// SCP family requested by the caller
        requested: u8,
        /// SCP family reported by the card
        reported: u8,
    },

    /// Key set version does not match what the card reports
    #[error("key version mismatch: expected {expected}, card reported {reported}")]
    KeyMismatch {
        /// Version of the provided static key set
        expected: u8,
        /// Version reported in the INITIALIZE UPDATE response
        reported: u8,
    },

    /// Response MAC verification failed
    #[error("response MAC invalid")]
    RMacInvalid,

    /// APDU exceeds the wrap budget for the active security level
    #[error("command data too long: {len} bytes, {max} allowed")]
    TooLong {
        /// Actual data length
        len: usize,
        /// Maximum allowed under the active security level
        max: usize,
    },

    /// Caller misuse
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// No Security Domain could be selected
    #[error("no security domain found")]
    NoSecurityDomain,

    /// Requested mechanism exists but is not supported by this crate
    #[error("unsupported: {0}")]
    Unsupported(&'static str),

    /// CAP file structure violation
    #[error("CAP file error: {0}")]
    CapFile(&'static str),

    /// CAP archive error
    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),

    /// I/O error while reading a CAP file
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Wrap a non-success status word
    pub fn card_status<S: Into<StatusWord>>(sw: S) -> Self {
        Self::CardStatus(sw.into())
    }
}
