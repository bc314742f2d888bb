//! APDU response definitions
//!
//! This module provides the [`Response`] value type and [`StatusWord`]
//! helpers according to ISO/IEC 7816-4.

use std::fmt;

use bytes::Bytes;

use crate::Error;

/// Two-byte status word trailing every card response
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatusWord {
    /// First status byte
    pub sw1: u8,
    /// Second status byte
    pub sw2: u8,
}

impl StatusWord {
    /// Create a new status word from its two bytes
    pub const fn new(sw1: u8, sw2: u8) -> Self {
        Self { sw1, sw2 }
    }

    /// Create a status word from a 16-bit value
    pub const fn from_u16(sw: u16) -> Self {
        Self {
            sw1: (sw >> 8) as u8,
            sw2: (sw & 0xFF) as u8,
        }
    }

    /// The status word as a 16-bit value
    pub const fn to_u16(self) -> u16 {
        ((self.sw1 as u16) << 8) | self.sw2 as u16
    }

    /// Whether this status word reports success (0x9000)
    pub const fn is_success(self) -> bool {
        self.to_u16() == status::SW_NO_ERROR
    }
}

impl fmt::Debug for StatusWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StatusWord({:04X})", self.to_u16())
    }
}

impl fmt::Display for StatusWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04X}", self.to_u16())
    }
}

impl From<u16> for StatusWord {
    fn from(sw: u16) -> Self {
        Self::from_u16(sw)
    }
}

/// Common ISO/IEC 7816-4 status words
pub mod status {
    /// Normal completion
    pub const SW_NO_ERROR: u16 = 0x9000;
    /// Response bytes still available (GET RESPONSE)
    pub const SW_BYTES_REMAINING_00: u16 = 0x6100;
    /// Warning: card is locked (selected application in LOCKED state)
    pub const SW_CARD_LOCKED: u16 = 0x6283;
    /// More data available, repeat the command to continue
    pub const SW_MORE_DATA_AVAILABLE: u16 = 0x6310;
    /// Wrong length
    pub const SW_WRONG_LENGTH: u16 = 0x6700;
    /// Security condition not satisfied
    pub const SW_SECURITY_CONDITION_NOT_SATISFIED: u16 = 0x6982;
    /// Authentication method blocked
    pub const SW_AUTHENTICATION_METHOD_BLOCKED: u16 = 0x6983;
    /// Conditions of use not satisfied
    pub const SW_CONDITIONS_NOT_SATISFIED: u16 = 0x6985;
    /// Incorrect parameters in the data field
    pub const SW_WRONG_DATA: u16 = 0x6A80;
    /// Function not supported
    pub const SW_FUNC_NOT_SUPPORTED: u16 = 0x6A81;
    /// File or application not found
    pub const SW_FILE_NOT_FOUND: u16 = 0x6A82;
    /// Incorrect P1/P2 parameters
    pub const SW_INCORRECT_P1P2: u16 = 0x6A86;
    /// Referenced data not found
    pub const SW_REFERENCED_DATA_NOT_FOUND: u16 = 0x6A88;
    /// Instruction not supported or invalid
    pub const SW_INS_NOT_SUPPORTED: u16 = 0x6D00;
    /// Class not supported
    pub const SW_CLA_NOT_SUPPORTED: u16 = 0x6E00;
}

/// Generic APDU response: optional payload plus status word
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    payload: Option<Bytes>,
    status: StatusWord,
}

impl Response {
    /// Create a new response from payload and status
    pub const fn new(payload: Option<Bytes>, status: StatusWord) -> Self {
        Self { payload, status }
    }

    /// Create a success (0x9000) response
    pub const fn success(payload: Option<Bytes>) -> Self {
        Self::new(payload, StatusWord::from_u16(status::SW_NO_ERROR))
    }

    /// Parse a response from raw bytes (data followed by SW1/SW2)
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() < 2 {
            return Err(Error::InvalidResponseLength(bytes.len()));
        }

        let (data, sw) = bytes.split_at(bytes.len() - 2);
        let payload = if data.is_empty() {
            None
        } else {
            Some(Bytes::copy_from_slice(data))
        };

        Ok(Self::new(payload, StatusWord::new(sw[0], sw[1])))
    }

    /// Serialize the response back into raw bytes
    pub fn to_bytes(&self) -> Bytes {
        let data = self.payload.as_deref().unwrap_or(&[]);
        let mut out = Vec::with_capacity(data.len() + 2);
        out.extend_from_slice(data);
        out.push(self.status.sw1);
        out.push(self.status.sw2);
        out.into()
    }

    /// Response payload, if any
    pub const fn payload(&self) -> Option<&Bytes> {
        self.payload.as_ref()
    }

    /// Response payload as a slice (empty when absent)
    pub fn data(&self) -> &[u8] {
        self.payload.as_deref().unwrap_or(&[])
    }

    /// The status word
    pub const fn status(&self) -> StatusWord {
        self.status
    }

    /// Whether the status word reports success
    pub const fn is_success(&self) -> bool {
        self.status.is_success()
    }
}
