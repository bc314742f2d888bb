//! Application Identifiers
//!
//! An AID names an on-card package, applet instance, or security domain.

use std::fmt;

use bytes::Bytes;

use crate::{Error, Result};

/// Minimum AID length in bytes
pub const AID_MIN_LEN: usize = 5;
/// Maximum AID length in bytes
pub const AID_MAX_LEN: usize = 16;

/// An ISO/IEC 7816-5 Application Identifier, 5 to 16 bytes
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Aid(Bytes);

impl Aid {
    /// Create an AID from raw bytes, validating its length
    pub fn new<T: Into<Bytes>>(bytes: T) -> Result<Self> {
        let bytes = bytes.into();
        if !(AID_MIN_LEN..=AID_MAX_LEN).contains(&bytes.len()) {
            return Err(Error::InvalidArgument("AID must be 5 to 16 bytes"));
        }
        Ok(Self(bytes))
    }

    /// The AID bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// AID length in bytes
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false; AIDs cannot be empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl TryFrom<&[u8]> for Aid {
    type Error = Error;

    fn try_from(bytes: &[u8]) -> Result<Self> {
        Self::new(Bytes::copy_from_slice(bytes))
    }
}

impl AsRef<[u8]> for Aid {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Aid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Aid({})", hex::encode_upper(&self.0))
    }
}

impl fmt::Display for Aid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode_upper(&self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn test_length_bounds() {
        assert!(Aid::try_from(&hex!("A0 00 00 00 62")[..]).is_ok());
        assert!(Aid::try_from(&hex!("A0 00 00 00")[..]).is_err());
        assert!(Aid::try_from([0u8; 17].as_slice()).is_err());
    }

    #[test]
    fn test_value_equality() {
        let a = Aid::try_from(&hex!("A0 00 00 00 62 03 01 08 01")[..]).unwrap();
        let b = Aid::new(Bytes::copy_from_slice(&hex!("A0 00 00 00 62 03 01 08 01"))).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "A00000006203010801");
    }
}
