//! Core types for APDU (Application Protocol Data Unit) operations
//!
//! This crate provides the foundational types for working with smart card
//! APDU commands and responses according to ISO/IEC 7816-4:
//!
//! - Creating and parsing APDU commands and responses
//! - Status word interpretation
//! - The [`CardTransport`] abstraction over card readers and simulators
//!
//! Only short-form Lc/Le encoding is supported; commands never exceed
//! 261 bytes on the wire.

#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![forbid(unsafe_code)]
#![warn(missing_docs, rustdoc::missing_crate_level_docs)]

// Re-export bytes for convenience
pub use bytes::{Bytes, BytesMut};

pub mod command;
pub mod error;
pub mod response;
pub mod transport;

pub use command::{Command, ExpectedLength};
pub use error::{Error, Result, ResultExt};
pub use response::{Response, StatusWord};
pub use transport::{CardTransport, MockTransport};

/// Prelude module containing commonly used types
pub mod prelude {
    pub use crate::{Bytes, BytesMut, Error, ResultExt};

    pub use crate::command::{Command, ExpectedLength};
    pub use crate::response::{Response, StatusWord, status};
    pub use crate::transport::CardTransport;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reexports() {
        let cmd = Command::new(0x00, 0xA4, 0x04, 0x00);
        assert_eq!(cmd.class(), 0x00);
        assert_eq!(cmd.instruction(), 0xA4);
        assert_eq!(cmd.p1(), 0x04);
        assert_eq!(cmd.p2(), 0x00);

        let data = Bytes::from_static(&[0x01, 0x02, 0x03]);
        let resp = Response::success(Some(data.clone()));
        assert!(resp.is_success());
        assert_eq!(resp.payload(), Some(data).as_ref());
        assert_eq!(resp.status(), StatusWord::new(0x90, 0x00));
    }
}
