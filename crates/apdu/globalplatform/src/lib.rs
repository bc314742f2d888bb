//! GlobalPlatform card management
//!
//! This crate implements the host side of the GlobalPlatform card
//! specification for smart card management:
//!
//! - The SCP01 and SCP02 secure channel protocols: mutual authentication,
//!   session key derivation, command MAC/encryption and response MAC
//!   verification
//! - The card management command layer: SELECT, INSTALL, LOAD, DELETE and
//!   GET STATUS, including CAP file streaming
//! - An in-memory registry of on-card applications, packages and modules
//!
//! The entry point is [`GlobalPlatform`], generic over any
//! [`CardTransport`](opengp_apdu_core::CardTransport):
//!
//! ```no_run
//! use opengp_apdu_core::MockTransport;
//! use opengp_globalplatform::{GlobalPlatform, KeySet, ScpVariant, SecurityLevel};
//!
//! # fn main() -> opengp_globalplatform::Result<()> {
//! let transport = MockTransport::new();
//! let mut gp = GlobalPlatform::new(transport);
//! gp.select_security_domain(None)?;
//! gp.open_secure_channel(&KeySet::default(), ScpVariant::Any, SecurityLevel::mac())?;
//! for entry in gp.registry()?.entries() {
//!     println!("{entry}");
//! }
//! # Ok(())
//! # }
//! ```

#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![forbid(unsafe_code)]
#![warn(missing_docs, rustdoc::missing_crate_level_docs)]

pub mod aid;
pub mod application;
pub mod commands;
pub mod constants;
pub mod crypto;
pub mod error;
pub mod keys;
pub mod load;
pub mod registry;
pub mod scp;
pub mod session;
pub mod tlv;
pub mod wrapper;

pub use aid::Aid;
pub use application::GlobalPlatform;
pub use error::{Error, Result};
pub use keys::{Diversification, Key, KeySet, KeyType};
pub use load::{CapFile, CapFileInfo, LoadCommandStream, ZipCapFile};
pub use registry::{AidRegistry, AppKind, RegistryEntry};
pub use scp::{ScpFamily, ScpFlags, ScpVariant, SecurityLevel};
pub use session::open_secure_channel;
pub use wrapper::SecureChannelWrapper;
