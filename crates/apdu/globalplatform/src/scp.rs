//! Secure Channel Protocol variants and security levels
//!
//! The protocol family plus the GP "i" option byte fix three wrapper
//! behaviors: whether the command ICV is re-encrypted between commands,
//! and whether the C-MAC covers the modified or the original APDU header.
//! All of that is decided here, once, so the crypto path never branches on
//! the variant directly.

use std::fmt;

use crate::constants::security;

/// Secure Channel Protocol family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScpFamily {
    /// SCP01: full 3DES-CBC command MACs
    Scp01,
    /// SCP02: X9.19 retail command MACs, optional R-MAC
    Scp02,
}

impl ScpFamily {
    /// The protocol identifier reported by INITIALIZE UPDATE
    pub const fn id(self) -> u8 {
        match self {
            Self::Scp01 => 0x01,
            Self::Scp02 => 0x02,
        }
    }
}

/// Wrapper behavior derived from an SCP variant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScpFlags {
    /// Protocol family
    pub family: ScpFamily,
    /// Re-encrypt the command ICV before each MAC after the first
    pub icv_encrypt: bool,
    /// C-MAC input carries the already-modified CLA and Lc
    pub pre_mac: bool,
    /// C-MAC input carries the original APDU; CLA/Lc are modified after
    pub post_mac: bool,
}

/// An SCP variant: protocol family plus GP "i" option byte
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScpVariant {
    /// Autonegotiate from the INITIALIZE UPDATE response
    #[default]
    Any,
    Scp01_05,
    Scp01_15,
    Scp02_04,
    Scp02_05,
    Scp02_0A,
    Scp02_0B,
    Scp02_14,
    Scp02_15,
    Scp02_1A,
    Scp02_1B,
}

impl ScpVariant {
    /// The protocol family, `None` for [`ScpVariant::Any`]
    pub const fn family(self) -> Option<ScpFamily> {
        match self {
            Self::Any => None,
            Self::Scp01_05 | Self::Scp01_15 => Some(ScpFamily::Scp01),
            _ => Some(ScpFamily::Scp02),
        }
    }

    /// The GP "i" option byte, `None` for [`ScpVariant::Any`]
    pub const fn option_byte(self) -> Option<u8> {
        match self {
            Self::Any => None,
            Self::Scp01_05 | Self::Scp02_05 => Some(0x05),
            Self::Scp01_15 | Self::Scp02_15 => Some(0x15),
            Self::Scp02_04 => Some(0x04),
            Self::Scp02_0A => Some(0x0A),
            Self::Scp02_0B => Some(0x0B),
            Self::Scp02_14 => Some(0x14),
            Self::Scp02_1A => Some(0x1A),
            Self::Scp02_1B => Some(0x1B),
        }
    }

    /// Whether this is an implicit-initiation profile (no INITIALIZE
    /// UPDATE handshake); such variants cannot be used with explicit
    /// session setup
    pub const fn is_implicit(self) -> bool {
        matches!(
            self,
            Self::Scp02_0A | Self::Scp02_0B | Self::Scp02_1A | Self::Scp02_1B
        )
    }

    /// The wrapper flags for this variant, `None` for [`ScpVariant::Any`]
    pub const fn flags(self) -> Option<ScpFlags> {
        let family = match self.family() {
            Some(family) => family,
            None => return None,
        };
        let icv_encrypt = matches!(
            self,
            Self::Scp01_15 | Self::Scp02_14 | Self::Scp02_15 | Self::Scp02_1A | Self::Scp02_1B
        );
        // SCP01 MACs the original APDU, SCP02 the modified one
        let pre_mac = matches!(family, ScpFamily::Scp02);
        Some(ScpFlags {
            family,
            icv_encrypt,
            pre_mac,
            post_mac: !pre_mac,
        })
    }

    /// Default concrete variant for a protocol id reported by the card
    pub const fn from_reported(scp: u8) -> Self {
        match scp {
            0x02 => Self::Scp02_15,
            _ => Self::Scp01_05,
        }
    }
}

impl fmt::Display for ScpVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.family(), self.option_byte()) {
            (Some(family), Some(i)) => write!(f, "SCP{:02}({:#04x})", family.id(), i),
            _ => write!(f, "SCP(any)"),
        }
    }
}

/// Session security level: a set over {MAC, ENC, RMAC}
///
/// ENC always implies MAC; construction enforces it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SecurityLevel {
    mac: bool,
    enc: bool,
    rmac: bool,
}

impl SecurityLevel {
    /// No protection
    pub const fn none() -> Self {
        Self {
            mac: false,
            enc: false,
            rmac: false,
        }
    }

    /// Command MACs only
    pub const fn mac() -> Self {
        Self {
            mac: true,
            enc: false,
            rmac: false,
        }
    }

    /// Command encryption (implies command MACs)
    pub const fn enc() -> Self {
        Self {
            mac: true,
            enc: true,
            rmac: false,
        }
    }

    /// Add response MACs (SCP02 only)
    pub const fn with_rmac(mut self) -> Self {
        self.rmac = true;
        self
    }

    /// Whether command MACs are enabled
    pub const fn has_mac(self) -> bool {
        self.mac
    }

    /// Whether command encryption is enabled
    pub const fn has_enc(self) -> bool {
        self.enc
    }

    /// Whether response MACs are enabled
    pub const fn has_rmac(self) -> bool {
        self.rmac
    }

    pub(crate) const fn clear_rmac(mut self) -> Self {
        self.rmac = false;
        self
    }

    /// The P1 bitfield of EXTERNAL AUTHENTICATE
    pub const fn bits(self) -> u8 {
        let mut bits = 0;
        if self.mac {
            bits |= security::MAC;
        }
        if self.enc {
            bits |= security::ENC;
        }
        if self.rmac {
            bits |= security::RMAC;
        }
        bits
    }
}

impl fmt::Display for SecurityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.mac, self.enc, self.rmac) {
            (false, _, false) => write!(f, "none"),
            _ => {
                let mut parts = Vec::new();
                if self.mac {
                    parts.push("MAC");
                }
                if self.enc {
                    parts.push("ENC");
                }
                if self.rmac {
                    parts.push("RMAC");
                }
                write!(f, "{}", parts.join("+"))
            }
        }
    }
}
