//! In-memory model of on-card content
//!
//! GET STATUS with a `4F 00` search returns the deprecated record format:
//! a flat stream of `len ‖ aid ‖ life_cycle ‖ privileges` records, with a
//! module list appended when executable load files are queried together
//! with their modules. This module parses those streams into an
//! [`AidRegistry`].

use std::fmt;

use crate::aid::Aid;
use crate::constants::get_status_p1;
use crate::{Error, Result};

/// What a registry entry is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppKind {
    /// The Issuer Security Domain
    IssuerSecurityDomain,
    /// A supplementary Security Domain
    SecurityDomain,
    /// An application instance
    Application,
    /// An executable load file
    ExecutableLoadFiles,
    /// An executable load file listed together with its modules
    ExecutableLoadFilesAndModules,
}

impl AppKind {
    /// Classify an entry from the GET STATUS subset and its privileges
    pub const fn from_p1(p1: u8, privileges: u8) -> Self {
        match p1 {
            get_status_p1::ISD => Self::IssuerSecurityDomain,
            get_status_p1::APPLICATIONS => {
                // the security domain privilege distinguishes SDs from
                // plain applications
                if privileges & 0x80 != 0 {
                    Self::SecurityDomain
                } else {
                    Self::Application
                }
            }
            get_status_p1::EXEC_LOAD_FILES_AND_MODULES => Self::ExecutableLoadFilesAndModules,
            _ => Self::ExecutableLoadFiles,
        }
    }
}

/// One on-card object
#[derive(Debug, Clone)]
pub struct RegistryEntry {
    /// The object's AID
    pub aid: Aid,
    /// GlobalPlatform life cycle state byte
    pub life_cycle: u8,
    /// Privileges byte
    pub privileges: u8,
    /// Entry classification
    pub kind: AppKind,
    /// Module AIDs, populated only for
    /// [`AppKind::ExecutableLoadFilesAndModules`]
    pub modules: Vec<Aid>,
}

impl fmt::Display for RegistryEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} lc={:#04X} priv={:#04X} ({:?})",
            self.aid, self.life_cycle, self.privileges, self.kind
        )?;
        for module in &self.modules {
            write!(f, "\n  module {module}")?;
        }
        Ok(())
    }
}

/// Ordered collection of registry entries
#[derive(Debug, Clone, Default)]
pub struct AidRegistry {
    entries: Vec<RegistryEntry>,
}

impl AidRegistry {
    /// Create an empty registry
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// All entries in discovery order
    pub fn entries(&self) -> &[RegistryEntry] {
        &self.entries
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries of one kind
    pub fn by_kind(&self, kind: AppKind) -> impl Iterator<Item = &RegistryEntry> {
        self.entries.iter().filter(move |e| e.kind == kind)
    }

    /// Look up an entry by AID
    pub fn find(&self, aid: &Aid) -> Option<&RegistryEntry> {
        self.entries.iter().find(|e| &e.aid == aid)
    }

    /// Parse one concatenated GET STATUS response for the subset `p1` and
    /// append its records
    pub fn parse_records(&mut self, p1: u8, data: &[u8]) -> Result<()> {
        let with_modules = p1 == get_status_p1::EXEC_LOAD_FILES_AND_MODULES;
        let mut offset = 0usize;

        while offset < data.len() {
            let aid_len = data[offset] as usize;
            offset += 1;
            if offset + aid_len + 2 > data.len() {
                return Err(Error::MalformedResponse("truncated status record"));
            }
            let aid = Aid::try_from(&data[offset..offset + aid_len])?;
            offset += aid_len;
            let life_cycle = data[offset];
            offset += 1;
            let privileges = data[offset];
            offset += 1;

            let mut modules = Vec::new();
            if with_modules {
                if offset >= data.len() {
                    return Err(Error::MalformedResponse("truncated module count"));
                }
                let count = data[offset] as usize;
                offset += 1;
                for _ in 0..count {
                    if offset >= data.len() {
                        return Err(Error::MalformedResponse("truncated module record"));
                    }
                    let module_len = data[offset] as usize;
                    offset += 1;
                    if offset + module_len > data.len() {
                        return Err(Error::MalformedResponse("truncated module AID"));
                    }
                    modules.push(Aid::try_from(&data[offset..offset + module_len])?);
                    offset += module_len;
                }
            }

            self.entries.push(RegistryEntry {
                aid,
                life_cycle,
                privileges,
                kind: AppKind::from_p1(p1, privileges),
                modules,
            });
        }
        Ok(())
    }
}
