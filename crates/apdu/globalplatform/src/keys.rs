//! Key material for GlobalPlatform secure channels
//!
//! A [`KeySet`] carries the ENC/MAC/KEK triple of a card key set, plus the
//! derived R-MAC key on SCP02 session sets. Keys are 16 bytes and are used
//! as 2-key 3DES keys (K1‖K2 with K3 = K1) or as single DES via K1 alone.

use std::fmt;

use zeroize::Zeroize;

use crate::constants::DEFAULT_KEY;
use crate::crypto;
use crate::{Error, Result};

/// Key length in bytes
pub const KEY_LEN: usize = 16;

/// A 16-byte symmetric key
#[derive(Clone, PartialEq, Eq, Zeroize)]
#[zeroize(drop)]
pub struct Key([u8; KEY_LEN]);

impl Key {
    /// Create a key from its raw bytes
    pub const fn new(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Create a key from a slice, validating its length
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; KEY_LEN] = bytes
            .try_into()
            .map_err(|_| Error::InvalidArgument("key must be 16 bytes"))?;
        Ok(Self(bytes))
    }

    /// The raw key bytes
    pub const fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    /// The 24-byte 3DES expansion K1‖K2‖K1
    pub fn as_tdes(&self) -> [u8; 24] {
        let mut expanded = [0u8; 24];
        expanded[..16].copy_from_slice(&self.0);
        expanded[16..].copy_from_slice(&self.0[..8]);
        expanded
    }

    /// The single-DES view: K1
    pub fn as_des(&self) -> [u8; 8] {
        let mut k1 = [0u8; 8];
        k1.copy_from_slice(&self.0[..8]);
        k1
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never leak key material through logs
        write!(f, "Key(..)")
    }
}

/// The role a key plays inside a key set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyType {
    /// Command encryption (and cryptogram) key
    Enc,
    /// Command MAC key
    Mac,
    /// Key encryption key
    Kek,
    /// Response MAC key (SCP02 session sets only)
    Rmac,
}

impl KeyType {
    /// Key identifier used inside diversification derivation data
    pub const fn derivation_id(self) -> u8 {
        match self {
            Self::Enc => 0x01,
            Self::Mac => 0x02,
            Self::Kek => 0x03,
            Self::Rmac => 0x04,
        }
    }
}

/// Master key diversification scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Diversification {
    /// Keys are used as-is
    #[default]
    None,
    /// EMV CPS 1.1 derivation
    Emv,
    /// VISA2 derivation
    Visa2,
    /// KDF3 derivation (SCP03 family; not supported here)
    Kdf3,
}

/// A GlobalPlatform key set: ENC/MAC/KEK triple with version and id
#[derive(Clone)]
pub struct KeySet {
    version: u8,
    id: u8,
    diversification: Diversification,
    derived: bool,
    enc: Key,
    mac: Key,
    kek: Key,
    rmac: Option<Key>,
}

impl KeySet {
    /// Create a key set from its three keys
    pub fn new(version: u8, id: u8, enc: Key, mac: Key, kek: Key) -> Result<Self> {
        if id > 0x7F {
            return Err(Error::InvalidArgument("key id must be 0..=127"));
        }
        Ok(Self {
            version,
            id,
            diversification: Diversification::None,
            derived: false,
            enc,
            mac,
            kek,
            rmac: None,
        })
    }

    /// Create a key set using one key for all three roles
    pub fn from_single(version: u8, id: u8, key: Key) -> Result<Self> {
        Self::new(version, id, key.clone(), key.clone(), key)
    }

    /// Select the diversification scheme for this master key set
    pub const fn with_diversification(mut self, diversification: Diversification) -> Self {
        self.diversification = diversification;
        self
    }

    /// Key set version (0 and 255 mean "any/default")
    pub const fn version(&self) -> u8 {
        self.version
    }

    /// Key set id
    pub const fn id(&self) -> u8 {
        self.id
    }

    /// The configured diversification scheme
    pub const fn diversification(&self) -> Diversification {
        self.diversification
    }

    /// Whether `diversify` has already been applied
    pub const fn is_derived(&self) -> bool {
        self.derived
    }

    /// Whether this key set still requires diversification before use
    pub fn needs_diversity(&self) -> bool {
        self.diversification != Diversification::None && !self.derived
    }

    /// Look up a key by role
    pub const fn key(&self, key_type: KeyType) -> Option<&Key> {
        match key_type {
            KeyType::Enc => Some(&self.enc),
            KeyType::Mac => Some(&self.mac),
            KeyType::Kek => Some(&self.kek),
            KeyType::Rmac => self.rmac.as_ref(),
        }
    }

    /// Look up a key as its 24-byte 3DES expansion
    pub fn key_3des(&self, key_type: KeyType) -> Option<[u8; 24]> {
        self.key(key_type).map(Key::as_tdes)
    }

    /// Look up a key as its single-DES K1 half
    pub fn key_des(&self, key_type: KeyType) -> Option<[u8; 8]> {
        self.key(key_type).map(Key::as_des)
    }

    /// The command encryption key
    pub const fn enc(&self) -> &Key {
        &self.enc
    }

    /// The command MAC key
    pub const fn mac(&self) -> &Key {
        &self.mac
    }

    /// The key encryption key
    pub const fn kek(&self) -> &Key {
        &self.kek
    }

    /// The response MAC key, present on SCP02 session sets
    pub const fn rmac(&self) -> Option<&Key> {
        self.rmac.as_ref()
    }

    pub(crate) fn set_rmac(&mut self, rmac: Key) {
        self.rmac = Some(rmac);
    }

    pub(crate) const fn set_version(&mut self, version: u8) {
        self.version = version;
    }

    /// Diversify the master keys in place from the 28-byte
    /// INITIALIZE UPDATE response.
    ///
    /// Only the first ten bytes (the key diversification data) are used.
    /// May be applied at most once, and only to a default key set
    /// (version 0 or 255).
    pub fn diversify(&mut self, response: &[u8; 28]) -> Result<()> {
        if self.derived {
            return Err(Error::InvalidArgument("key set already diversified"));
        }
        if self.version != 0 && self.version != 0xFF {
            return Err(Error::InvalidArgument(
                "only default key sets can be diversified",
            ));
        }

        let mut kdd = [0u8; 10];
        kdd.copy_from_slice(&response[..10]);
        let fill: fn(&[u8; 10], KeyType) -> [u8; 16] = match self.diversification {
            Diversification::None => return Ok(()),
            Diversification::Emv => fill_emv,
            Diversification::Visa2 => fill_visa2,
            Diversification::Kdf3 => {
                return Err(Error::Unsupported("KDF3 diversification"));
            }
        };

        for key_type in [KeyType::Enc, KeyType::Mac, KeyType::Kek] {
            let data = fill(&kdd, key_type);
            let master = match key_type {
                KeyType::Enc => &self.enc,
                KeyType::Mac => &self.mac,
                _ => &self.kek,
            };
            let derived = Key::from_slice(&crypto::encrypt_3des_ecb(master, &data))?;
            match key_type {
                KeyType::Enc => self.enc = derived,
                KeyType::Mac => self.mac = derived,
                _ => self.kek = derived,
            }
        }
        self.derived = true;
        Ok(())
    }
}

impl Default for KeySet {
    /// The 40..4F development key for all three roles, version 0, id 0
    fn default() -> Self {
        Self::from_single(0, 0, Key::new(DEFAULT_KEY)).expect("valid id")
    }
}

impl fmt::Debug for KeySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeySet")
            .field("version", &self.version)
            .field("id", &self.id)
            .field("diversification", &self.diversification)
            .field("derived", &self.derived)
            .field("rmac", &self.rmac.is_some())
            .finish()
    }
}

/// EMV CPS derivation input: kdd[4..10] ‖ F0 ‖ kt ‖ kdd[4..10] ‖ 0F ‖ kt
fn fill_emv(kdd: &[u8; 10], key_type: KeyType) -> [u8; 16] {
    let mut data = [0u8; 16];
    data[0..6].copy_from_slice(&kdd[4..10]);
    data[6] = 0xF0;
    data[7] = key_type.derivation_id();
    data[8..14].copy_from_slice(&kdd[4..10]);
    data[14] = 0x0F;
    data[15] = key_type.derivation_id();
    data
}

/// VISA2 derivation input: kdd[0..2] ‖ kdd[4..8] ‖ F0 ‖ kt ‖ kdd[0..2] ‖
/// kdd[4..8] ‖ 0F ‖ kt
fn fill_visa2(kdd: &[u8; 10], key_type: KeyType) -> [u8; 16] {
    let mut data = [0u8; 16];
    data[0..2].copy_from_slice(&kdd[0..2]);
    data[2..6].copy_from_slice(&kdd[4..8]);
    data[6] = 0xF0;
    data[7] = key_type.derivation_id();
    data[8..10].copy_from_slice(&kdd[0..2]);
    data[10..14].copy_from_slice(&kdd[4..8]);
    data[14] = 0x0F;
    data[15] = key_type.derivation_id();
    data
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn test_key_views() {
        let key = Key::new(hex!("404142434445464748494A4B4C4D4E4F"));
        assert_eq!(key.as_des(), hex!("4041424344454647"));
        assert_eq!(
            key.as_tdes(),
            hex!("404142434445464748494A4B4C4D4E4F4041424344454647")
        );
    }

    #[test]
    fn test_default_key_set() {
        let keys = KeySet::default();
        assert_eq!(keys.version(), 0);
        assert_eq!(keys.id(), 0);
        assert_eq!(keys.enc().as_bytes(), &DEFAULT_KEY);
        assert!(keys.key(KeyType::Rmac).is_none());
        assert!(!keys.needs_diversity());
    }

    #[test]
    fn test_key_id_bounds() {
        assert!(KeySet::from_single(0, 0x80, Key::new(DEFAULT_KEY)).is_err());
    }

    #[test]
    fn test_diversification_fill_layouts() {
        let kdd = hex!("00 01 02 03 04 05 06 07 08 09");
        assert_eq!(
            fill_emv(&kdd, KeyType::Enc),
            hex!("04 05 06 07 08 09 F0 01 04 05 06 07 08 09 0F 01")
        );
        assert_eq!(
            fill_visa2(&kdd, KeyType::Kek),
            hex!("00 01 04 05 06 07 F0 03 00 01 04 05 06 07 0F 03")
        );
    }

    #[test]
    fn test_diversify_applied_once() {
        let response = [0u8; 28];
        let mut keys = KeySet::default().with_diversification(Diversification::Emv);
        assert!(keys.needs_diversity());

        let before = keys.enc().clone();
        keys.diversify(&response).unwrap();
        assert!(keys.is_derived());
        assert!(!keys.needs_diversity());
        assert_ne!(keys.enc(), &before);

        assert!(keys.diversify(&response).is_err());
    }

    #[test]
    fn test_diversify_requires_default_version() {
        let mut keys = KeySet::from_single(42, 0, Key::new(DEFAULT_KEY))
            .unwrap()
            .with_diversification(Diversification::Visa2);
        assert!(keys.diversify(&[0u8; 28]).is_err());
    }

    #[test]
    fn test_kdf3_unsupported() {
        let mut keys = KeySet::default().with_diversification(Diversification::Kdf3);
        assert!(matches!(
            keys.diversify(&[0u8; 28]),
            Err(Error::Unsupported(_))
        ));
    }
}
