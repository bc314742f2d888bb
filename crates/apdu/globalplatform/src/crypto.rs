//! DES/3DES primitives for SCP01 and SCP02
//!
//! Two MAC constructions exist side by side and must not be conflated:
//! the full 3DES-CBC MAC ([`mac_3des`], SCP01 command MACs and the mutual
//! authentication cryptograms of both protocols) and the ANSI X9.19 retail
//! MAC ([`mac_des_3des`], SCP02 command and response MACs). Both take an
//! explicit 8-byte ICV so callers can chain them.

use cbc::Encryptor;
use cipher::block_padding::NoPadding;
use cipher::{Block, BlockEncrypt, BlockEncryptMut, Key as CipherKey, KeyInit, KeyIvInit};
use des::{Des, TdesEde2};
use subtle::ConstantTimeEq;

use crate::keys::Key;

/// DES block length in bytes
pub const BLOCK_LEN: usize = 8;
/// MAC and ICV length in bytes
pub const MAC_LEN: usize = 8;
/// The all-zero ICV every MAC chain starts from
pub const NULL_ICV: [u8; MAC_LEN] = [0u8; MAC_LEN];

/// SCP02 session key derivation purpose: Secure Channel C-MAC key
pub const DERIVE_SMAC: u16 = 0x0101;
/// SCP02 session key derivation purpose: Secure Channel R-MAC key
pub const DERIVE_RMAC: u16 = 0x0102;
/// SCP02 session key derivation purpose: Secure Channel encryption key
pub const DERIVE_SENC: u16 = 0x0182;
/// SCP02 session key derivation purpose: Data encryption key
pub const DERIVE_DEK: u16 = 0x0181;

type TdesCbcEnc = Encryptor<TdesEde2>;

/// ISO/IEC 9797-1 padding method 2: append 0x80, then zeros to a block
/// multiple. Always grows the input.
pub fn pad80(data: &[u8]) -> Vec<u8> {
    let padded_len = (data.len() / BLOCK_LEN + 1) * BLOCK_LEN;
    let mut padded = Vec::with_capacity(padded_len);
    padded.extend_from_slice(data);
    padded.push(0x80);
    padded.resize(padded_len, 0x00);
    padded
}

fn xor_block(block: &mut Block<Des>, chunk: &[u8]) {
    for (b, c) in block.iter_mut().zip(chunk) {
        *b ^= c;
    }
}

/// Full 3DES-CBC MAC over method-2 padded input.
///
/// Used for SCP01 command MACs and for the card/host cryptograms of both
/// protocol families.
pub fn mac_3des(key: &Key, data: &[u8], icv: &[u8; MAC_LEN]) -> [u8; MAC_LEN] {
    let tdes = TdesEde2::new(CipherKey::<TdesEde2>::from_slice(key.as_bytes()));
    let mut state = Block::<Des>::clone_from_slice(icv);
    for chunk in pad80(data).chunks_exact(BLOCK_LEN) {
        xor_block(&mut state, chunk);
        tdes.encrypt_block(&mut state);
    }
    state.into()
}

/// ANSI X9.19 retail MAC over method-2 padded input.
///
/// Single-DES CBC with K1 over all but the last block, then one 3DES
/// operation on the last block. Used for SCP02 command and response MACs.
pub fn mac_des_3des(key: &Key, data: &[u8], icv: &[u8; MAC_LEN]) -> [u8; MAC_LEN] {
    let des = Des::new(CipherKey::<Des>::from_slice(&key.as_des()));
    let tdes = TdesEde2::new(CipherKey::<TdesEde2>::from_slice(key.as_bytes()));

    let padded = pad80(data);
    let (head, last) = padded.split_at(padded.len() - BLOCK_LEN);

    let mut state = Block::<Des>::clone_from_slice(icv);
    for chunk in head.chunks_exact(BLOCK_LEN) {
        xor_block(&mut state, chunk);
        des.encrypt_block(&mut state);
    }
    xor_block(&mut state, last);
    tdes.encrypt_block(&mut state);
    state.into()
}

/// 3DES-CBC encryption with a zero IV. `data` must already be padded to a
/// block multiple.
pub fn encrypt_3des_cbc(key: &Key, data: &[u8]) -> Vec<u8> {
    let mut buf = data.to_vec();
    let len = buf.len();
    TdesCbcEnc::new(
        CipherKey::<TdesEde2>::from_slice(key.as_bytes()),
        &NULL_ICV.into(),
    )
    .encrypt_padded_mut::<NoPadding>(&mut buf, len)
    .expect("input is block aligned");
    buf
}

/// 3DES-ECB encryption. `data` must be a block multiple.
pub fn encrypt_3des_ecb(key: &Key, data: &[u8]) -> Vec<u8> {
    let tdes = TdesEde2::new(CipherKey::<TdesEde2>::from_slice(key.as_bytes()));
    let mut out = data.to_vec();
    for chunk in out.chunks_exact_mut(BLOCK_LEN) {
        let block = Block::<Des>::from_mut_slice(chunk);
        tdes.encrypt_block(block);
    }
    out
}

/// Single-DES ECB encryption of one block
pub fn encrypt_des_ecb_block(key: &[u8; BLOCK_LEN], block: &[u8; BLOCK_LEN]) -> [u8; BLOCK_LEN] {
    let des = Des::new(CipherKey::<Des>::from_slice(key));
    let mut state = Block::<Des>::clone_from_slice(block);
    des.encrypt_block(&mut state);
    state.into()
}

/// SCP01 session key derivation data:
/// card[4..8] ‖ host[0..4] ‖ card[0..4] ‖ host[4..8]
pub fn scp01_derivation_data(host_challenge: &[u8; 8], card_challenge: &[u8; 8]) -> [u8; 16] {
    let mut data = [0u8; 16];
    data[0..4].copy_from_slice(&card_challenge[4..8]);
    data[4..8].copy_from_slice(&host_challenge[0..4]);
    data[8..12].copy_from_slice(&card_challenge[0..4]);
    data[12..16].copy_from_slice(&host_challenge[4..8]);
    data
}

/// SCP02 session key derivation data: purpose constant, sequence counter,
/// twelve zero bytes
pub fn scp02_derivation_data(purpose: u16, sequence: &[u8; 2]) -> [u8; 16] {
    let mut data = [0u8; 16];
    data[0..2].copy_from_slice(&purpose.to_be_bytes());
    data[2..4].copy_from_slice(sequence);
    data
}

/// Derive one SCP02 session key: 3DES-CBC over the derivation data with a
/// zero IV under the matching static key
pub fn derive_scp02_key(static_key: &Key, purpose: u16, sequence: &[u8; 2]) -> Key {
    let data = scp02_derivation_data(purpose, sequence);
    let cipher = encrypt_3des_cbc(static_key, &data);
    let mut key = [0u8; 16];
    key.copy_from_slice(&cipher);
    Key::new(key)
}

/// Constant-time equality for MACs and cryptograms
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    // The classic single-DES worked example
    const DES_KEY: [u8; 8] = hex!("133457799BBCDFF1");
    const DES_PT: [u8; 8] = hex!("0123456789ABCDEF");
    const DES_CT: [u8; 8] = hex!("85E813540F0AB405");

    // 16-byte key with K1 == K2: every 3DES operation collapses to DES
    fn degenerate_key() -> Key {
        let mut k = [0u8; 16];
        k[..8].copy_from_slice(&DES_KEY);
        k[8..].copy_from_slice(&DES_KEY);
        Key::new(k)
    }

    #[test]
    fn test_des_known_answer() {
        assert_eq!(encrypt_des_ecb_block(&DES_KEY, &DES_PT), DES_CT);
    }

    #[test]
    fn test_tdes_collapses_to_des_with_equal_halves() {
        let out = encrypt_3des_ecb(&degenerate_key(), &DES_PT);
        assert_eq!(out.as_slice(), &DES_CT);
    }

    #[test]
    fn test_cbc_first_block_with_zero_iv_matches_ecb() {
        let out = encrypt_3des_cbc(&degenerate_key(), &DES_PT);
        assert_eq!(out.as_slice(), &DES_CT);
    }

    #[test]
    fn test_pad80() {
        assert_eq!(pad80(&[]), hex!("80 00 00 00 00 00 00 00"));
        assert_eq!(
            pad80(&hex!("01 02 03")),
            hex!("01 02 03 80 00 00 00 00")
        );
        // exact block still grows by a full block
        assert_eq!(pad80(&[0u8; 8]).len(), 16);
    }

    #[test]
    fn test_retail_mac_collapses_to_cbc_mac_with_equal_halves() {
        // With K1 == K2 the final D(K2) undoes E(K1), so the retail MAC
        // equals the plain CBC MAC over the same input.
        let key = degenerate_key();
        let data = hex!("0102030405060708 09 0A 0B");
        assert_eq!(
            mac_des_3des(&key, &data, &NULL_ICV),
            mac_3des(&key, &data, &NULL_ICV)
        );
    }

    #[test]
    fn test_mac_single_block_is_cipher_of_padded_input() {
        let key = degenerate_key();
        // 7 bytes pad to exactly one block
        let data = hex!("01 02 03 04 05 06 07");
        let expected = encrypt_3des_ecb(&key, &pad80(&data));
        assert_eq!(mac_3des(&key, &data, &NULL_ICV), expected.as_slice());
    }

    #[test]
    fn test_mac_chains_through_icv() {
        let key = degenerate_key();
        let a = mac_3des(&key, b"first", &NULL_ICV);
        let b = mac_3des(&key, b"second", &a);
        // chaining with a different ICV must change the result
        assert_ne!(b, mac_3des(&key, b"second", &NULL_ICV));
    }

    #[test]
    fn test_scp01_derivation_data_layout() {
        let host = hex!("00 01 02 03 04 05 06 07");
        let card = hex!("C1 C2 C3 C4 C5 C6 C7 C8");
        assert_eq!(
            scp01_derivation_data(&host, &card),
            hex!("C5 C6 C7 C8 00 01 02 03 C1 C2 C3 C4 04 05 06 07")
        );
    }

    #[test]
    fn test_scp02_derivation_data_layout() {
        assert_eq!(
            scp02_derivation_data(DERIVE_SMAC, &[0x00, 0x01]),
            hex!("01 01 00 01 00 00 00 00 00 00 00 00 00 00 00 00")
        );
        assert_eq!(
            scp02_derivation_data(DERIVE_SENC, &[0xBE, 0xEF])[..4],
            hex!("01 82 BE EF")
        );
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(&DES_CT, &DES_CT));
        let mut tampered = DES_CT;
        tampered[7] ^= 0x01;
        assert!(!constant_time_eq(&DES_CT, &tampered));
        assert!(!constant_time_eq(&DES_CT, &DES_CT[..7]));
    }
}
