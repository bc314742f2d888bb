//! Secure channel session establishment
//!
//! The INITIALIZE UPDATE / EXTERNAL AUTHENTICATE handshake: negotiate the
//! SCP variant, derive session keys from the static key set, verify the
//! card cryptogram, prove key possession back to the card, and hand a live
//! [`SecureChannelWrapper`] to the caller.

use opengp_apdu_core::{CardTransport, Command, Response};
use rand::RngCore;
use tracing::debug;

use crate::constants::{cla, ins, status};
use crate::crypto::{
    self, DERIVE_DEK, DERIVE_RMAC, DERIVE_SENC, DERIVE_SMAC, NULL_ICV, constant_time_eq, mac_3des,
};
use crate::keys::{Key, KeySet};
use crate::scp::{ScpFamily, ScpVariant, SecurityLevel};
use crate::wrapper::SecureChannelWrapper;
use crate::{Error, Result};

/// Parsed INITIALIZE UPDATE response (always 28 bytes)
#[derive(Debug, Clone)]
pub(crate) struct InitUpdateResponse {
    /// Key diversification data, opaque at this layer
    pub raw: [u8; 28],
    /// Key set version the card authenticated with
    pub key_version: u8,
    /// Protocol identifier: 0x01 or 0x02
    pub scp: u8,
    /// Card challenge; for SCP02 the first two bytes are the sequence
    /// counter
    pub card_challenge: [u8; 8],
    /// Card cryptogram over both challenges
    pub card_cryptogram: [u8; 8],
}

impl InitUpdateResponse {
    pub(crate) fn parse(data: &[u8]) -> Result<Self> {
        let raw: [u8; 28] = data
            .try_into()
            .map_err(|_| Error::MalformedResponse("INITIALIZE UPDATE data must be 28 bytes"))?;

        if raw[11] != 0x01 && raw[11] != 0x02 {
            return Err(Error::MalformedResponse("unknown SCP identifier"));
        }

        let mut card_challenge = [0u8; 8];
        card_challenge.copy_from_slice(&raw[12..20]);
        let mut card_cryptogram = [0u8; 8];
        card_cryptogram.copy_from_slice(&raw[20..28]);

        Ok(Self {
            raw,
            key_version: raw[10],
            scp: raw[11],
            card_challenge,
            card_cryptogram,
        })
    }

    /// SCP02 sequence counter
    pub(crate) fn sequence(&self) -> [u8; 2] {
        [self.raw[12], self.raw[13]]
    }
}

/// Derive SCP01 session keys: 3DES-ECB of the challenge-derived data under
/// each static key
pub(crate) fn derive_scp01_keys(
    static_keys: &KeySet,
    host_challenge: &[u8; 8],
    card_challenge: &[u8; 8],
) -> Result<KeySet> {
    let data = crypto::scp01_derivation_data(host_challenge, card_challenge);
    let derive = |key: &Key| Key::from_slice(&crypto::encrypt_3des_ecb(key, &data));

    KeySet::new(
        static_keys.version(),
        static_keys.id(),
        derive(static_keys.enc())?,
        derive(static_keys.mac())?,
        derive(static_keys.kek())?,
    )
}

/// Derive SCP02 session keys from the sequence counter, including the
/// R-MAC key
pub(crate) fn derive_scp02_keys(static_keys: &KeySet, sequence: &[u8; 2]) -> Result<KeySet> {
    let mut session = KeySet::new(
        static_keys.version(),
        static_keys.id(),
        crypto::derive_scp02_key(static_keys.enc(), DERIVE_SENC, sequence),
        crypto::derive_scp02_key(static_keys.mac(), DERIVE_SMAC, sequence),
        crypto::derive_scp02_key(static_keys.kek(), DERIVE_DEK, sequence),
    )?;
    session.set_rmac(crypto::derive_scp02_key(
        static_keys.mac(),
        DERIVE_RMAC,
        sequence,
    ));
    Ok(session)
}

/// Open a secure channel with a random host challenge
pub fn open_secure_channel<T: CardTransport>(
    transport: &mut T,
    static_keys: &KeySet,
    variant: ScpVariant,
    security_level: SecurityLevel,
) -> Result<SecureChannelWrapper> {
    let mut host_challenge = [0u8; 8];
    rand::rng().fill_bytes(&mut host_challenge);
    open_with_host_challenge(transport, static_keys, variant, security_level, host_challenge)
}

/// Handshake body with a caller-supplied host challenge
pub(crate) fn open_with_host_challenge<T: CardTransport>(
    transport: &mut T,
    static_keys: &KeySet,
    requested: ScpVariant,
    security_level: SecurityLevel,
    host_challenge: [u8; 8],
) -> Result<SecureChannelWrapper> {
    if requested.is_implicit() {
        return Err(Error::InvalidArgument(
            "implicit-initiation SCP variants cannot be negotiated explicitly",
        ));
    }

    // INITIALIZE UPDATE carries the key version and id the host wants
    let init_update = Command::new_with_data_and_le(
        cla::GP,
        ins::INITIALIZE_UPDATE,
        static_keys.version(),
        static_keys.id(),
        host_challenge.to_vec(),
        0,
    );
    let response = transmit(transport, &init_update)?;

    match response.status().to_u16() {
        status::SW_NO_ERROR => {}
        status::SW_SECURITY_CONDITION_NOT_SATISFIED
        | status::SW_AUTHENTICATION_METHOD_BLOCKED => return Err(Error::Locked),
        sw => return Err(Error::card_status(sw)),
    }
    let init = InitUpdateResponse::parse(response.data())?;

    // Resolve the variant against what the card reports
    let variant = match requested {
        ScpVariant::Any => ScpVariant::from_reported(init.scp),
        _ => {
            let family = requested.family().expect("concrete variant");
            if family.id() != init.scp {
                return Err(Error::VersionMismatch {
                    requested: family.id(),
                    reported: init.scp,
                });
            }
            requested
        }
    };
    let family = variant.family().expect("resolved variant");
    debug!(%variant, key_version = init.key_version, "negotiated secure channel");

    // R-MAC exists only in SCP02
    let security_level = match family {
        ScpFamily::Scp01 => security_level.clear_rmac(),
        ScpFamily::Scp02 => security_level,
    };

    let mut static_keys = static_keys.clone();
    let default_version = static_keys.version() == 0 || static_keys.version() == 0xFF;
    if default_version && static_keys.needs_diversity() {
        static_keys.diversify(&init.raw)?;
    }
    if !default_version && static_keys.version() != init.key_version {
        return Err(Error::KeyMismatch {
            expected: static_keys.version(),
            reported: init.key_version,
        });
    }

    let mut session_keys = match family {
        ScpFamily::Scp01 => {
            derive_scp01_keys(&static_keys, &host_challenge, &init.card_challenge)?
        }
        ScpFamily::Scp02 => derive_scp02_keys(&static_keys, &init.sequence())?,
    };
    session_keys.set_version(init.key_version);

    // Both cryptograms use the session ENC key over the concatenated
    // challenges, zero ICV
    let mut challenges = [0u8; 16];
    challenges[..8].copy_from_slice(&host_challenge);
    challenges[8..].copy_from_slice(&init.card_challenge);
    let expected = mac_3des(session_keys.enc(), &challenges, &NULL_ICV);
    if !constant_time_eq(&expected, &init.card_cryptogram) {
        debug!("card cryptogram mismatch");
        return Err(Error::AuthenticationFailed);
    }

    challenges[..8].copy_from_slice(&init.card_challenge);
    challenges[8..].copy_from_slice(&host_challenge);
    let host_cryptogram = mac_3des(session_keys.enc(), &challenges, &NULL_ICV);

    // EXTERNAL AUTHENTICATE is itself MAC-wrapped at the minimum level
    let mut wrapper = SecureChannelWrapper::new(session_keys, variant, SecurityLevel::mac())?;
    let ext_auth = Command::new_with_data(
        cla::MAC,
        ins::EXTERNAL_AUTHENTICATE,
        security_level.bits(),
        0x00,
        host_cryptogram.to_vec(),
    );
    let wrapped = wrapper.wrap_command(&ext_auth)?;
    let response = transmit(transport, &wrapped)?;
    if !response.is_success() {
        debug!(status = %response.status(), "EXTERNAL AUTHENTICATE rejected");
        return Err(Error::AuthenticationFailed);
    }

    wrapper.set_security_level(security_level);
    if security_level.has_rmac() {
        wrapper.start_rmac_chain();
    }
    debug!(level = %security_level, "secure channel established");
    Ok(wrapper)
}

fn transmit<T: CardTransport>(transport: &mut T, command: &Command) -> Result<Response> {
    let raw = transport.transmit_raw(&command.to_bytes())?;
    Ok(Response::from_bytes(&raw)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::DEFAULT_KEY;
    use crate::crypto::mac_des_3des;
    use hex_literal::hex;
    use opengp_apdu_core::MockTransport;

    const HOST_CHALLENGE: [u8; 8] = hex!("00 01 02 03 04 05 06 07");

    /// Build a syntactically valid INITIALIZE UPDATE response for the
    /// default key set and compute its genuine cryptogram
    fn scripted_init_update(scp: u8, card_challenge: [u8; 8]) -> Vec<u8> {
        let mut data = vec![0u8; 28];
        data[10] = 0xFF; // key version
        data[11] = scp;
        data[12..20].copy_from_slice(&card_challenge);

        let static_keys = KeySet::default();
        let session = match scp {
            0x01 => derive_scp01_keys(&static_keys, &HOST_CHALLENGE, &card_challenge).unwrap(),
            _ => {
                let sequence = [card_challenge[0], card_challenge[1]];
                derive_scp02_keys(&static_keys, &sequence).unwrap()
            }
        };
        let mut challenges = [0u8; 16];
        challenges[..8].copy_from_slice(&HOST_CHALLENGE);
        challenges[8..].copy_from_slice(&card_challenge);
        let cryptogram = mac_3des(session.enc(), &challenges, &NULL_ICV);
        data[20..28].copy_from_slice(&cryptogram);

        data.push(0x90);
        data.push(0x00);
        data
    }

    fn open(
        transport: &mut MockTransport,
        variant: ScpVariant,
        level: SecurityLevel,
    ) -> Result<SecureChannelWrapper> {
        open_with_host_challenge(transport, &KeySet::default(), variant, level, HOST_CHALLENGE)
    }

    #[test]
    fn test_scp02_handshake_succeeds() {
        let card_challenge = hex!("00 01 C1 C2 C3 C4 C5 C6");
        let mut transport = MockTransport::new();
        transport.push_response(scripted_init_update(0x02, card_challenge));
        transport.push_response(vec![0x90, 0x00]);

        let wrapper = open(&mut transport, ScpVariant::Any, SecurityLevel::mac()).unwrap();
        assert_eq!(wrapper.variant(), ScpVariant::Scp02_15);
        assert!(wrapper.security_level().has_mac());

        // INITIALIZE UPDATE framing: 80 50 P1=version P2=id Lc=8 challenge Le
        let sent = &transport.transmitted()[0];
        assert_eq!(&sent[..5], &hex!("80 50 00 00 08"));
        assert_eq!(&sent[5..13], &HOST_CHALLENGE);

        // EXTERNAL AUTHENTICATE: MAC class, level bits in P1, 16 data bytes
        let sent = &transport.transmitted()[1];
        assert_eq!(&sent[..5], &hex!("84 82 01 00 10"));
    }

    #[test]
    fn test_scp02_external_authenticate_data() {
        // The EXTERNAL AUTHENTICATE payload starts with the host
        // cryptogram over card ‖ host challenges
        let card_challenge = hex!("00 01 C1 C2 C3 C4 C5 C6");
        let mut transport = MockTransport::new();
        transport.push_response(scripted_init_update(0x02, card_challenge));
        transport.push_response(vec![0x90, 0x00]);

        open(&mut transport, ScpVariant::Scp02_15, SecurityLevel::mac()).unwrap();

        let session = derive_scp02_keys(&KeySet::default(), &[0x00, 0x01]).unwrap();
        let mut challenges = [0u8; 16];
        challenges[..8].copy_from_slice(&card_challenge);
        challenges[8..].copy_from_slice(&HOST_CHALLENGE);
        let host_cryptogram = mac_3des(session.enc(), &challenges, &NULL_ICV);

        let sent = &transport.transmitted()[1];
        assert_eq!(&sent[5..13], &host_cryptogram);

        // and ends with the retail MAC over the whole command
        let mut mac_input = hex!("84 82 01 00 10").to_vec();
        mac_input.extend_from_slice(&host_cryptogram);
        let mac = mac_des_3des(session.mac(), &mac_input, &NULL_ICV);
        assert_eq!(&sent[13..21], &mac);
    }

    #[test]
    fn test_scp01_handshake_and_session_keys() {
        let card_challenge = hex!("C1 C2 C3 C4 C5 C6 C7 C8");
        let mut transport = MockTransport::new();
        transport.push_response(scripted_init_update(0x01, card_challenge));
        transport.push_response(vec![0x90, 0x00]);

        let wrapper = open(&mut transport, ScpVariant::Any, SecurityLevel::mac()).unwrap();
        assert_eq!(wrapper.variant(), ScpVariant::Scp01_05);

        // Session ENC is the ECB encryption of the derivation data under
        // the static ENC key
        let expected = Key::from_slice(&crypto::encrypt_3des_ecb(
            KeySet::default().enc(),
            &crypto::scp01_derivation_data(&HOST_CHALLENGE, &card_challenge),
        ))
        .unwrap();
        assert_eq!(wrapper.keys().enc(), &expected);
        assert!(wrapper.keys().rmac().is_none());
    }

    #[test]
    fn test_scp01_clears_rmac() {
        let card_challenge = hex!("C1 C2 C3 C4 C5 C6 C7 C8");
        let mut transport = MockTransport::new();
        transport.push_response(scripted_init_update(0x01, card_challenge));
        transport.push_response(vec![0x90, 0x00]);

        let wrapper = open(
            &mut transport,
            ScpVariant::Any,
            SecurityLevel::mac().with_rmac(),
        )
        .unwrap();
        assert!(!wrapper.security_level().has_rmac());
        // EXTERNAL AUTHENTICATE P1 carries only the MAC bit
        assert_eq!(transport.transmitted()[1][2], 0x01);
    }

    #[test]
    fn test_locked_states() {
        for sw in [[0x69, 0x82], [0x69, 0x83]] {
            let mut transport = MockTransport::new();
            transport.push_response(sw.to_vec());
            assert!(matches!(
                open(&mut transport, ScpVariant::Any, SecurityLevel::mac()),
                Err(Error::Locked)
            ));
        }
    }

    #[test]
    fn test_protocol_error_on_other_status() {
        let mut transport = MockTransport::new();
        transport.push_response(vec![0x6A, 0x88]);
        assert!(matches!(
            open(&mut transport, ScpVariant::Any, SecurityLevel::mac()),
            Err(Error::CardStatus(sw)) if sw.to_u16() == 0x6A88
        ));
    }

    #[test]
    fn test_malformed_init_update_length() {
        let mut transport = MockTransport::new();
        let mut short = vec![0u8; 20];
        short.extend_from_slice(&[0x90, 0x00]);
        transport.push_response(short);
        assert!(matches!(
            open(&mut transport, ScpVariant::Any, SecurityLevel::mac()),
            Err(Error::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_version_mismatch() {
        let card_challenge = hex!("00 01 C1 C2 C3 C4 C5 C6");
        let mut transport = MockTransport::new();
        transport.push_response(scripted_init_update(0x02, card_challenge));
        assert!(matches!(
            open(&mut transport, ScpVariant::Scp01_05, SecurityLevel::mac()),
            Err(Error::VersionMismatch {
                requested: 0x01,
                reported: 0x02
            })
        ));
    }

    #[test]
    fn test_key_mismatch() {
        let card_challenge = hex!("00 01 C1 C2 C3 C4 C5 C6");
        let mut transport = MockTransport::new();
        transport.push_response(scripted_init_update(0x02, card_challenge));

        let keys = KeySet::from_single(42, 0, Key::new(DEFAULT_KEY)).unwrap();
        let result = open_with_host_challenge(
            &mut transport,
            &keys,
            ScpVariant::Any,
            SecurityLevel::mac(),
            HOST_CHALLENGE,
        );
        // card reported version 0xFF
        assert!(matches!(
            result,
            Err(Error::KeyMismatch {
                expected: 42,
                reported: 0xFF
            })
        ));
    }

    #[test]
    fn test_bad_cryptogram_rejected() {
        let card_challenge = hex!("00 01 C1 C2 C3 C4 C5 C6");
        let mut data = scripted_init_update(0x02, card_challenge);
        data[20] ^= 0x01;
        let mut transport = MockTransport::new();
        transport.push_response(data);

        assert!(matches!(
            open(&mut transport, ScpVariant::Any, SecurityLevel::mac()),
            Err(Error::AuthenticationFailed)
        ));
    }

    #[test]
    fn test_external_authenticate_rejected() {
        let card_challenge = hex!("00 01 C1 C2 C3 C4 C5 C6");
        let mut transport = MockTransport::new();
        transport.push_response(scripted_init_update(0x02, card_challenge));
        transport.push_response(vec![0x69, 0x85]);

        assert!(matches!(
            open(&mut transport, ScpVariant::Any, SecurityLevel::mac()),
            Err(Error::AuthenticationFailed)
        ));
    }

    #[test]
    fn test_implicit_variant_rejected() {
        let mut transport = MockTransport::new();
        assert!(matches!(
            open(&mut transport, ScpVariant::Scp02_1A, SecurityLevel::mac()),
            Err(Error::InvalidArgument(_))
        ));
        // nothing was transmitted
        assert!(transport.transmitted().is_empty());
    }

    #[test]
    fn test_rmac_snapshot_after_authentication() {
        let card_challenge = hex!("00 01 C1 C2 C3 C4 C5 C6");
        let mut transport = MockTransport::new();
        transport.push_response(scripted_init_update(0x02, card_challenge));
        transport.push_response(vec![0x90, 0x00]);

        let wrapper = open(
            &mut transport,
            ScpVariant::Any,
            SecurityLevel::enc().with_rmac(),
        )
        .unwrap();
        assert!(wrapper.security_level().has_rmac());
        assert!(wrapper.keys().rmac().is_some());
    }
}
