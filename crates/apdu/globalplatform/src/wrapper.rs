//! Per-session secure channel wrapper
//!
//! A [`SecureChannelWrapper`] owns the session keys and both MAC chains of
//! one secure channel. Every outbound command passes through
//! [`wrap_command`](SecureChannelWrapper::wrap_command) and every inbound
//! response through
//! [`unwrap_response`](SecureChannelWrapper::unwrap_response); the chained
//! ICVs encode the command order, so any reordering or loss surfaces as an
//! authentication failure.

use bytes::{BufMut, BytesMut};
use opengp_apdu_core::{Command, Response};
use tracing::trace;

use crate::crypto::{
    self, MAC_LEN, NULL_ICV, constant_time_eq, encrypt_3des_ecb, encrypt_des_ecb_block, mac_3des,
    mac_des_3des,
};
use crate::keys::KeySet;
use crate::scp::{ScpFamily, ScpFlags, ScpVariant, SecurityLevel};
use crate::{Error, Result};

/// Secure channel state machine for one session
pub struct SecureChannelWrapper {
    keys: KeySet,
    variant: ScpVariant,
    flags: ScpFlags,
    security_level: SecurityLevel,
    /// Command MAC chaining vector
    icv: [u8; MAC_LEN],
    /// Response MAC chaining vector
    ricv: [u8; MAC_LEN],
    /// Running R-MAC input; grows for the lifetime of the session
    rmac_stream: BytesMut,
    /// True once a command has been wrapped on this channel
    chained: bool,
}

impl std::fmt::Debug for SecureChannelWrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureChannelWrapper")
            .field("variant", &self.variant)
            .field("security_level", &self.security_level)
            .finish()
    }
}

impl SecureChannelWrapper {
    /// Create a wrapper over freshly derived session keys
    pub fn new(keys: KeySet, variant: ScpVariant, security_level: SecurityLevel) -> Result<Self> {
        let flags = variant
            .flags()
            .ok_or(Error::InvalidArgument("SCP variant must be concrete"))?;
        if security_level.has_rmac() {
            if matches!(flags.family, ScpFamily::Scp01) {
                return Err(Error::InvalidArgument("RMAC is not defined for SCP01"));
            }
            if keys.rmac().is_none() {
                return Err(Error::InvalidArgument("session key set lacks an RMAC key"));
            }
        }
        Ok(Self {
            keys,
            variant,
            flags,
            security_level,
            icv: NULL_ICV,
            ricv: NULL_ICV,
            rmac_stream: BytesMut::new(),
            chained: false,
        })
    }

    /// The active security level
    pub const fn security_level(&self) -> SecurityLevel {
        self.security_level
    }

    /// The negotiated SCP variant
    pub const fn variant(&self) -> ScpVariant {
        self.variant
    }

    /// The session key set
    pub const fn keys(&self) -> &KeySet {
        &self.keys
    }

    pub(crate) const fn set_security_level(&mut self, security_level: SecurityLevel) {
        self.security_level = security_level;
    }

    /// Seed the response MAC chain from the current command MAC chain.
    /// Done once, right after EXTERNAL AUTHENTICATE.
    pub(crate) fn start_rmac_chain(&mut self) {
        self.ricv = self.icv;
    }

    /// Maximum command data length under the active security level
    pub const fn max_data_len(&self) -> usize {
        let mut max = 255;
        if self.security_level.has_mac() {
            max -= MAC_LEN;
        }
        if self.security_level.has_enc() {
            max -= MAC_LEN;
        }
        max
    }

    /// Apply MAC and encryption to an outbound command
    pub fn wrap_command(&mut self, command: &Command) -> Result<Command> {
        let data = command.data().unwrap_or(&[]);
        let max = self.max_data_len();
        if data.len() > max {
            return Err(Error::TooLong {
                len: data.len(),
                max,
            });
        }

        // The response MAC covers the command as the caller issued it
        if self.security_level.has_rmac() {
            self.rmac_stream.put_u8(command.class() & !0x07);
            self.rmac_stream.put_u8(command.instruction());
            self.rmac_stream.put_u8(command.p1());
            self.rmac_stream.put_u8(command.p2());
            if !data.is_empty() {
                self.rmac_stream.put_u8(data.len() as u8);
                self.rmac_stream.put_slice(data);
            }
        }

        if !self.security_level.has_mac() {
            return Ok(command.clone());
        }

        // Re-encrypt the chaining vector between commands when the variant
        // asks for it
        if self.flags.icv_encrypt && self.chained {
            self.icv = match self.flags.family {
                ScpFamily::Scp01 => {
                    let block = encrypt_3des_ecb(self.keys.mac(), &self.icv);
                    block.as_slice().try_into().expect("one block")
                }
                ScpFamily::Scp02 => {
                    encrypt_des_ecb_block(&self.keys.mac().as_des(), &self.icv)
                }
            };
        }

        let mut cla = command.class();
        let (mac_cla, mac_lc) = if self.flags.pre_mac {
            (cla | 0x04, data.len() as u8 + MAC_LEN as u8)
        } else {
            (cla, data.len() as u8)
        };

        let mut mac_input = Vec::with_capacity(5 + data.len());
        mac_input.push(mac_cla);
        mac_input.push(command.instruction());
        mac_input.push(command.p1());
        mac_input.push(command.p2());
        mac_input.push(mac_lc);
        mac_input.extend_from_slice(data);

        self.icv = match self.flags.family {
            ScpFamily::Scp01 => mac_3des(self.keys.mac(), &mac_input, &self.icv),
            ScpFamily::Scp02 => mac_des_3des(self.keys.mac(), &mac_input, &self.icv),
        };
        cla |= 0x04;

        // Encryption covers the original data; the MAC was computed first
        let mut body = if self.security_level.has_enc() && !data.is_empty() {
            match self.flags.family {
                ScpFamily::Scp01 => {
                    let mut plain = Vec::with_capacity(1 + data.len());
                    plain.push(data.len() as u8);
                    plain.extend_from_slice(data);
                    crypto::encrypt_3des_cbc(self.keys.enc(), &crypto::pad80(&plain))
                }
                ScpFamily::Scp02 => {
                    crypto::encrypt_3des_cbc(self.keys.enc(), &crypto::pad80(data))
                }
            }
        } else {
            data.to_vec()
        };
        body.extend_from_slice(&self.icv);

        self.chained = true;
        trace!(
            variant = %self.variant,
            lc = body.len(),
            "wrapped {:02X}{:02X}",
            cla,
            command.instruction()
        );

        let mut wrapped = Command::new_with_data(
            cla,
            command.instruction(),
            command.p1(),
            command.p2(),
            body,
        );
        if let Some(le) = command.expected_length() {
            wrapped = wrapped.with_le(le);
        }
        Ok(wrapped)
    }

    /// Verify and strip the response MAC from an inbound response
    pub fn unwrap_response(&mut self, response: Response) -> Result<Response> {
        if !self.security_level.has_rmac() {
            return Ok(response);
        }
        let rmac_key = self
            .keys
            .rmac()
            .ok_or(Error::InvalidArgument("session key set lacks an RMAC key"))?
            .clone();

        let data = response.data();
        if data.len() < MAC_LEN {
            return Err(Error::MalformedResponse("response too short for an R-MAC"));
        }
        let body_len = data.len() - MAC_LEN;
        let status = response.status();

        self.rmac_stream.put_u8(body_len as u8);
        self.rmac_stream.put_slice(&data[..body_len]);
        self.rmac_stream.put_u8(status.sw1);
        self.rmac_stream.put_u8(status.sw2);

        self.ricv = mac_des_3des(&rmac_key, &self.rmac_stream, &self.ricv);
        if !constant_time_eq(&self.ricv, &data[body_len..]) {
            return Err(Error::RMacInvalid);
        }

        let payload = (body_len > 0).then(|| bytes::Bytes::copy_from_slice(&data[..body_len]));
        Ok(Response::new(payload, status))
    }
}
