//! GlobalPlatform card management
//!
//! [`GlobalPlatform`] owns the transport and at most one live secure
//! channel wrapper. Every command funnels through
//! [`transmit`](GlobalPlatform::transmit), which wraps outbound APDUs and
//! verifies inbound response MACs when a channel is open.

use bytes::Bytes;
use opengp_apdu_core::{CardTransport, Command, Response};
use tracing::{debug, warn};

use crate::aid::Aid;
use crate::commands::select::aid_from_fci;
use crate::commands::{
    DeleteCommand, GetStatusCommand, InstallCommand, LoadCommand, SelectCommand,
};
use crate::constants::{KNOWN_SD_AIDS, cla, get_status_p1, ins, status};
use crate::keys::KeySet;
use crate::load::{CapFile, LoadCommandStream};
use crate::registry::AidRegistry;
use crate::scp::{ScpVariant, SecurityLevel};
use crate::session;
use crate::wrapper::SecureChannelWrapper;
use crate::{Error, Result};

/// Progress callback for CAP loading: `(blocks_sent, blocks_total)`
pub type LoadCallback<'a> = &'a mut dyn FnMut(usize, usize) -> Result<()>;

/// GlobalPlatform card management session over one transport
pub struct GlobalPlatform<T: CardTransport> {
    transport: T,
    wrapper: Option<SecureChannelWrapper>,
    sd_aid: Option<Aid>,
    strict: bool,
}

impl<T: CardTransport> std::fmt::Debug for GlobalPlatform<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlobalPlatform")
            .field("sd_aid", &self.sd_aid)
            .field("secure_channel", &self.wrapper.is_some())
            .finish()
    }
}

impl<T: CardTransport> GlobalPlatform<T> {
    /// Create a manager over a connected transport
    pub const fn new(transport: T) -> Self {
        Self {
            transport,
            wrapper: None,
            sd_aid: None,
            strict: false,
        }
    }

    /// Treat recoverable selection warnings (unfused or locked cards) as
    /// errors
    pub const fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// The transport
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    /// Mutable access to the transport.
    ///
    /// Bypassing [`transmit`](Self::transmit) while a secure channel is
    /// open desynchronizes the MAC chains.
    pub const fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// The selected Security Domain, once discovery succeeded
    pub const fn security_domain(&self) -> Option<&Aid> {
        self.sd_aid.as_ref()
    }

    /// Whether a secure channel is open
    pub const fn is_secure_channel_open(&self) -> bool {
        self.wrapper.is_some()
    }

    /// The security level of the open channel
    pub fn security_level(&self) -> SecurityLevel {
        self.wrapper
            .as_ref()
            .map_or(SecurityLevel::none(), SecureChannelWrapper::security_level)
    }

    /// Send one command through the secure channel if present.
    ///
    /// A transport error leaves the MAC chains unusable; the channel is
    /// torn down and must be re-established.
    pub fn transmit(&mut self, command: &Command) -> Result<Response> {
        let on_wire = match &mut self.wrapper {
            Some(wrapper) => wrapper.wrap_command(command)?,
            None => command.clone(),
        };
        let raw = match self.transport.transmit_raw(&on_wire.to_bytes()) {
            Ok(raw) => raw,
            Err(err) => {
                self.wrapper = None;
                return Err(err.into());
            }
        };
        let response = Response::from_bytes(&raw)?;
        match &mut self.wrapper {
            Some(wrapper) => wrapper.unwrap_response(response),
            None => Ok(response),
        }
    }

    /// Transmit and demand a 0x9000 status
    fn transmit_checked(&mut self, command: &Command) -> Result<Response> {
        let response = self.transmit(command)?;
        if !response.is_success() {
            return Err(Error::card_status(response.status()));
        }
        Ok(response)
    }

    /// Select the Security Domain: first by empty AID, then through the
    /// catalog of well-known AIDs.
    ///
    /// When `expected` is given and the card reports something else, a
    /// warning is logged.
    pub fn select_security_domain(&mut self, expected: Option<&Aid>) -> Result<Aid> {
        let response = self.transmit(&SelectCommand::default_applet())?;

        match response.status().to_u16() {
            status::SW_NO_ERROR => {}
            status::SW_FILE_NOT_FOUND => {
                if self.strict {
                    return Err(Error::card_status(response.status()));
                }
                warn!("default selection failed; card may be unfused");
                return self.select_from_catalog();
            }
            status::SW_CARD_LOCKED => {
                if self.strict {
                    return Err(Error::card_status(response.status()));
                }
                warn!("selected security domain is locked");
            }
            sw => return Err(Error::card_status(sw)),
        }

        let aid = aid_from_fci(response.data())?;
        if let Some(expected) = expected {
            if expected != &aid {
                warn!(%expected, selected = %aid, "card selected an unexpected security domain");
            }
        }
        debug!(%aid, "security domain selected");
        self.sd_aid = Some(aid.clone());
        Ok(aid)
    }

    fn select_from_catalog(&mut self) -> Result<Aid> {
        for candidate in KNOWN_SD_AIDS {
            let response = self.transmit(&SelectCommand::with_aid(candidate))?;
            if response.is_success() {
                let aid = aid_from_fci(response.data()).or_else(|_| Aid::try_from(*candidate))?;
                debug!(%aid, "security domain selected from catalog");
                self.sd_aid = Some(aid.clone());
                return Ok(aid);
            }
        }
        Err(Error::NoSecurityDomain)
    }

    /// Open a secure channel against the selected Security Domain
    pub fn open_secure_channel(
        &mut self,
        keys: &KeySet,
        variant: ScpVariant,
        security_level: SecurityLevel,
    ) -> Result<()> {
        // a previous channel cannot survive the new handshake
        self.wrapper = None;
        let wrapper =
            session::open_secure_channel(&mut self.transport, keys, variant, security_level)?;
        self.wrapper = Some(wrapper);
        Ok(())
    }

    /// Drop the secure channel
    pub fn close_secure_channel(&mut self) {
        self.wrapper = None;
    }

    /// Delete an object by AID
    pub fn delete_object(&mut self, aid: &Aid, delete_related: bool) -> Result<()> {
        let cmd = if delete_related {
            DeleteCommand::delete_object_and_related(aid.as_bytes())
        } else {
            DeleteCommand::delete_object(aid.as_bytes())
        };
        self.transmit_checked(&cmd)?;
        Ok(())
    }

    /// INSTALL [for load] announcing `package_aid` to the selected SD
    pub fn install_for_load(
        &mut self,
        package_aid: &Aid,
        hash: &[u8],
        load_params: &[u8],
    ) -> Result<()> {
        let sd = self
            .sd_aid
            .clone()
            .ok_or(Error::InvalidArgument("no security domain selected"))?;
        let cmd = InstallCommand::for_load(package_aid.as_bytes(), sd.as_bytes(), hash, load_params);
        self.transmit_checked(&cmd)?;
        Ok(())
    }

    /// Send every LOAD block of a stream
    pub fn load_stream(
        &mut self,
        stream: &mut LoadCommandStream,
        mut callback: Option<LoadCallback<'_>>,
    ) -> Result<()> {
        while let Some((is_last, number, block)) = stream.next_block() {
            let cmd = LoadCommand::with_block_data(is_last, number, block.to_vec());
            self.transmit_checked(&cmd)?;
            if let Some(cb) = callback.as_mut() {
                cb(stream.current_block(), stream.blocks_count())?;
            }
        }
        Ok(())
    }

    /// INSTALL [for load] plus the LOAD sequence for a whole CAP file
    pub fn load_cap_file<C: CapFile>(
        &mut self,
        cap: &C,
        callback: Option<LoadCallback<'_>>,
    ) -> Result<()> {
        let package_aid = cap
            .package_aid()
            .ok_or(Error::CapFile("package AID not found"))?
            .clone();
        let hash = cap.load_file_data_hash(false);
        self.install_for_load(&package_aid, &hash, &[])?;
        let mut stream = LoadCommandStream::from_cap_file(cap);
        self.load_stream(&mut stream, callback)
    }

    /// INSTALL [for install and make selectable] for an applet instance.
    ///
    /// `instance_aid` defaults to the applet AID, parameters are
    /// C9-wrapped, and no token is sent.
    pub fn install_and_make_selectable(
        &mut self,
        package_aid: &Aid,
        applet_aid: &Aid,
        instance_aid: Option<&Aid>,
        privileges: u8,
        params: &[u8],
    ) -> Result<()> {
        let instance = instance_aid.unwrap_or(applet_aid);
        let cmd = InstallCommand::for_install_and_make_selectable(
            package_aid.as_bytes(),
            applet_aid.as_bytes(),
            instance.as_bytes(),
            &[privileges],
            &crate::commands::install::application_parameters(params),
            &[],
        );
        self.transmit_checked(&cmd)?;
        Ok(())
    }

    /// Make an installed application the default selected one
    pub fn make_default_selected(&mut self, instance_aid: &Aid, privileges: u8) -> Result<()> {
        let cmd = InstallCommand::for_make_default_selected(instance_aid.as_bytes(), privileges);
        self.transmit_checked(&cmd)?;
        Ok(())
    }

    /// Walk every GET STATUS subset into a registry snapshot
    pub fn registry(&mut self) -> Result<AidRegistry> {
        let mut registry = AidRegistry::new();

        let mut load_files_with_modules = false;
        for p1 in [
            get_status_p1::ISD,
            get_status_p1::APPLICATIONS,
            get_status_p1::EXEC_LOAD_FILES_AND_MODULES,
            get_status_p1::EXEC_LOAD_FILES,
        ] {
            if p1 == get_status_p1::EXEC_LOAD_FILES && load_files_with_modules {
                continue;
            }
            match self.get_status_records(p1) {
                Ok(data) => {
                    registry.parse_records(p1, &data)?;
                    if p1 == get_status_p1::EXEC_LOAD_FILES_AND_MODULES {
                        load_files_with_modules = true;
                    }
                }
                // cards without module support answer the combined query
                // with an error; fall through to the plain subset
                Err(Error::CardStatus(_)) if p1 == get_status_p1::EXEC_LOAD_FILES_AND_MODULES => {}
                Err(err) => return Err(err),
            }
        }
        Ok(registry)
    }

    /// One GET STATUS subset, following 0x6310 pagination
    fn get_status_records(&mut self, p1: u8) -> Result<Vec<u8>> {
        let mut records = Vec::new();
        let mut response = self.transmit(&GetStatusCommand::all_with_type(p1))?;

        loop {
            match response.status().to_u16() {
                status::SW_NO_ERROR => {
                    records.extend_from_slice(response.data());
                    return Ok(records);
                }
                status::SW_MORE_DATA_AVAILABLE => {
                    records.extend_from_slice(response.data());
                    response = self.transmit(&GetStatusCommand::next(p1))?;
                }
                // an empty subset is not an error
                status::SW_REFERENCED_DATA_NOT_FOUND => return Ok(records),
                sw => return Err(Error::card_status(sw)),
            }
        }
    }

    /// GET DATA for the card recognition data
    pub fn get_card_data(&mut self) -> Result<Bytes> {
        let cmd = Command::new_with_le(cla::GP, ins::GET_DATA, 0x00, 0x66, 0);
        let response = self.transmit_checked(&cmd)?;
        Ok(Bytes::copy_from_slice(response.data()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;
    use opengp_apdu_core::MockTransport;

    fn fci_response() -> Vec<u8> {
        hex!("6F 10 84 0A A0 00 00 01 51 00 00 00 00 00 A5 02 9F 65 01 FF 90 00").to_vec()
    }

    #[test]
    fn test_select_security_domain_by_default() {
        let mut transport = MockTransport::new();
        transport.push_response(fci_response());
        let mut gp = GlobalPlatform::new(transport);

        let aid = gp.select_security_domain(None).unwrap();
        assert_eq!(aid.as_bytes(), &hex!("A0 00 00 01 51 00 00 00 00 00"));
        assert_eq!(gp.security_domain(), Some(&aid));
    }

    #[test]
    fn test_select_falls_back_to_catalog_when_unfused() {
        let mut transport = MockTransport::new();
        transport.push_response(hex!("6A 82").to_vec());
        transport.push_response(fci_response());
        let mut gp = GlobalPlatform::new(transport);

        let aid = gp.select_security_domain(None).unwrap();
        assert_eq!(aid.as_bytes(), &hex!("A0 00 00 01 51 00 00 00 00 00"));

        // the second SELECT carried the first catalog AID
        let sent = &gp.transport().transmitted()[1];
        assert_eq!(
            sent.as_ref(),
            &hex!("00 A4 04 00 08 A0 00 00 01 51 00 00 00 00")
        );
    }

    #[test]
    fn test_select_strict_mode_rejects_unfused() {
        let mut transport = MockTransport::new();
        transport.push_response(hex!("6A 82").to_vec());
        let mut gp = GlobalPlatform::new(transport).with_strict(true);
        assert!(matches!(
            gp.select_security_domain(None),
            Err(Error::CardStatus(sw)) if sw.to_u16() == 0x6A82
        ));
    }

    #[test]
    fn test_select_exhausted_catalog() {
        let mut transport = MockTransport::new();
        transport.push_response(hex!("6A 82").to_vec());
        let mut gp = GlobalPlatform::new(transport);
        assert!(matches!(
            gp.select_security_domain(None),
            Err(Error::NoSecurityDomain)
        ));
    }

    #[test]
    fn test_locked_card_still_selects() {
        let mut transport = MockTransport::new();
        let mut locked = fci_response();
        let n = locked.len();
        locked[n - 2..].copy_from_slice(&[0x62, 0x83]);
        transport.push_response(locked);
        let mut gp = GlobalPlatform::new(transport);
        assert!(gp.select_security_domain(None).is_ok());
    }

    #[test]
    fn test_get_status_pagination_concatenates() {
        let mut transport = MockTransport::new();
        // ISD subset in four chunks, 0x6310 between them
        transport.push_response(hex!("08 A0 00 00 01 51 00 63 10").to_vec());
        transport.push_response(hex!("00 00 63 10").to_vec());
        transport.push_response(hex!("0F 63 10").to_vec());
        transport.push_response(hex!("9E 90 00").to_vec());
        // remaining subsets are empty
        transport.push_response(hex!("6A 88").to_vec());

        let mut gp = GlobalPlatform::new(transport);
        let registry = gp.registry().unwrap();

        assert_eq!(registry.len(), 1);
        let entry = &registry.entries()[0];
        assert_eq!(entry.aid.as_bytes(), &hex!("A0 00 00 01 51 00 00 00"));
        assert_eq!(entry.life_cycle, 0x0F);
        assert_eq!(entry.privileges, 0x9E);

        // pagination re-issued with P2=01
        let sent = gp.transport().transmitted();
        assert_eq!(sent[1][3], 0x01);
        assert_eq!(sent[2][3], 0x01);
        assert_eq!(sent[3][3], 0x01);
    }

    #[test]
    fn test_registry_skips_plain_load_files_when_modules_answered() {
        let mut transport = MockTransport::new();
        transport.push_response(hex!("6A 88").to_vec()); // ISD empty
        transport.push_response(hex!("6A 88").to_vec()); // apps empty
        // load files with modules: one entry, no modules
        transport.push_response(hex!("09 A0 00 00 00 62 03 01 0C 01 01 00 00 90 00").to_vec());
        let mut gp = GlobalPlatform::new(transport);

        let registry = gp.registry().unwrap();
        assert_eq!(registry.len(), 1);
        // only three GET STATUS commands went out
        assert_eq!(gp.transport().transmitted().len(), 3);
    }

    #[test]
    fn test_registry_falls_back_to_plain_load_files() {
        let mut transport = MockTransport::new();
        transport.push_response(hex!("6A 88").to_vec()); // ISD empty
        transport.push_response(hex!("6A 88").to_vec()); // apps empty
        transport.push_response(hex!("6A 81").to_vec()); // combined query unsupported
        transport.push_response(hex!("09 A0 00 00 00 62 03 01 0C 01 01 00 90 00").to_vec());
        let mut gp = GlobalPlatform::new(transport);

        let registry = gp.registry().unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.entries()[0].kind,
            crate::registry::AppKind::ExecutableLoadFiles
        );
    }

    #[test]
    fn test_delete_frames_and_checks_status() {
        let mut transport = MockTransport::new();
        transport.push_response(hex!("90 00").to_vec());
        let mut gp = GlobalPlatform::new(transport);

        let aid = Aid::try_from(&hex!("A0 00 00 00 62 03 01 08 01")[..]).unwrap();
        gp.delete_object(&aid, true).unwrap();
        assert_eq!(
            gp.transport().transmitted()[0].as_ref(),
            &hex!("80 E4 00 80 0B 4F 09 A0 00 00 00 62 03 01 08 01")
        );
    }

    #[test]
    fn test_delete_propagates_card_error() {
        let mut transport = MockTransport::new();
        transport.push_response(hex!("6A 88").to_vec());
        let mut gp = GlobalPlatform::new(transport);
        let aid = Aid::try_from(&hex!("A0 00 00 00 62 03 01 08 01")[..]).unwrap();
        assert!(matches!(
            gp.delete_object(&aid, false),
            Err(Error::CardStatus(sw)) if sw.to_u16() == 0x6A88
        ));
    }

    #[test]
    fn test_install_for_load_requires_selected_sd() {
        let mut transport = MockTransport::new();
        transport.push_response(hex!("90 00").to_vec());
        let mut gp = GlobalPlatform::new(transport);
        let pkg = Aid::try_from(&hex!("A0 00 00 00 62 03 01 08 01")[..]).unwrap();
        assert!(matches!(
            gp.install_for_load(&pkg, &[], &[]),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_install_for_load_payload() {
        let mut transport = MockTransport::new();
        transport.push_response(fci_response());
        transport.push_response(hex!("90 00").to_vec());
        let mut gp = GlobalPlatform::new(transport);
        gp.select_security_domain(None).unwrap();

        let pkg = Aid::try_from(&hex!("A0 00 00 00 62 03 01 08 01")[..]).unwrap();
        gp.install_for_load(&pkg, &[], &[]).unwrap();

        let sent = &gp.transport().transmitted()[1];
        // INSTALL [for load] toward the selected SD
        assert_eq!(&sent[..5], &hex!("80 E6 02 00 18"));
        assert_eq!(
            &sent[5..15],
            &hex!("09 A0 00 00 00 62 03 01 08 01")
        );
    }

    #[test]
    fn test_load_stream_issues_numbered_blocks() {
        let mut transport = MockTransport::new();
        transport.push_response(hex!("90 00").to_vec());
        let mut gp = GlobalPlatform::new(transport);

        let image = vec![0x42; 60];
        let mut stream = LoadCommandStream::from_image(&image, 32);
        let mut progress = Vec::new();
        let mut callback = |done: usize, total: usize| {
            progress.push((done, total));
            Ok(())
        };
        gp.load_stream(&mut stream, Some(&mut callback)).unwrap();

        let sent = gp.transport().transmitted();
        assert_eq!(sent.len(), 2);
        // first block: more blocks follow, number 0
        assert_eq!(&sent[0][..4], &hex!("80 E8 00 00"));
        // last block: final marker, number 1
        assert_eq!(&sent[1][..4], &hex!("80 E8 80 01"));
        assert_eq!(progress, vec![(1, 2), (2, 2)]);
    }
}
