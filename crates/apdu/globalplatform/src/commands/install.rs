//! INSTALL command payload builders

use bytes::{BufMut, BytesMut};
use opengp_apdu_core::Command;

use crate::constants::{cla, ins, install_p1, tags};

/// INSTALL in its [for load], [for install] and [for make selectable]
/// forms
#[derive(Debug)]
pub struct InstallCommand;

impl InstallCommand {
    /// INSTALL [for load]: announce a load file before the LOAD sequence.
    ///
    /// `hash` is the optional load-file-data-block hash; `load_params` the
    /// optional system parameters (see [`load_parameters`]).
    pub fn for_load(
        package_aid: &[u8],
        sd_aid: &[u8],
        hash: &[u8],
        load_params: &[u8],
    ) -> Command {
        let mut payload = BytesMut::new();
        put_lv(&mut payload, package_aid);
        put_lv(&mut payload, sd_aid);
        put_lv(&mut payload, hash);
        put_lv(&mut payload, load_params);
        payload.put_u8(0x00); // no load token
        Command::new_with_data_and_le(
            cla::GP,
            ins::INSTALL,
            install_p1::FOR_LOAD,
            0x00,
            payload.freeze(),
            0,
        )
    }

    /// INSTALL [for install and make selectable] for an applet instance.
    ///
    /// `privileges` is the raw privileges field (normally one byte);
    /// `params` the application parameters, C9-wrapped by
    /// [`application_parameters`]; `token` the install token (empty
    /// without delegated management).
    pub fn for_install_and_make_selectable(
        package_aid: &[u8],
        applet_aid: &[u8],
        instance_aid: &[u8],
        privileges: &[u8],
        params: &[u8],
        token: &[u8],
    ) -> Command {
        let mut payload = BytesMut::new();
        put_lv(&mut payload, package_aid);
        put_lv(&mut payload, applet_aid);
        put_lv(&mut payload, instance_aid);
        put_lv(&mut payload, privileges);
        put_lv(&mut payload, params);
        put_lv(&mut payload, token);
        Command::new_with_data_and_le(
            cla::GP,
            ins::INSTALL,
            install_p1::FOR_INSTALL_AND_MAKE_SELECTABLE,
            0x00,
            payload.freeze(),
            0,
        )
    }

    /// INSTALL [for make selectable]: make an already-installed
    /// application the default selected one
    pub fn for_make_default_selected(instance_aid: &[u8], privileges: u8) -> Command {
        let mut payload = BytesMut::new();
        payload.put_u8(0x00);
        payload.put_u8(0x00);
        put_lv(&mut payload, instance_aid);
        payload.put_u8(0x01);
        payload.put_u8(privileges);
        payload.put_u8(0x00);
        payload.put_u8(0x00);
        Command::new_with_data_and_le(
            cla::GP,
            ins::INSTALL,
            install_p1::FOR_MAKE_SELECTABLE,
            0x00,
            payload.freeze(),
            0,
        )
    }
}

/// The load parameter field announcing the non-volatile code size:
/// `EF 04 C6 02 <len:u16-be>`
pub fn load_parameters(code_length: u16) -> [u8; 6] {
    let len = code_length.to_be_bytes();
    [
        tags::LOAD_PARAMETERS,
        0x04,
        tags::CODE_SIZE,
        0x02,
        len[0],
        len[1],
    ]
}

/// C9-wrap raw application parameters; empty input becomes `C9 00`
pub fn application_parameters(params: &[u8]) -> Vec<u8> {
    let mut wrapped = Vec::with_capacity(2 + params.len());
    wrapped.push(0xC9);
    wrapped.push(params.len() as u8);
    wrapped.extend_from_slice(params);
    wrapped
}

fn put_lv(buf: &mut BytesMut, value: &[u8]) {
    buf.put_u8(value.len() as u8);
    buf.put_slice(value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn test_for_load_payload() {
        let cmd = InstallCommand::for_load(
            &hex!("A0 00 00 00 62 03 01 08 01"),
            &hex!("A0 00 00 00 03 00 00 00"),
            &[],
            &[],
        );
        assert_eq!(cmd.class(), 0x80);
        assert_eq!(cmd.instruction(), 0xE6);
        assert_eq!(cmd.p1(), 0x02);
        assert_eq!(
            cmd.data().unwrap(),
            &hex!("09 A0 00 00 00 62 03 01 08 01 08 A0 00 00 00 03 00 00 00 00 00 00")
        );
    }

    #[test]
    fn test_for_load_with_parameters() {
        let params = load_parameters(0x1234);
        assert_eq!(params, hex!("EF 04 C6 02 12 34"));

        let cmd = InstallCommand::for_load(
            &hex!("A0 00 00 00 62 03 01 08 01"),
            &hex!("A0 00 00 00 03 00 00 00"),
            &[],
            &params,
        );
        let data = cmd.data().unwrap();
        // params field sits before the trailing token length
        assert_eq!(&data[20..27], &hex!("06 EF 04 C6 02 12 34"));
        assert_eq!(data[27], 0x00);
    }

    #[test]
    fn test_for_install_and_make_selectable_payload() {
        let applet = hex!("A0 00 00 00 62 03 01 0C 01 01");
        let cmd = InstallCommand::for_install_and_make_selectable(
            &hex!("A0 00 00 00 62 03 01 0C 01"),
            &applet,
            &applet,
            &[0x00],
            &application_parameters(&[]),
            &[],
        );
        assert_eq!(cmd.p1(), 0x0C);
        let mut expected = Vec::new();
        expected.extend_from_slice(&hex!("09 A0 00 00 00 62 03 01 0C 01"));
        expected.extend_from_slice(&hex!("0A A0 00 00 00 62 03 01 0C 01 01"));
        expected.extend_from_slice(&hex!("0A A0 00 00 00 62 03 01 0C 01 01"));
        expected.extend_from_slice(&hex!("01 00"));
        expected.extend_from_slice(&hex!("02 C9 00"));
        expected.extend_from_slice(&hex!("00"));
        assert_eq!(cmd.data().unwrap(), expected.as_slice());
    }

    #[test]
    fn test_make_default_selected_payload() {
        let cmd =
            InstallCommand::for_make_default_selected(&hex!("A0 00 00 00 62 03 01 0C 01"), 0x04);
        assert_eq!(cmd.p1(), 0x08);
        assert_eq!(
            cmd.data().unwrap(),
            &hex!("00 00 09 A0 00 00 00 62 03 01 0C 01 01 04 00 00")
        );
    }

    #[test]
    fn test_application_parameters_wrapping() {
        assert_eq!(application_parameters(&[]), hex!("C9 00"));
        assert_eq!(
            application_parameters(&hex!("01 02")),
            hex!("C9 02 01 02")
        );
    }
}
