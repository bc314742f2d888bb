//! SELECT command and FCI parsing

use opengp_apdu_core::Command;

use crate::aid::Aid;
use crate::constants::{cla, ins, tags};
use crate::tlv;
use crate::{Error, Result};

/// SELECT [by name]
#[derive(Debug)]
pub struct SelectCommand;

impl SelectCommand {
    /// SELECT with an explicit AID
    pub fn with_aid(aid: &[u8]) -> Command {
        Command::new_with_data_and_le(cla::ISO, ins::SELECT, 0x04, 0x00, aid.to_vec(), 0)
    }

    /// SELECT with an empty AID, yielding the default-selected
    /// application (normally the ISD)
    pub const fn default_applet() -> Command {
        Command::new_with_le(cla::ISO, ins::SELECT, 0x04, 0x00, 0)
    }
}

/// Extract the application AID from an FCI template returned by SELECT
pub fn aid_from_fci(data: &[u8]) -> Result<Aid> {
    let inner = tlv::skip_tag(data, 0, tags::FCI_TEMPLATE)
        .ok_or(Error::MalformedResponse("missing FCI template"))?;
    let aid = tlv::find_value(data, inner, tags::AID)
        .ok_or(Error::MalformedResponse("missing AID in FCI"))?;
    Aid::try_from(aid)
}
