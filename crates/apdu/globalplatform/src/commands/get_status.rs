//! GET STATUS command builder

use opengp_apdu_core::Command;

use crate::constants::{cla, get_status_p2, ins, tags};

/// GET STATUS for one registry subset
#[derive(Debug)]
pub struct GetStatusCommand;

impl GetStatusCommand {
    /// First GET STATUS for the subset selected by `p1`, matching every
    /// AID
    pub fn all_with_type(p1: u8) -> Command {
        Self::build(p1, get_status_p2::FIRST)
    }

    /// Continuation command after a 0x6310 status
    pub fn next(p1: u8) -> Command {
        Self::build(p1, get_status_p2::NEXT)
    }

    fn build(p1: u8, p2: u8) -> Command {
        // 4F 00: match any AID
        Command::new_with_data_and_le(
            cla::GP,
            ins::GET_STATUS,
            p1,
            p2,
            vec![tags::AID_FILTER, 0x00],
            0,
        )
    }
}
