//! DELETE command builders

use bytes::{BufMut, BytesMut};
use opengp_apdu_core::Command;

use crate::constants::{cla, delete_p2, ins, tags};

/// DELETE [card content]
#[derive(Debug)]
pub struct DeleteCommand;

impl DeleteCommand {
    /// Delete the object named by `aid`
    pub fn delete_object(aid: &[u8]) -> Command {
        Self::build(aid, delete_p2::OBJECT)
    }

    /// Delete the object named by `aid` and everything related to it
    pub fn delete_object_and_related(aid: &[u8]) -> Command {
        Self::build(aid, delete_p2::OBJECT_AND_RELATED)
    }

    fn build(aid: &[u8], p2: u8) -> Command {
        let mut payload = BytesMut::with_capacity(2 + aid.len());
        payload.put_u8(tags::DELETE_AID);
        payload.put_u8(aid.len() as u8);
        payload.put_slice(aid);
        Command::new_with_data(cla::GP, ins::DELETE, 0x00, p2, payload.freeze())
    }
}
