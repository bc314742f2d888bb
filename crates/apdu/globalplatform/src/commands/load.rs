//! LOAD command builder

use opengp_apdu_core::Command;

use crate::constants::{cla, ins, load_p1};

/// LOAD one block of a load file
#[derive(Debug)]
pub struct LoadCommand;

impl LoadCommand {
    /// Build a LOAD command for block `block_number`
    pub fn with_block_data(is_last: bool, block_number: u8, data: Vec<u8>) -> Command {
        let p1 = if is_last {
            load_p1::LAST_BLOCK
        } else {
            load_p1::MORE_BLOCKS
        };
        Command::new_with_data(cla::GP, ins::LOAD, p1, block_number, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_block_framing() {
        let cmd = LoadCommand::with_block_data(false, 3, vec![0xC4, 0x01, 0xAA]);
        assert_eq!(cmd.class(), 0x80);
        assert_eq!(cmd.instruction(), 0xE8);
        assert_eq!(cmd.p1(), 0x00);
        assert_eq!(cmd.p2(), 0x03);

        let cmd = LoadCommand::with_block_data(true, 7, vec![0xAA]);
        assert_eq!(cmd.p1(), 0x80);
        assert_eq!(cmd.p2(), 0x07);
    }
}
