// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::{Result, bail};

use crate::control_block::common::op;

/// Parsed **START STOP UNIT** CDB (SBC-2 § 5.17).  A file-backed LUN
/// has no motor; the command is accepted and ignored.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct StartStopUnitCdb {
    pub immed: bool,
    pub start: bool,
    pub load_eject: bool,
}

impl StartStopUnitCdb {
    pub fn parse(cdb: &[u8; 16]) -> Result<Self> {
        if cdb[0] != op::START_STOP_UNIT {
            bail!("not a START STOP UNIT CDB: opcode 0x{:02x}", cdb[0]);
        }
        Ok(StartStopUnitCdb {
            immed: cdb[1] & 0x01 != 0,
            start: cdb[4] & 0x01 != 0,
            load_eject: cdb[4] & 0x02 != 0,
        })
    }
}

/// Build a padded 16-byte START STOP UNIT CDB.
#[inline]
pub fn build_start_stop(cdb: &mut [u8; 16], start: bool) {
    cdb.fill(0);
    cdb[0] = op::START_STOP_UNIT;
    cdb[4] = start as u8;
}
