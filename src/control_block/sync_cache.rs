// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::{Result, bail};

use crate::control_block::common::{be32, op};

/// Parsed **SYNCHRONIZE CACHE(10)** CDB (SBC-2 § 5.18).  Range is
/// accepted but the whole store is flushed; pass-through writes leave
/// nothing else to narrow.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct SynchronizeCache10Cdb {
    pub lba: u32,
    pub blocks: u16,
    pub immed: bool,
}

impl SynchronizeCache10Cdb {
    pub fn parse(cdb: &[u8; 16]) -> Result<Self> {
        if cdb[0] != op::SYNCHRONIZE_CACHE_10 {
            bail!("not a SYNCHRONIZE CACHE(10) CDB: opcode 0x{:02x}", cdb[0]);
        }
        Ok(SynchronizeCache10Cdb {
            lba: be32(&cdb[2..6]),
            blocks: u16::from_be_bytes([cdb[7], cdb[8]]),
            immed: cdb[1] & 0x02 != 0,
        })
    }
}

/// Build a padded 16-byte SYNCHRONIZE CACHE(10) CDB.
#[inline]
pub fn build_sync_cache10(cdb: &mut [u8; 16], lba: u32, blocks: u16) {
    cdb.fill(0);
    cdb[0] = op::SYNCHRONIZE_CACHE_10;
    cdb[2..6].copy_from_slice(&lba.to_be_bytes());
    cdb[7..9].copy_from_slice(&blocks.to_be_bytes());
}
