// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::{Result, bail};

use crate::control_block::common::{be32, op};

/// Parsed **REPORT LUNS** CDB (SPC-3 § 6.21).
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct ReportLunsCdb {
    pub select_report: u8,
    pub allocation_length: u32,
}

impl ReportLunsCdb {
    pub fn parse(cdb: &[u8; 16]) -> Result<Self> {
        if cdb[0] != op::REPORT_LUNS {
            bail!("not a REPORT LUNS CDB: opcode 0x{:02x}", cdb[0]);
        }
        Ok(ReportLunsCdb {
            select_report: cdb[2],
            allocation_length: be32(&cdb[6..10]),
        })
    }
}

/// Build a padded 16-byte REPORT LUNS CDB.
#[inline]
pub fn build_report_luns(cdb: &mut [u8; 16], alloc_len: u32) {
    cdb.fill(0);
    cdb[0] = op::REPORT_LUNS;
    cdb[6..10].copy_from_slice(&alloc_len.to_be_bytes());
}

/// REPORT LUNS parameter data for this target: an 8-byte header whose
/// list length is 8, followed by the single all-zero LUN 0 entry.
pub fn report_luns_data() -> Vec<u8> {
    let mut out = vec![0u8; 16];
    out[..4].copy_from_slice(&8u32.to_be_bytes());
    // bytes 8..16: LUN 0, flat addressing, already zero
    out
}
