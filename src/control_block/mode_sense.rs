// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::{Result, bail};

use crate::control_block::common::op;

pub mod page {
    pub const CACHING: u8 = 0x08;
    pub const CONTROL: u8 = 0x0A;
    pub const ALL: u8 = 0x3F;
}

/// Parsed **MODE SENSE(6)** CDB (SPC-3 § 6.9).
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct ModeSense6Cdb {
    /// Disable Block Descriptors
    pub dbd: bool,
    pub page_code: u8,
    pub allocation_length: u8,
}

impl ModeSense6Cdb {
    pub fn parse(cdb: &[u8; 16]) -> Result<Self> {
        if cdb[0] != op::MODE_SENSE_6 {
            bail!("not a MODE SENSE(6) CDB: opcode 0x{:02x}", cdb[0]);
        }
        Ok(ModeSense6Cdb {
            dbd: cdb[1] & 0x08 != 0,
            page_code: cdb[2] & 0x3F,
            allocation_length: cdb[4],
        })
    }
}

/// Build a padded 16-byte MODE SENSE(6) CDB.
#[inline]
pub fn build_mode_sense6(cdb: &mut [u8; 16], page_code: u8, alloc_len: u8) {
    cdb.fill(0);
    cdb[0] = op::MODE_SENSE_6;
    cdb[2] = page_code & 0x3F;
    cdb[4] = alloc_len;
}

fn caching_page(write_cache: bool) -> Vec<u8> {
    let mut out = vec![0u8; 20];
    out[0] = page::CACHING;
    out[1] = 18; // page length
    if write_cache {
        out[2] |= 0x04; // WCE
    }
    out
}

fn control_page() -> Vec<u8> {
    let mut out = vec![0u8; 12];
    out[0] = page::CONTROL;
    out[1] = 10; // page length
    out[3] = 0x10; // queue algorithm modifier: unrestricted reordering
    out
}

/// MODE SENSE(6) parameter data: 4-byte header plus the requested
/// page(s).  `None` for a page this target does not keep (the
/// dispatcher maps that to INVALID FIELD IN CDB).  Writes pass through
/// to the backing store, so WCE reads as 0.
pub fn mode_sense6_data(page_code: u8) -> Option<Vec<u8>> {
    let pages: Vec<u8> = match page_code {
        page::CACHING => caching_page(false),
        page::CONTROL => control_page(),
        page::ALL => {
            let mut all = caching_page(false);
            all.extend_from_slice(&control_page());
            all
        },
        _ => return None,
    };

    let mut out = vec![0u8; 4];
    out[0] = (3 + pages.len()) as u8; // mode data length, excluding itself
    // medium type 0, device-specific 0, no block descriptors
    out.extend_from_slice(&pages);
    Some(out)
}
