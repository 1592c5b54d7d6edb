// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::{Result, bail};

use crate::control_block::common::op;

/// Parsed **REQUEST SENSE** CDB (SPC-3 § 6.27).  Descriptor-format
/// sense is not kept; DESC requests fall back to fixed format.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct RequestSenseCdb {
    pub desc: bool,
    pub allocation_length: u8,
}

impl RequestSenseCdb {
    pub fn parse(cdb: &[u8; 16]) -> Result<Self> {
        if cdb[0] != op::REQUEST_SENSE {
            bail!("not a REQUEST SENSE CDB: opcode 0x{:02x}", cdb[0]);
        }
        Ok(RequestSenseCdb {
            desc: cdb[1] & 0x01 != 0,
            allocation_length: cdb[4],
        })
    }
}

/// Build a padded 16-byte REQUEST SENSE CDB.
#[inline]
pub fn build_request_sense(cdb: &mut [u8; 16], alloc_len: u8) {
    cdb.fill(0);
    cdb[0] = op::REQUEST_SENSE;
    cdb[4] = alloc_len;
}
