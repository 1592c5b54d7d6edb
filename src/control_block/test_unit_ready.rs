// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::{Result, bail};

use crate::control_block::common::op;

/// Parsed **TEST UNIT READY** CDB (SPC-3 § 6.33).  Carries nothing; a
/// backed store is always ready, so the answer is GOOD.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct TestUnitReadyCdb;

impl TestUnitReadyCdb {
    pub fn parse(cdb: &[u8; 16]) -> Result<Self> {
        if cdb[0] != op::TEST_UNIT_READY {
            bail!("not a TEST UNIT READY CDB: opcode 0x{:02x}", cdb[0]);
        }
        Ok(TestUnitReadyCdb)
    }
}

/// Build a padded 16-byte TEST UNIT READY CDB.
#[inline]
pub fn build_test_unit_ready(cdb: &mut [u8; 16]) {
    cdb.fill(0);
    cdb[0] = op::TEST_UNIT_READY;
}
