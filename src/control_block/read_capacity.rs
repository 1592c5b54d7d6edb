// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::{Result, bail};
use zerocopy::{
    FromBytes, Immutable, KnownLayout,
    byteorder::{BigEndian, U32, U64},
};

use crate::control_block::common::{be32, op};

/// Parsed **READ CAPACITY(10)** CDB (SBC-2 § 5.10).
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct ReadCapacity10Cdb {
    /// Partial Medium Indicator; this target only serves PMI=0.
    pub pmi: bool,
    pub lba: u32,
}

impl ReadCapacity10Cdb {
    pub fn parse(cdb: &[u8; 16]) -> Result<Self> {
        if cdb[0] != op::READ_CAPACITY_10 {
            bail!("not a READ CAPACITY(10) CDB: opcode 0x{:02x}", cdb[0]);
        }
        Ok(ReadCapacity10Cdb {
            pmi: cdb[8] & 0x01 != 0,
            lba: be32(&cdb[2..6]),
        })
    }
}

/// Parsed **READ CAPACITY(16)** CDB, the 0x10 service action of
/// SERVICE ACTION IN(16) (SBC-2 § 5.11).
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct ReadCapacity16Cdb {
    pub pmi: bool,
    pub allocation_length: u32,
}

impl ReadCapacity16Cdb {
    pub fn parse(cdb: &[u8; 16]) -> Result<Self> {
        if cdb[0] != op::SERVICE_ACTION_IN_16
            || cdb[1] & 0x1f != op::SA_READ_CAPACITY_16
        {
            bail!(
                "not a READ CAPACITY(16) CDB: opcode 0x{:02x}/sa 0x{:02x}",
                cdb[0],
                cdb[1] & 0x1f
            );
        }
        Ok(ReadCapacity16Cdb {
            pmi: cdb[14] & 0x01 != 0,
            allocation_length: be32(&cdb[10..14]),
        })
    }
}

/// Build a padded 16-byte READ CAPACITY(10) CDB.
#[inline]
pub fn build_read_capacity10(cdb: &mut [u8; 16]) {
    cdb.fill(0);
    cdb[0] = op::READ_CAPACITY_10;
}

/// Build a 16-byte READ CAPACITY(16) CDB.
#[inline]
pub fn build_read_capacity16(cdb: &mut [u8; 16], alloc_len: u32) {
    cdb.fill(0);
    cdb[0] = op::SERVICE_ACTION_IN_16;
    cdb[1] = op::SA_READ_CAPACITY_16;
    cdb[10..14].copy_from_slice(&alloc_len.to_be_bytes());
}

/// 8-byte READ CAPACITY(10) parameter data: last LBA + block length,
/// both big-endian.  A device too large for 32 bits reports
/// 0xFFFFFFFF, steering the initiator to READ CAPACITY(16).
pub fn rc10_data(total_blocks: u64, block_size: u32) -> [u8; 8] {
    let last_lba: u32 = (total_blocks.saturating_sub(1)).try_into().unwrap_or(u32::MAX);
    let mut out = [0u8; 8];
    out[..4].copy_from_slice(&last_lba.to_be_bytes());
    out[4..].copy_from_slice(&block_size.to_be_bytes());
    out
}

/// 32-byte READ CAPACITY(16) parameter data; only the first 12 bytes
/// carry information at this feature level.
pub fn rc16_data(total_blocks: u64, block_size: u32) -> [u8; 32] {
    let mut out = [0u8; 32];
    out[..8].copy_from_slice(&total_blocks.saturating_sub(1).to_be_bytes());
    out[8..12].copy_from_slice(&block_size.to_be_bytes());
    out
}

/// Raw 8-byte parameter data of READ CAPACITY(10), as the test
/// initiator reads it back.
#[repr(C)]
#[derive(FromBytes, KnownLayout, Immutable, Debug)]
pub struct Rc10Raw {
    pub max_lba: U32<BigEndian>,
    pub block_len: U32<BigEndian>,
}

/// Raw head (first 12 bytes) of READ CAPACITY(16) parameter data.
#[repr(C)]
#[derive(FromBytes, KnownLayout, Immutable, Debug)]
pub struct Rc16Raw {
    pub max_lba: U64<BigEndian>,
    pub block_len: U32<BigEndian>,
}

/// Parse READ CAPACITY(10) parameter data (needs >= 8 bytes).
#[inline]
pub fn parse_rc10(buf: &[u8]) -> Result<&Rc10Raw> {
    let (raw, _rest) = Rc10Raw::ref_from_prefix(buf).map_err(|_| {
        anyhow::anyhow!("READ CAPACITY(10): need >= 8 bytes, got {}", buf.len())
    })?;
    Ok(raw)
}

/// Parse READ CAPACITY(16) parameter data head (needs >= 12 bytes).
#[inline]
pub fn parse_rc16(buf: &[u8]) -> Result<&Rc16Raw> {
    let (raw, _rest) = Rc16Raw::ref_from_prefix(buf).map_err(|_| {
        anyhow::anyhow!("READ CAPACITY(16): need >= 12 bytes, got {}", buf.len())
    })?;
    Ok(raw)
}
