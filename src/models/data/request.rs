// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::{Result, bail};
use zerocopy::{
    BigEndian, FromBytes as ZFromBytes, Immutable, IntoBytes, KnownLayout, U32, U64,
};

use crate::models::{
    common::{BHS_LEN, BasicHeaderSegment, PduFlags, ZeroCopyBhs, decode_dsl, encode_dsl},
    data::common::RawDataOutFlags,
    opcode::{BhsOpcode, Opcode, RawBhsOpcode},
};

/// BHS of a SCSI Data-Out PDU (opcode 0x05), RFC 3720 § 10.7.
///
/// Carries write payload solicited by an R2T (TTT echoes the R2T's tag)
/// or unsolicited data (TTT = 0xffffffff).
#[repr(C)]
#[derive(Debug, Default, PartialEq, ZFromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct ScsiDataOut {
    pub opcode: RawBhsOpcode,                // 0
    pub flags: RawDataOutFlags,              // 1
    reserved1: [u8; 2],                      // 2..4
    pub total_ahs_length: u8,                // 4
    pub data_segment_length: [u8; 3],        // 5..8
    pub lun: U64<BigEndian>,                 // 8..16
    pub initiator_task_tag: u32,             // 16..20
    pub target_transfer_tag: U32<BigEndian>, // 20..24
    reserved2: [u8; 4],                      // 24..28
    pub exp_stat_sn: U32<BigEndian>,         // 28..32
    reserved3: [u8; 4],                      // 32..36
    pub data_sn: U32<BigEndian>,             // 36..40
    pub buffer_offset: U32<BigEndian>,       // 40..44
    reserved4: [u8; 4],                      // 44..48
}

impl ScsiDataOut {
    /// TTT of unsolicited Data-Out.
    pub const UNSOLICITED_TAG: u32 = 0xffff_ffff;

    pub fn to_bhs_bytes(&self, buf: &mut [u8]) -> Result<()> {
        if buf.len() != BHS_LEN {
            bail!("buffer length must be {BHS_LEN}, got {}", buf.len());
        }
        buf.copy_from_slice(self.as_bytes());
        Ok(())
    }

    pub fn from_bhs_bytes(buf: &[u8]) -> Result<&Self> {
        let hdr = <Self as ZFromBytes>::ref_from_bytes(buf)
            .map_err(|e| anyhow::anyhow!("failed to map ScsiDataOut BHS: {e}"))?;
        if hdr.opcode.opcode_known() != Some(Opcode::ScsiDataOut) {
            bail!(
                "ScsiDataOut: invalid opcode 0x{:02x}",
                hdr.opcode.opcode_raw()
            );
        }
        Ok(hdr)
    }
}

/// Builder for Data-Out PDUs; the test initiator answers R2Ts with it.
#[derive(Debug, Default)]
pub struct ScsiDataOutBuilder {
    pub header: ScsiDataOut,
}

impl ScsiDataOutBuilder {
    pub fn new() -> Self {
        ScsiDataOutBuilder {
            header: ScsiDataOut {
                opcode: {
                    let mut tmp = RawBhsOpcode::default();
                    tmp.set_opcode_known(Opcode::ScsiDataOut);
                    tmp
                },
                target_transfer_tag: ScsiDataOut::UNSOLICITED_TAG.into(),
                ..Default::default()
            },
        }
    }

    pub fn final_bit(mut self) -> Self {
        self.header.flags.set_fin(true);
        self
    }

    pub fn lun(mut self, lun: u64) -> Self {
        self.header.lun.set(lun);
        self
    }

    pub fn initiator_task_tag(mut self, tag: u32) -> Self {
        self.header.initiator_task_tag = tag;
        self
    }

    pub fn target_transfer_tag(mut self, tag: u32) -> Self {
        self.header.target_transfer_tag.set(tag);
        self
    }

    pub fn exp_stat_sn(mut self, sn: u32) -> Self {
        self.header.exp_stat_sn.set(sn);
        self
    }

    pub fn data_sn(mut self, sn: u32) -> Self {
        self.header.data_sn.set(sn);
        self
    }

    pub fn buffer_offset(mut self, offset: u32) -> Self {
        self.header.buffer_offset.set(offset);
        self
    }
}

impl PduFlags for ScsiDataOut {
    fn final_bit(&self) -> bool {
        self.flags.fin()
    }

    fn set_final_bit(&mut self) {
        self.flags.set_fin(true);
    }

    fn continue_bit(&self) -> bool {
        !self.flags.fin()
    }

    fn set_continue_bit(&mut self) {
        self.flags.set_fin(false);
    }
}

impl BasicHeaderSegment for ScsiDataOut {
    #[inline]
    fn to_bhs_bytes(&self, buf: &mut [u8]) -> Result<()> {
        self.to_bhs_bytes(buf)
    }

    #[inline]
    fn opcode(&self) -> Result<BhsOpcode> {
        Ok(BhsOpcode::try_from(self.opcode.raw())?)
    }

    fn initiator_task_tag(&self) -> u32 {
        self.initiator_task_tag
    }

    #[inline]
    fn ahs_length_bytes(&self) -> usize {
        (self.total_ahs_length as usize) * 4
    }

    #[inline]
    fn set_ahs_length_bytes(&mut self, len: u8) {
        self.total_ahs_length = len >> 2;
    }

    #[inline]
    fn data_length_bytes(&self) -> usize {
        decode_dsl(&self.data_segment_length)
    }

    #[inline]
    fn set_data_length_bytes(&mut self, len: u32) {
        self.data_segment_length = encode_dsl(len);
    }
}

impl ZeroCopyBhs for ScsiDataOut {}
