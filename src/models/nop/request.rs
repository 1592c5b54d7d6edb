// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::{Result, bail};
use zerocopy::{
    BigEndian, FromBytes as ZFromBytes, Immutable, IntoBytes, KnownLayout, U32, U64,
};

use crate::models::{
    common::{BHS_LEN, BasicHeaderSegment, PduFlags, ZeroCopyBhs, decode_dsl, encode_dsl},
    opcode::{BhsOpcode, Opcode, RawBhsOpcode},
};

/// BHS of a NOP-Out PDU (opcode 0x00), RFC 3720 § 10.18.
///
/// With TTT = 0xffffffff this is an initiator ping the target must echo
/// with a NOP-In carrying the same data segment.  With ITT = 0xffffffff
/// it is the initiator's answer to a target NOP-In and needs no reply.
#[repr(C)]
#[derive(Debug, Default, PartialEq, ZFromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct NopOutRequest {
    pub opcode: RawBhsOpcode,                // 0
    pub flags: u8,                           // 1 (always 0x80)
    reserved1: [u8; 2],                      // 2..4
    pub total_ahs_length: u8,                // 4
    pub data_segment_length: [u8; 3],        // 5..8
    pub lun: U64<BigEndian>,                 // 8..16
    pub initiator_task_tag: u32,             // 16..20
    pub target_transfer_tag: U32<BigEndian>, // 20..24
    pub cmd_sn: U32<BigEndian>,              // 24..28
    pub exp_stat_sn: U32<BigEndian>,         // 28..32
    reserved2: [u8; 16],                     // 32..48
}

impl NopOutRequest {
    pub const RESERVED_TAG: u32 = 0xffff_ffff;

    pub fn to_bhs_bytes(&self, buf: &mut [u8]) -> Result<()> {
        if buf.len() != BHS_LEN {
            bail!("buffer length must be {BHS_LEN}, got {}", buf.len());
        }
        buf.copy_from_slice(self.as_bytes());
        Ok(())
    }

    pub fn from_bhs_bytes(buf: &[u8]) -> Result<&Self> {
        let hdr = <Self as ZFromBytes>::ref_from_bytes(buf)
            .map_err(|e| anyhow::anyhow!("failed to map NopOutRequest BHS: {e}"))?;
        if hdr.opcode.opcode_known() != Some(Opcode::NopOut) {
            bail!(
                "NopOutRequest: invalid opcode 0x{:02x}",
                hdr.opcode.opcode_raw()
            );
        }
        Ok(hdr)
    }

    /// Ping semantics: expects a NOP-In echo.
    pub fn wants_reply(&self) -> bool {
        self.initiator_task_tag != Self::RESERVED_TAG
    }
}

/// Builder for NOP-Out PDUs (test initiator keep-alives).
#[derive(Debug, Default)]
pub struct NopOutRequestBuilder {
    pub header: NopOutRequest,
}

impl NopOutRequestBuilder {
    pub fn new() -> Self {
        NopOutRequestBuilder {
            header: NopOutRequest {
                opcode: {
                    let mut tmp = RawBhsOpcode::default();
                    tmp.set_opcode_known(Opcode::NopOut);
                    tmp
                },
                flags: 0x80,
                target_transfer_tag: NopOutRequest::RESERVED_TAG.into(),
                ..Default::default()
            },
        }
    }

    pub fn immediate(mut self) -> Self {
        self.header.opcode.set_immediate();
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

    pub fn cmd_sn(mut self, sn: u32) -> Self {
        self.header.cmd_sn.set(sn);
        self
    }

    pub fn exp_stat_sn(mut self, sn: u32) -> Self {
        self.header.exp_stat_sn.set(sn);
        self
    }
}

impl PduFlags for NopOutRequest {
    fn final_bit(&self) -> bool {
        true
    }

    fn set_final_bit(&mut self) {
        self.flags = 0x80;
    }

    fn continue_bit(&self) -> bool {
        false
    }

    fn set_continue_bit(&mut self) {}
}

impl BasicHeaderSegment for NopOutRequest {
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

    fn ahs_length_bytes(&self) -> usize {
        (self.total_ahs_length as usize) * 4
    }

    fn set_ahs_length_bytes(&mut self, len: u8) {
        self.total_ahs_length = len >> 2;
    }

    fn data_length_bytes(&self) -> usize {
        decode_dsl(&self.data_segment_length)
    }

    fn set_data_length_bytes(&mut self, len: u32) {
        self.data_segment_length = encode_dsl(len);
    }
}

impl ZeroCopyBhs for NopOutRequest {}
