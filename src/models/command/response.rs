// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::{Result, bail};
use zerocopy::{
    BigEndian, FromBytes as ZFromBytes, Immutable, IntoBytes, KnownLayout, U32,
};

use crate::models::{
    command::{
        common::{ResponseCode, ScsiStatus},
        zero_copy::{RawResponseCode, RawScsiCmdRespFlags, RawScsiStatus},
    },
    common::{BHS_LEN, BasicHeaderSegment, PduFlags, ZeroCopyBhs, decode_dsl, encode_dsl},
    opcode::{BhsOpcode, Opcode, RawBhsOpcode},
};

/// BHS of a SCSI Response PDU (opcode 0x21), RFC 3720 § 10.4.
///
/// On CHECK CONDITION the data segment carries the sense data prefixed
/// by its two-byte length.
#[repr(C)]
#[derive(Debug, Default, PartialEq, ZFromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct ScsiCommandResponse {
    pub opcode: RawBhsOpcode,                 // 0
    pub flags: RawScsiCmdRespFlags,           // 1
    pub response: RawResponseCode,            // 2
    pub status: RawScsiStatus,                // 3
    pub total_ahs_length: u8,                 // 4
    pub data_segment_length: [u8; 3],         // 5..8
    reserved1: [u8; 8],                       // 8..16
    pub initiator_task_tag: u32,              // 16..20
    pub snack_tag: U32<BigEndian>,            // 20..24
    pub stat_sn: U32<BigEndian>,              // 24..28
    pub exp_cmd_sn: U32<BigEndian>,           // 28..32
    pub max_cmd_sn: U32<BigEndian>,           // 32..36
    pub exp_data_sn: U32<BigEndian>,          // 36..40
    pub bidi_residual_count: U32<BigEndian>,  // 40..44
    pub residual_count: U32<BigEndian>,       // 44..48
}

impl ScsiCommandResponse {
    pub fn to_bhs_bytes(&self, buf: &mut [u8]) -> Result<()> {
        if buf.len() != BHS_LEN {
            bail!("buffer length must be {BHS_LEN}, got {}", buf.len());
        }
        buf.copy_from_slice(self.as_bytes());
        Ok(())
    }

    pub fn from_bhs_bytes(buf: &[u8]) -> Result<&Self> {
        let hdr = <Self as ZFromBytes>::ref_from_bytes(buf).map_err(|e| {
            anyhow::anyhow!("failed to map ScsiCommandResponse BHS: {e}")
        })?;
        if hdr.opcode.opcode_known() != Some(Opcode::ScsiCommandResp) {
            bail!(
                "ScsiCommandResponse: invalid opcode 0x{:02x}",
                hdr.opcode.opcode_raw()
            );
        }
        hdr.flags.validate()?;
        Ok(hdr)
    }
}

/// Builder for the SCSI Response the dispatcher sends once a command
/// finishes.  `good()` / `check_condition()` cover the two outcomes this
/// target produces.
#[derive(Debug, Default)]
pub struct ScsiCommandResponseBuilder {
    pub header: ScsiCommandResponse,
}

impl ScsiCommandResponseBuilder {
    pub fn new() -> Self {
        ScsiCommandResponseBuilder {
            header: ScsiCommandResponse {
                opcode: {
                    let mut tmp = RawBhsOpcode::default();
                    tmp.set_opcode_known(Opcode::ScsiCommandResp);
                    tmp
                },
                flags: {
                    let mut tmp = RawScsiCmdRespFlags::default();
                    tmp.set_fin(true);
                    tmp
                },
                ..Default::default()
            },
        }
    }

    pub fn good(mut self) -> Self {
        self.header.response.encode(ResponseCode::CommandCompleted);
        self.header.status.encode(ScsiStatus::Good);
        self
    }

    pub fn check_condition(mut self) -> Self {
        self.header.response.encode(ResponseCode::CommandCompleted);
        self.header.status.encode(ScsiStatus::CheckCondition);
        self
    }

    pub fn status(mut self, st: ScsiStatus) -> Self {
        self.header.response.encode(ResponseCode::CommandCompleted);
        self.header.status.encode(st);
        self
    }

    pub fn initiator_task_tag(mut self, tag: u32) -> Self {
        self.header.initiator_task_tag = tag;
        self
    }

    pub fn stat_sn(mut self, sn: u32) -> Self {
        self.header.stat_sn.set(sn);
        self
    }

    pub fn cmd_window(mut self, exp_cmd_sn: u32, max_cmd_sn: u32) -> Self {
        self.header.exp_cmd_sn.set(exp_cmd_sn);
        self.header.max_cmd_sn.set(max_cmd_sn);
        self
    }

    pub fn exp_data_sn(mut self, sn: u32) -> Self {
        self.header.exp_data_sn.set(sn);
        self
    }

    /// Mark the transfer short of the initiator's expectation.
    pub fn residual_underflow(mut self, count: u32) -> Self {
        self.header.flags.set_u_big(count != 0);
        self.header.residual_count.set(count);
        self
    }

    /// Mark the transfer longer than the initiator's expectation.
    pub fn residual_overflow(mut self, count: u32) -> Self {
        self.header.flags.set_o_big(count != 0);
        self.header.residual_count.set(count);
        self
    }
}

impl PduFlags for ScsiCommandResponse {
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

impl BasicHeaderSegment for ScsiCommandResponse {
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

impl ZeroCopyBhs for ScsiCommandResponse {}
