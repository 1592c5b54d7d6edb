// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::{Result, bail};
use zerocopy::{
    BigEndian, FromBytes as ZFromBytes, Immutable, IntoBytes, KnownLayout, U16, U32,
};

use crate::models::{
    common::{BHS_LEN, BasicHeaderSegment, PduFlags, ZeroCopyBhs, decode_dsl, encode_dsl},
    logout::common::{LogoutResponseCode, RawLogoutResponseCode},
    opcode::{BhsOpcode, Opcode, RawBhsOpcode},
};

/// BHS of a Logout Response PDU (opcode 0x26), RFC 3720 § 10.15.
#[repr(C)]
#[derive(Debug, Default, PartialEq, ZFromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct LogoutResponse {
    pub opcode: RawBhsOpcode,              // 0
    pub flags: u8,                         // 1 (always 0x80)
    pub response: RawLogoutResponseCode,   // 2
    reserved1: u8,                         // 3
    pub total_ahs_length: u8,              // 4
    pub data_segment_length: [u8; 3],      // 5..8
    reserved2: [u8; 8],                    // 8..16
    pub initiator_task_tag: u32,           // 16..20
    reserved3: [u8; 4],                    // 20..24
    pub stat_sn: U32<BigEndian>,           // 24..28
    pub exp_cmd_sn: U32<BigEndian>,        // 28..32
    pub max_cmd_sn: U32<BigEndian>,        // 32..36
    reserved4: [u8; 4],                    // 36..40
    pub time2wait: U16<BigEndian>,         // 40..42
    pub time2retain: U16<BigEndian>,       // 42..44
    reserved5: [u8; 4],                    // 44..48
}

impl LogoutResponse {
    pub fn to_bhs_bytes(&self, buf: &mut [u8]) -> Result<()> {
        if buf.len() != BHS_LEN {
            bail!("buffer length must be {BHS_LEN}, got {}", buf.len());
        }
        buf.copy_from_slice(self.as_bytes());
        Ok(())
    }

    pub fn from_bhs_bytes(buf: &[u8]) -> Result<&Self> {
        let hdr = <Self as ZFromBytes>::ref_from_bytes(buf)
            .map_err(|e| anyhow::anyhow!("failed to map LogoutResponse BHS: {e}"))?;
        if hdr.opcode.opcode_known() != Some(Opcode::LogoutResp) {
            bail!(
                "LogoutResponse: invalid opcode 0x{:02x}",
                hdr.opcode.opcode_raw()
            );
        }
        Ok(hdr)
    }
}

/// Builder for the Logout Response sent before the connection winds
/// down.  Time2Wait/Time2Retain echo the negotiated values; they are
/// reported, not enforced.
#[derive(Debug)]
pub struct LogoutResponseBuilder {
    pub header: LogoutResponse,
}

impl LogoutResponseBuilder {
    pub fn new(code: LogoutResponseCode) -> Self {
        LogoutResponseBuilder {
            header: LogoutResponse {
                opcode: {
                    let mut tmp = RawBhsOpcode::default();
                    tmp.set_opcode_known(Opcode::LogoutResp);
                    tmp
                },
                flags: 0x80,
                response: code.into(),
                ..Default::default()
            },
        }
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

    pub fn timers(mut self, time2wait: u16, time2retain: u16) -> Self {
        self.header.time2wait.set(time2wait);
        self.header.time2retain.set(time2retain);
        self
    }
}

impl PduFlags for LogoutResponse {
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

impl BasicHeaderSegment for LogoutResponse {
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

impl ZeroCopyBhs for LogoutResponse {}
