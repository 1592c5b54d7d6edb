// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::{Result, bail};
use zerocopy::{
    BigEndian, FromBytes as ZFromBytes, Immutable, IntoBytes, KnownLayout, U16, U32,
};

use crate::models::{
    common::{BHS_LEN, BasicHeaderSegment, PduFlags, ZeroCopyBhs, decode_dsl, encode_dsl},
    login::{
        common::{RawLoginFlags, Stage},
        status::LoginStatus,
    },
    opcode::{BhsOpcode, Opcode, RawBhsOpcode},
};

/// BHS of a Login Response PDU (opcode 0x23), RFC 3720 § 10.13.
#[repr(C)]
#[derive(Debug, Default, PartialEq, ZFromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct LoginResponse {
    pub opcode: RawBhsOpcode,         // 0
    pub flags: RawLoginFlags,         // 1
    pub version_max: u8,              // 2
    pub version_active: u8,           // 3
    pub total_ahs_length: u8,         // 4
    pub data_segment_length: [u8; 3], // 5..8
    pub isid: [u8; 6],                // 8..14
    pub tsih: U16<BigEndian>,         // 14..16
    pub initiator_task_tag: u32,      // 16..20
    reserved1: [u8; 4],               // 20..24
    pub stat_sn: U32<BigEndian>,      // 24..28
    pub exp_cmd_sn: U32<BigEndian>,   // 28..32
    pub max_cmd_sn: U32<BigEndian>,   // 32..36
    pub status_class: u8,             // 36
    pub status_detail: u8,            // 37
    reserved2: [u8; 10],              // 38..48
}

impl LoginResponse {
    pub fn to_bhs_bytes(&self, buf: &mut [u8]) -> Result<()> {
        if buf.len() != BHS_LEN {
            bail!("buffer length must be {BHS_LEN}, got {}", buf.len());
        }
        buf.copy_from_slice(self.as_bytes());
        Ok(())
    }

    pub fn from_bhs_bytes(buf: &[u8]) -> Result<&Self> {
        let hdr = <Self as ZFromBytes>::ref_from_bytes(buf)
            .map_err(|e| anyhow::anyhow!("failed to map LoginResponse BHS: {e}"))?;
        if hdr.opcode.opcode_known() != Some(Opcode::LoginResp) {
            bail!(
                "LoginResponse: invalid opcode 0x{:02x}",
                hdr.opcode.opcode_raw()
            );
        }
        Ok(hdr)
    }

    pub fn status(&self) -> Result<LoginStatus> {
        LoginStatus::from_class_detail(self.status_class, self.status_detail)
    }
}

/// Builder for the Login Response the target sends back for every Login
/// Request PDU.  ISID and ITT are echoed from the request; CSG/NSG and
/// the T bit reflect the stage decision taken by the login handler.
#[derive(Debug)]
pub struct LoginResponseBuilder {
    pub header: LoginResponse,
}

impl LoginResponseBuilder {
    pub fn new(isid: [u8; 6], tsih: u16) -> Self {
        LoginResponseBuilder {
            header: LoginResponse {
                opcode: {
                    let mut tmp = RawBhsOpcode::default();
                    tmp.set_opcode_known(Opcode::LoginResp);
                    tmp
                },
                isid,
                tsih: tsih.into(),
                ..Default::default()
            },
        }
    }

    pub fn transit(mut self, on: bool) -> Self {
        self.header.flags.set_transit(on);
        self
    }

    pub fn csg(mut self, stage: Stage) -> Self {
        self.header.flags.set_csg(stage);
        self
    }

    pub fn nsg(mut self, stage: Stage) -> Self {
        self.header.flags.set_nsg(stage);
        self
    }

    /// Version-Max / Version-Active; this target implements 0x00 only.
    pub fn versions(mut self, max: u8, active: u8) -> Self {
        self.header.version_max = max;
        self.header.version_active = active;
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

    pub fn status(mut self, status: LoginStatus) -> Self {
        let (class, detail) = status.class_detail();
        self.header.status_class = class;
        self.header.status_detail = detail;
        self
    }
}

impl PduFlags for LoginResponse {
    fn final_bit(&self) -> bool {
        !self.flags.cont()
    }

    fn set_final_bit(&mut self) {
        self.flags.set_cont(false);
    }

    fn continue_bit(&self) -> bool {
        self.flags.cont()
    }

    fn set_continue_bit(&mut self) {
        self.flags.set_cont(true);
    }
}

impl BasicHeaderSegment for LoginResponse {
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

    // Login PDUs are never covered by digests (RFC 3720 § 10.13).
    fn header_digest_len(&self, _: bool) -> usize {
        0
    }

    fn data_digest_len(&self, _: bool) -> usize {
        0
    }
}

impl ZeroCopyBhs for LoginResponse {}
