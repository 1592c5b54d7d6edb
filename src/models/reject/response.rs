// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::{Result, bail};
use zerocopy::{
    BigEndian, FromBytes as ZFromBytes, Immutable, IntoBytes, KnownLayout, U32,
};

use crate::models::{
    common::{BHS_LEN, BasicHeaderSegment, PduFlags, ZeroCopyBhs, decode_dsl, encode_dsl},
    opcode::{BhsOpcode, Opcode, RawBhsOpcode},
    reject::reason::{RawRejectReason, RejectReason},
};

/// BHS of a Reject PDU (opcode 0x3f), RFC 3720 § 10.17.
///
/// The data segment carries the header of the PDU being rejected; the
/// ITT field is always 0xffffffff.
#[repr(C)]
#[derive(Debug, Default, PartialEq, ZFromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct RejectPdu {
    pub opcode: RawBhsOpcode,             // 0
    pub flags: u8,                        // 1 (always 0x80)
    pub reason: RawRejectReason,          // 2
    reserved1: u8,                        // 3
    pub total_ahs_length: u8,             // 4
    pub data_segment_length: [u8; 3],     // 5..8
    reserved2: [u8; 8],                   // 8..16
    pub initiator_task_tag: u32,          // 16..20 (always 0xffffffff)
    reserved3: [u8; 4],                   // 20..24
    pub stat_sn: U32<BigEndian>,          // 24..28
    pub exp_cmd_sn: U32<BigEndian>,       // 28..32
    pub max_cmd_sn: U32<BigEndian>,       // 32..36
    pub data_sn_or_r2t_sn: U32<BigEndian>, // 36..40
    reserved4: [u8; 8],                   // 40..48
}

impl RejectPdu {
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
            .map_err(|e| anyhow::anyhow!("failed to map RejectPdu BHS: {e}"))?;
        if hdr.opcode.opcode_known() != Some(Opcode::Reject) {
            bail!(
                "RejectPdu: invalid opcode 0x{:02x}",
                hdr.opcode.opcode_raw()
            );
        }
        Ok(hdr)
    }
}

/// Builder for the Reject PDU answered to a malformed inbound PDU.
#[derive(Debug)]
pub struct RejectPduBuilder {
    pub header: RejectPdu,
}

impl RejectPduBuilder {
    pub fn new(reason: RejectReason) -> Self {
        RejectPduBuilder {
            header: RejectPdu {
                opcode: {
                    let mut tmp = RawBhsOpcode::default();
                    tmp.set_opcode_known(Opcode::Reject);
                    tmp
                },
                flags: 0x80,
                reason: reason.into(),
                initiator_task_tag: RejectPdu::RESERVED_TAG,
                ..Default::default()
            },
        }
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
}

impl PduFlags for RejectPdu {
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

impl BasicHeaderSegment for RejectPdu {
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

impl ZeroCopyBhs for RejectPdu {}
