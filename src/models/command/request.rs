// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::{Result, bail};
use zerocopy::{
    BigEndian, FromBytes as ZFromBytes, Immutable, IntoBytes, KnownLayout, U32, U64,
};

use crate::models::{
    command::{common::TaskAttribute, zero_copy::RawScsiCmdReqFlags},
    common::{BHS_LEN, BasicHeaderSegment, PduFlags, ZeroCopyBhs, decode_dsl, encode_dsl},
    opcode::{BhsOpcode, Opcode, RawBhsOpcode},
};

/// BHS of a SCSI Command PDU (opcode 0x01), RFC 3720 § 10.3.
///
/// The 16-byte CDB rides in bytes 32..48; anything the CDB does not fill
/// is zero.  Immediate data, when negotiated, follows as the data
/// segment.
#[repr(C)]
#[derive(Debug, Default, PartialEq, ZFromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct ScsiCommandRequest {
    pub opcode: RawBhsOpcode,                          // 0
    pub flags: RawScsiCmdReqFlags,                     // 1
    reserved1: [u8; 2],                                // 2..4
    pub total_ahs_length: u8,                          // 4
    pub data_segment_length: [u8; 3],                  // 5..8
    pub lun: U64<BigEndian>,                           // 8..16
    pub initiator_task_tag: u32,                       // 16..20
    pub expected_data_transfer_length: U32<BigEndian>, // 20..24
    pub cmd_sn: U32<BigEndian>,                        // 24..28
    pub exp_stat_sn: U32<BigEndian>,                   // 28..32
    pub cdb: [u8; 16],                                 // 32..48
}

impl ScsiCommandRequest {
    pub fn to_bhs_bytes(&self, buf: &mut [u8]) -> Result<()> {
        if buf.len() != BHS_LEN {
            bail!("buffer length must be {BHS_LEN}, got {}", buf.len());
        }
        buf.copy_from_slice(self.as_bytes());
        Ok(())
    }

    pub fn from_bhs_bytes(buf: &[u8]) -> Result<&Self> {
        let hdr = <Self as ZFromBytes>::ref_from_bytes(buf)
            .map_err(|e| anyhow::anyhow!("failed to map ScsiCommandRequest BHS: {e}"))?;
        if hdr.opcode.opcode_known() != Some(Opcode::ScsiCommandReq) {
            bail!(
                "ScsiCommandRequest: invalid opcode 0x{:02x}",
                hdr.opcode.opcode_raw()
            );
        }
        Ok(hdr)
    }
}

/// Builder for SCSI Command PDUs; the test initiator uses it to drive
/// the dispatcher end to end.
#[derive(Debug, Default)]
pub struct ScsiCommandRequestBuilder {
    pub header: ScsiCommandRequest,
}

impl ScsiCommandRequestBuilder {
    pub fn new() -> Self {
        ScsiCommandRequestBuilder {
            header: ScsiCommandRequest {
                opcode: {
                    let mut tmp = RawBhsOpcode::default();
                    tmp.set_opcode_known(Opcode::ScsiCommandReq);
                    tmp
                },
                flags: {
                    let mut tmp = RawScsiCmdReqFlags::default();
                    tmp.set_fin(true);
                    tmp
                },
                ..Default::default()
            },
        }
    }

    pub fn immediate(mut self) -> Self {
        self.header.opcode.set_immediate();
        self
    }

    pub fn read(mut self) -> Self {
        self.header.flags.set_read(true);
        self
    }

    pub fn write(mut self) -> Self {
        self.header.flags.set_write(true);
        self
    }

    pub fn task_attribute(mut self, task: TaskAttribute) -> Self {
        self.header.flags.set_task_attr(task);
        self
    }

    pub fn initiator_task_tag(mut self, tag: u32) -> Self {
        self.header.initiator_task_tag = tag;
        self
    }

    pub fn expected_data_transfer_length(mut self, len: u32) -> Self {
        self.header.expected_data_transfer_length.set(len);
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

    pub fn lun(mut self, lun: u64) -> Self {
        self.header.lun.set(lun);
        self
    }

    /// Copy the 16-byte CDB verbatim into the BHS.
    pub fn cdb(mut self, cdb: &[u8; 16]) -> Self {
        self.header.cdb.copy_from_slice(cdb);
        self
    }
}

impl PduFlags for ScsiCommandRequest {
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

impl BasicHeaderSegment for ScsiCommandRequest {
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

impl ZeroCopyBhs for ScsiCommandRequest {}
