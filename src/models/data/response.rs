// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::{Result, anyhow, bail};
use zerocopy::{
    BigEndian, FromBytes as ZFromBytes, Immutable, IntoBytes, KnownLayout, U32, U64,
};

use crate::models::{
    command::{common::ScsiStatus, zero_copy::RawScsiStatus},
    common::{BHS_LEN, BasicHeaderSegment, PduFlags, ZeroCopyBhs, decode_dsl, encode_dsl},
    data::common::RawDataInFlags,
    opcode::{BhsOpcode, Opcode, RawBhsOpcode},
};

/// BHS of a SCSI Data-In PDU (opcode 0x25), RFC 3720 § 10.7.
///
/// One READ produces a run of these with DataSN counting from 0 and the
/// F bit on the last; the status fields are only meaningful when the S
/// bit collapses the SCSI Response into the final Data-In.
#[repr(C)]
#[derive(Debug, Default, PartialEq, ZFromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct ScsiDataIn {
    pub opcode: RawBhsOpcode,                // 0
    pub flags: RawDataInFlags,               // 1
    reserved1: u8,                           // 2
    pub status_or_rsvd: RawScsiStatus,       // 3
    pub total_ahs_length: u8,                // 4
    pub data_segment_length: [u8; 3],        // 5..8
    pub lun: U64<BigEndian>,                 // 8..16
    pub initiator_task_tag: u32,             // 16..20
    pub target_transfer_tag: U32<BigEndian>, // 20..24
    pub stat_sn_or_rsvd: U32<BigEndian>,     // 24..28
    pub exp_cmd_sn: U32<BigEndian>,          // 28..32
    pub max_cmd_sn: U32<BigEndian>,          // 32..36
    pub data_sn: U32<BigEndian>,             // 36..40
    pub buffer_offset: U32<BigEndian>,       // 40..44
    pub residual_count: U32<BigEndian>,      // 44..48
}

impl ScsiDataIn {
    /// TTT when the target does not expect a DataACK (always, at ERL 0).
    pub const RESERVED_TAG: u32 = 0xffff_ffff;

    /// Decoded SCSI status iff `S=1`.
    #[inline]
    pub fn scsi_status(&self) -> Option<ScsiStatus> {
        if self.flags.s() {
            Some(self.status_or_rsvd.decode())
        } else {
            None
        }
    }

    /// Sets/clears SCSI status and enforces `S => F`.
    #[inline]
    pub fn set_scsi_status(&mut self, st: Option<ScsiStatus>) {
        match st {
            Some(s) => {
                self.flags.set_s(true);
                self.status_or_rsvd.encode(s);
            },
            None => {
                self.flags.set_s(false);
                self.status_or_rsvd.encode(ScsiStatus::Good);
                self.stat_sn_or_rsvd.set(0);
                self.residual_count.set(0);
            },
        }
    }

    /// Serialize the BHS; with `S=0` the status/StatSN/residual bytes
    /// are zeroed as RFC 3720 § 10.7 requires.
    #[inline]
    pub fn to_bhs_bytes(&self, buf: &mut [u8]) -> Result<()> {
        if buf.len() != BHS_LEN {
            bail!("buffer length must be {BHS_LEN}, got {}", buf.len());
        }
        buf.copy_from_slice(self.as_bytes());
        if !self.flags.s() {
            buf[3] = 0; // status
            buf[24..28].fill(0); // StatSN
            buf[44..48].fill(0); // ResidualCount
        }
        Ok(())
    }

    #[inline]
    pub fn from_bhs_bytes(buf: &[u8]) -> Result<&Self> {
        let hdr = <Self as ZFromBytes>::ref_from_bytes(buf)
            .map_err(|_| anyhow!("SCSI Data-In: zerocopy prefix error"))?;
        if hdr.opcode.opcode_known() != Some(Opcode::ScsiDataIn) {
            bail!(
                "ScsiDataIn: invalid opcode 0x{:02x}",
                hdr.opcode.opcode_raw()
            );
        }
        hdr.flags.validate()?;
        Ok(hdr)
    }
}

/// Builder for the Data-In PDUs a READ produces.
#[derive(Debug, Default)]
pub struct ScsiDataInBuilder {
    pub header: ScsiDataIn,
}

impl ScsiDataInBuilder {
    pub fn new() -> Self {
        ScsiDataInBuilder {
            header: ScsiDataIn {
                opcode: {
                    let mut tmp = RawBhsOpcode::default();
                    tmp.set_opcode_known(Opcode::ScsiDataIn);
                    tmp
                },
                target_transfer_tag: ScsiDataIn::RESERVED_TAG.into(),
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

    pub fn stat_sn(mut self, sn: u32) -> Self {
        self.header.stat_sn_or_rsvd.set(sn);
        self
    }

    pub fn cmd_window(mut self, exp_cmd_sn: u32, max_cmd_sn: u32) -> Self {
        self.header.exp_cmd_sn.set(exp_cmd_sn);
        self.header.max_cmd_sn.set(max_cmd_sn);
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

impl PduFlags for ScsiDataIn {
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
        // Clear F; to keep the S => F invariant, also clear S.
        self.flags.set_fin(false);
        self.flags.set_s(false);
    }
}

impl BasicHeaderSegment for ScsiDataIn {
    #[inline]
    fn to_bhs_bytes(&self, buf: &mut [u8]) -> Result<()> {
        self.to_bhs_bytes(buf)
    }

    #[inline]
    fn opcode(&self) -> Result<BhsOpcode> {
        Ok(BhsOpcode::try_from(self.opcode.raw())?)
    }

    #[inline]
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

impl ZeroCopyBhs for ScsiDataIn {}
