// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::fmt;

use anyhow::{Result, bail};
use zerocopy::{
    BigEndian, FromBytes as ZFromBytes, Immutable, IntoBytes, KnownLayout, U16, U32, U64,
};

use crate::models::{
    common::{BHS_LEN, BasicHeaderSegment, PduFlags, ZeroCopyBhs, decode_dsl, encode_dsl},
    opcode::{BhsOpcode, Opcode, RawBhsOpcode},
};

/// Async event codes (RFC 3720 § 10.9.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AsyncEvent {
    /// 0 — SCSI async event (sense in the data segment).
    ScsiEvent = 0,
    /// 1 — target requests logout; parameter3 = Time2Wait.
    RequestLogout = 1,
    /// 2 — target will drop this connection.
    DropConnection = 2,
    /// 3 — target will drop all connections of the session.
    DropAllConnections = 3,
    /// 4 — target requests parameter renegotiation.
    RequestNegotiation = 4,
}

impl TryFrom<u8> for AsyncEvent {
    type Error = anyhow::Error;

    fn try_from(v: u8) -> Result<Self> {
        Ok(match v {
            0 => AsyncEvent::ScsiEvent,
            1 => AsyncEvent::RequestLogout,
            2 => AsyncEvent::DropConnection,
            3 => AsyncEvent::DropAllConnections,
            4 => AsyncEvent::RequestNegotiation,
            other => bail!("invalid async event {other}"),
        })
    }
}

impl fmt::Display for AsyncEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// BHS of an Async Message PDU (opcode 0x32), RFC 3720 § 10.9.
///
/// The target sends RequestLogout on graceful shutdown so initiators
/// can close their sessions before the listener goes away.
#[repr(C)]
#[derive(Debug, Default, PartialEq, ZFromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct AsyncMessage {
    pub opcode: RawBhsOpcode,         // 0
    pub flags: u8,                    // 1 (always 0x80)
    reserved1: [u8; 2],               // 2..4
    pub total_ahs_length: u8,         // 4
    pub data_segment_length: [u8; 3], // 5..8
    pub lun: U64<BigEndian>,          // 8..16
    pub initiator_task_tag: u32,      // 16..20 (always 0xffffffff)
    reserved2: [u8; 4],               // 20..24
    pub stat_sn: U32<BigEndian>,      // 24..28
    pub exp_cmd_sn: U32<BigEndian>,   // 28..32
    pub max_cmd_sn: U32<BigEndian>,   // 32..36
    pub async_event: u8,              // 36
    pub async_vcode: u8,              // 37
    pub parameter1: U16<BigEndian>,   // 38..40
    pub parameter2: U16<BigEndian>,   // 40..42
    pub parameter3: U16<BigEndian>,   // 42..44
    reserved3: [u8; 4],               // 44..48
}

impl AsyncMessage {
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
            .map_err(|e| anyhow::anyhow!("failed to map AsyncMessage BHS: {e}"))?;
        if hdr.opcode.opcode_known() != Some(Opcode::AsyncMessage) {
            bail!(
                "AsyncMessage: invalid opcode 0x{:02x}",
                hdr.opcode.opcode_raw()
            );
        }
        Ok(hdr)
    }

    pub fn event(&self) -> Result<AsyncEvent> {
        AsyncEvent::try_from(self.async_event)
    }
}

/// Builder for target-originated Async Messages.
#[derive(Debug)]
pub struct AsyncMessageBuilder {
    pub header: AsyncMessage,
}

impl AsyncMessageBuilder {
    pub fn new(event: AsyncEvent) -> Self {
        AsyncMessageBuilder {
            header: AsyncMessage {
                opcode: {
                    let mut tmp = RawBhsOpcode::default();
                    tmp.set_opcode_known(Opcode::AsyncMessage);
                    tmp
                },
                flags: 0x80,
                initiator_task_tag: AsyncMessage::RESERVED_TAG,
                async_event: event as u8,
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

    /// RequestLogout carries Time2Wait in parameter3.
    pub fn logout_timers(mut self, time2wait: u16, time2retain: u16) -> Self {
        self.header.parameter2.set(time2retain);
        self.header.parameter3.set(time2wait);
        self
    }
}

impl PduFlags for AsyncMessage {
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

impl BasicHeaderSegment for AsyncMessage {
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

impl ZeroCopyBhs for AsyncMessage {}
