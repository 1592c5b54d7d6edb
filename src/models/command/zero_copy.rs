// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use core::fmt;

use anyhow::{Result, bail};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::models::command::common::{ResponseCode, ScsiStatus, TaskAttribute};

/// Wire view for **SCSI Command Request** flags (byte 1 of the PDU).
#[repr(transparent)]
#[derive(Default, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct RawScsiCmdReqFlags(u8);

impl RawScsiCmdReqFlags {
    pub const ATTR: u8 = 0x07;
    pub const FINAL: u8 = 0x80;
    pub const READ: u8 = 0x40;
    pub const WRITE: u8 = 0x20;

    #[inline]
    pub const fn raw(&self) -> u8 {
        self.0
    }

    #[inline]
    pub const fn new_raw(v: u8) -> Self {
        Self(v)
    }

    #[inline]
    pub fn fin(&self) -> bool {
        self.0 & Self::FINAL != 0
    }

    #[inline]
    pub fn read(&self) -> bool {
        self.0 & Self::READ != 0
    }

    #[inline]
    pub fn write(&self) -> bool {
        self.0 & Self::WRITE != 0
    }

    #[inline]
    pub fn set_fin(&mut self, on: bool) {
        self.set(Self::FINAL, on)
    }

    #[inline]
    pub fn set_read(&mut self, on: bool) {
        self.set(Self::READ, on)
    }

    #[inline]
    pub fn set_write(&mut self, on: bool) {
        self.set(Self::WRITE, on)
    }

    #[inline]
    fn set(&mut self, bit: u8, on: bool) {
        if on {
            self.0 |= bit;
        } else {
            self.0 &= !bit;
        }
    }

    #[inline]
    pub fn task_attr(&self) -> TaskAttribute {
        TaskAttribute::from(self.0 & Self::ATTR)
    }

    #[inline]
    pub fn set_task_attr(&mut self, attr: TaskAttribute) {
        self.0 = (self.0 & !Self::ATTR) | u8::from(attr);
    }
}

impl fmt::Debug for RawScsiCmdReqFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RawScsiCmdReqFlags {{ ")?;
        if self.fin() {
            write!(f, "FIN|")?;
        }
        if self.read() {
            write!(f, "READ|")?;
        }
        if self.write() {
            write!(f, "WRITE|")?;
        }
        write!(f, "ATTR={:?} }}", self.task_attr())
    }
}

/// Wire view for **SCSI Command Response** flags (byte 1 of the PDU).
#[repr(transparent)]
#[derive(Default, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct RawScsiCmdRespFlags(u8);

impl RawScsiCmdRespFlags {
    pub const FINAL: u8 = 0b1000_0000;
    /// bidir read residual overflow (o)
    pub const O_SMALL: u8 = 0b0001_0000;
    /// bidir read residual underflow (u)
    pub const U_SMALL: u8 = 0b0000_1000;
    /// residual overflow (O)
    pub const O_BIG: u8 = 0b0000_0100;
    /// residual underflow (U)
    pub const U_BIG: u8 = 0b0000_0010;

    #[inline]
    pub const fn raw(&self) -> u8 {
        self.0
    }

    #[inline]
    pub const fn new_raw(v: u8) -> Self {
        Self(v)
    }

    #[inline]
    pub fn fin(&self) -> bool {
        self.0 & Self::FINAL != 0
    }

    #[inline]
    pub fn o_big(&self) -> bool {
        self.0 & Self::O_BIG != 0
    }

    #[inline]
    pub fn u_big(&self) -> bool {
        self.0 & Self::U_BIG != 0
    }

    #[inline]
    pub fn set_fin(&mut self, on: bool) {
        if on {
            self.0 |= Self::FINAL;
        } else {
            self.0 &= !Self::FINAL;
        }
    }

    #[inline]
    pub fn set_o_big(&mut self, on: bool) {
        self.set_pair(Self::O_BIG, Self::U_BIG, on)
    }

    #[inline]
    pub fn set_u_big(&mut self, on: bool) {
        self.set_pair(Self::U_BIG, Self::O_BIG, on)
    }

    // keep mutual exclusion of the U/O pair
    #[inline]
    fn set_pair(&mut self, set_bit: u8, clear_bit: u8, on: bool) {
        if on {
            self.0 |= set_bit;
            self.0 &= !clear_bit;
        } else {
            self.0 &= !set_bit;
        }
    }

    /// RFC rule: not both U and O in the same pair.
    #[inline]
    pub fn validate(&self) -> Result<()> {
        if self.o_big() && self.u_big() {
            bail!("protocol error: both Underflow and Overflow bits set");
        }
        Ok(())
    }
}

impl fmt::Debug for RawScsiCmdRespFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RawScsiCmdRespFlags {{ ")?;
        if self.fin() {
            write!(f, "FIN|")?;
        }
        if self.o_big() {
            write!(f, "O|")?;
        }
        if self.u_big() {
            write!(f, "U|")?;
        }
        write!(f, " }}")
    }
}

/// Wire view for the 1-byte **ResponseCode** field (SCSI Response PDU).
#[repr(transparent)]
#[derive(Default, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct RawResponseCode(u8);

impl RawResponseCode {
    #[inline]
    pub const fn raw(&self) -> u8 {
        self.0
    }

    #[inline]
    pub fn decode(&self) -> ResponseCode {
        ResponseCode::from(self.0)
    }

    #[inline]
    pub fn encode(&mut self, rc: ResponseCode) {
        self.0 = u8::from(rc);
    }
}

impl fmt::Debug for RawResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RawResponseCode {{ {:?} }}", self.decode())
    }
}

/// Wire view for the 1-byte **SCSI Status** field.
#[repr(transparent)]
#[derive(Default, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct RawScsiStatus(u8);

impl RawScsiStatus {
    #[inline]
    pub const fn raw(&self) -> u8 {
        self.0
    }

    #[inline]
    pub fn decode(&self) -> ScsiStatus {
        ScsiStatus::from(self.0)
    }

    #[inline]
    pub fn encode(&mut self, st: ScsiStatus) {
        self.0 = u8::from(st);
    }
}

impl From<ScsiStatus> for RawScsiStatus {
    #[inline]
    fn from(s: ScsiStatus) -> Self {
        Self(u8::from(s))
    }
}

impl fmt::Debug for RawScsiStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RawScsiStatus {{ {:?} }}", self.decode())
    }
}
