// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use core::fmt;

use anyhow::{Result, bail};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Wire view for **Data-Out flags** (byte 1 of the PDU).  Only the
/// Final bit is defined.
#[repr(transparent)]
#[derive(Default, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct RawDataOutFlags(u8);

impl RawDataOutFlags {
    pub const FINAL: u8 = 0b1000_0000;

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
    pub fn set_fin(&mut self, on: bool) {
        if on {
            self.0 |= Self::FINAL;
        } else {
            self.0 &= !Self::FINAL;
        }
    }
}

impl fmt::Debug for RawDataOutFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RawDataOutFlags {{ ")?;
        if self.fin() {
            write!(f, "FIN")?;
        }
        write!(f, " }}")
    }
}

/// Wire view for **Data-In flags** (byte 1 of the PDU):
/// F, A (DataACK, ERL>0 only), O/U residual bits, S (status present).
#[repr(transparent)]
#[derive(Default, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct RawDataInFlags(u8);

impl RawDataInFlags {
    pub const A: u8 = 1 << 6;
    pub const FINAL: u8 = 1 << 7;
    pub const O: u8 = 1 << 2;
    const RESERVED_MASK: u8 = 0b0011_1000;
    pub const S: u8 = 1 << 0;
    pub const U: u8 = 1 << 1;

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
    pub fn ack(&self) -> bool {
        self.0 & Self::A != 0
    }

    #[inline]
    pub fn o(&self) -> bool {
        self.0 & Self::O != 0
    }

    #[inline]
    pub fn u(&self) -> bool {
        self.0 & Self::U != 0
    }

    #[inline]
    pub fn s(&self) -> bool {
        self.0 & Self::S != 0
    }

    #[inline]
    pub fn set_fin(&mut self, on: bool) {
        Self::set_bit(&mut self.0, Self::FINAL, on)
    }

    #[inline]
    pub fn set_o(&mut self, on: bool) {
        Self::set_pair(&mut self.0, Self::O, Self::U, on)
    }

    #[inline]
    pub fn set_u(&mut self, on: bool) {
        Self::set_pair(&mut self.0, Self::U, Self::O, on)
    }

    #[inline]
    pub fn set_s(&mut self, on: bool) {
        Self::set_bit(&mut self.0, Self::S, on);
        if on {
            self.set_fin(true); // S => F
        }
    }

    #[inline]
    fn set_bit(v: &mut u8, bit: u8, on: bool) {
        if on {
            *v |= bit;
        } else {
            *v &= !bit;
        }
    }

    // keep mutual exclusion for the U/O pair
    #[inline]
    fn set_pair(v: &mut u8, set_bit: u8, clear_bit: u8, on: bool) {
        if on {
            *v |= set_bit;
            *v &= !clear_bit;
        } else {
            *v &= !set_bit;
        }
    }

    /// Validate protocol constraints:
    /// - reserved bits (5..3) must be zero
    /// - not both U and O
    /// - S => F
    #[inline]
    pub fn validate(&self) -> Result<()> {
        if self.0 & Self::RESERVED_MASK != 0 {
            bail!(
                "protocol error: reserved bits set in Data-In flags: {:#010b}",
                self.0
            );
        }
        if self.u() && self.o() {
            bail!("protocol error: both U and O set");
        }
        if self.s() && !self.fin() {
            bail!("protocol error: S=1 requires F=1");
        }
        Ok(())
    }
}

impl fmt::Debug for RawDataInFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RawDataInFlags {{ ")?;
        if self.fin() {
            write!(f, "FIN|")?;
        }
        if self.ack() {
            write!(f, "A|")?;
        }
        if self.o() {
            write!(f, "O|")?;
        }
        if self.u() {
            write!(f, "U|")?;
        }
        if self.s() {
            write!(f, "S|")?;
        }
        write!(f, " }}")
    }
}
