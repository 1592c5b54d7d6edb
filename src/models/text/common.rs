// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use core::fmt;

use anyhow::Result;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Wire view for the Text Request/Response flags byte (F bit7, C bit6).
#[repr(transparent)]
#[derive(Default, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct RawTextFlags(u8);

impl RawTextFlags {
    pub const CONTINUE: u8 = 0x40;
    pub const FINAL: u8 = 0x80;

    #[inline]
    pub const fn raw(&self) -> u8 {
        self.0
    }

    #[inline]
    pub const fn from_raw(v: u8) -> Self {
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
            self.0 &= !Self::CONTINUE;
        } else {
            self.0 &= !Self::FINAL;
        }
    }

    #[inline]
    pub fn cont(&self) -> bool {
        self.0 & Self::CONTINUE != 0
    }

    #[inline]
    pub fn set_cont(&mut self, on: bool) {
        if on {
            self.0 |= Self::CONTINUE;
            self.0 &= !Self::FINAL;
        } else {
            self.0 &= !Self::CONTINUE;
        }
    }

    /// RFC 3720: F=1 and C=1 are mutually exclusive.
    #[inline]
    pub fn validate(&self) -> Result<()> {
        if self.fin() && self.cont() {
            anyhow::bail!("text flags: Final and Continue both set");
        }
        Ok(())
    }
}

impl fmt::Debug for RawTextFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RawTextFlags(")?;
        let mut sep = "";
        if self.fin() {
            write!(f, "FINAL")?;
            sep = "|";
        }
        if self.cont() {
            write!(f, "{sep}CONTINUE")?;
        }
        write!(f, ")")
    }
}
