// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::fmt;

use anyhow::{Result, bail};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Logout reason code, low 7 bits of BHS byte 1 (RFC 3720 § 10.14.1).
#[derive(Debug, Default, PartialEq, Eq, Clone, Copy)]
#[repr(u8)]
pub enum LogoutReason {
    /// Close the entire session (all connections)
    #[default]
    CloseSession = 0x00,
    /// Close a specific connection identified by CID
    CloseConnection = 0x01,
    /// Remove a connection for recovery purposes (ERL>0 only)
    RemoveConnectionForRecovery = 0x02,
}

impl LogoutReason {
    #[inline]
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }
}

impl TryFrom<u8> for LogoutReason {
    type Error = anyhow::Error;

    fn try_from(value: u8) -> Result<Self> {
        Ok(match value {
            0x00 => LogoutReason::CloseSession,
            0x01 => LogoutReason::CloseConnection,
            0x02 => LogoutReason::RemoveConnectionForRecovery,
            other => bail!("unexpected logout reason {other}"),
        })
    }
}

impl fmt::Display for LogoutReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Wire-safe wrapper for the Logout reason byte.  Bit 7 is always set
/// on the wire; the reason lives in the low 7 bits.
#[repr(transparent)]
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable,
)]
pub struct RawLogoutReason(u8);

impl Default for RawLogoutReason {
    #[inline]
    fn default() -> Self {
        Self(0x80)
    }
}

impl RawLogoutReason {
    #[inline]
    pub const fn raw(self) -> u8 {
        self.0
    }

    #[inline]
    pub fn decode(self) -> Result<LogoutReason> {
        LogoutReason::try_from(self.0 & 0x7F)
    }

    #[inline]
    pub fn encode(&mut self, r: LogoutReason) {
        self.0 = 0x80 | r.as_u8();
    }
}

impl From<LogoutReason> for RawLogoutReason {
    #[inline]
    fn from(r: LogoutReason) -> Self {
        Self(0x80 | r.as_u8())
    }
}

/// Logout response code (RFC 3720 § 10.15.1).
#[derive(Debug, Default, PartialEq, Eq, Clone, Copy)]
#[repr(u8)]
pub enum LogoutResponseCode {
    /// connection or session closed successfully
    #[default]
    Success = 0x00,
    /// CID not found
    CidNotFound = 0x01,
    /// connection recovery is not supported
    RecoveryNotSupported = 0x02,
    /// cleanup failed
    CleanupFailed = 0x03,
}

impl LogoutResponseCode {
    #[inline]
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }
}

impl TryFrom<u8> for LogoutResponseCode {
    type Error = anyhow::Error;

    fn try_from(v: u8) -> Result<Self> {
        Ok(match v {
            0x00 => LogoutResponseCode::Success,
            0x01 => LogoutResponseCode::CidNotFound,
            0x02 => LogoutResponseCode::RecoveryNotSupported,
            0x03 => LogoutResponseCode::CleanupFailed,
            other => bail!("invalid LogoutResponseCode: {other:#04x}"),
        })
    }
}

/// Wire-safe wrapper for the Logout response code byte.
#[repr(transparent)]
#[derive(
    Copy, Clone, Default, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable,
)]
pub struct RawLogoutResponseCode(u8);

impl RawLogoutResponseCode {
    #[inline]
    pub const fn raw(self) -> u8 {
        self.0
    }

    #[inline]
    pub fn decode(self) -> Result<LogoutResponseCode> {
        LogoutResponseCode::try_from(self.0)
    }

    #[inline]
    pub fn encode(&mut self, r: LogoutResponseCode) {
        self.0 = r.as_u8();
    }
}

impl From<LogoutResponseCode> for RawLogoutResponseCode {
    #[inline]
    fn from(r: LogoutResponseCode) -> Self {
        Self(r.as_u8())
    }
}

impl fmt::Debug for RawLogoutResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.decode() {
            Ok(code) => write!(f, "RawLogoutResponseCode({code:?})"),
            Err(_) => write!(f, "RawLogoutResponseCode(invalid {:#04x})", self.0),
        }
    }
}
