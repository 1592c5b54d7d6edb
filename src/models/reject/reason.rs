// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::fmt;

use anyhow::{Result, bail};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Reject reason codes (RFC 3720 § 10.17.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RejectReason {
    /// 0x01 — header digest failed; the offending PDU cannot be
    /// attributed reliably, but the connection survives.
    HeaderDigestError = 0x01,
    /// 0x02 — data digest failed for the PDU named by the ITT.
    DataDigestError = 0x02,
    /// 0x03 — SNACK refused (always, at ERL 0).
    SnackReject = 0x03,
    /// 0x04 — protocol error.
    ProtocolError = 0x04,
    /// 0x05 — opcode not supported by this target.
    CommandNotSupported = 0x05,
    /// 0x06 — immediate command rejected, too many at once.
    ImmediateCommandReject = 0x06,
    /// 0x07 — task already in progress.
    TaskInProgress = 0x07,
    /// 0x08 — invalid DataACK.
    InvalidDataAck = 0x08,
    /// 0x09 — invalid PDU field.
    InvalidPduField = 0x09,
    /// 0x0a — long operation rejected, out of resources.
    LongOperationReject = 0x0a,
    /// 0x0b — negotiation reset.
    NegotiationReset = 0x0b,
    /// 0x0c — waiting for logout.
    WaitingForLogout = 0x0c,
}

impl RejectReason {
    #[inline]
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for RejectReason {
    type Error = anyhow::Error;

    fn try_from(v: u8) -> Result<Self> {
        Ok(match v {
            0x01 => RejectReason::HeaderDigestError,
            0x02 => RejectReason::DataDigestError,
            0x03 => RejectReason::SnackReject,
            0x04 => RejectReason::ProtocolError,
            0x05 => RejectReason::CommandNotSupported,
            0x06 => RejectReason::ImmediateCommandReject,
            0x07 => RejectReason::TaskInProgress,
            0x08 => RejectReason::InvalidDataAck,
            0x09 => RejectReason::InvalidPduField,
            0x0a => RejectReason::LongOperationReject,
            0x0b => RejectReason::NegotiationReset,
            0x0c => RejectReason::WaitingForLogout,
            other => bail!("invalid reject reason {other:#04x}"),
        })
    }
}

/// Wire-safe wrapper for the Reject reason byte.
#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct RawRejectReason(u8);

impl Default for RawRejectReason {
    #[inline]
    fn default() -> Self {
        Self(RejectReason::ProtocolError.as_u8())
    }
}

impl RawRejectReason {
    #[inline]
    pub const fn raw(self) -> u8 {
        self.0
    }

    #[inline]
    pub fn decode(self) -> Result<RejectReason> {
        RejectReason::try_from(self.0)
    }

    #[inline]
    pub fn encode(&mut self, r: RejectReason) {
        self.0 = r.as_u8();
    }
}

impl From<RejectReason> for RawRejectReason {
    #[inline]
    fn from(r: RejectReason) -> Self {
        Self(r.as_u8())
    }
}

impl fmt::Debug for RawRejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.decode() {
            Ok(r) => write!(f, "RawRejectReason({r:?})"),
            Err(_) => write!(f, "RawRejectReason(invalid {:#04x})", self.0),
        }
    }
}
