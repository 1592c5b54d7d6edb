// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Status-Class / Status-Detail pairs for the Login Response
//! (RFC 3720 § 10.13.5).

use std::fmt;

use anyhow::{Result, bail};

/// The subset of login statuses this target reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoginStatus {
    /// 0x00/0x00 — login proceeded or completed.
    #[default]
    Success,
    /// 0x02/0x00 — initiator error, no detail.
    InitiatorError,
    /// 0x02/0x01 — authentication failure.
    AuthFailure,
    /// 0x02/0x02 — initiator is not allowed access to this target.
    AuthorizationFailure,
    /// 0x02/0x03 — requested target does not exist here.
    TargetNotFound,
    /// 0x02/0x07 — negotiation produced an unsupported combination.
    UnsupportedVersion,
    /// 0x02/0x0a — non-zero TSIH names no live session.
    SessionDoesNotExist,
    /// 0x03/0x00 — target error.
    TargetError,
    /// 0x03/0x01 — service unavailable.
    ServiceUnavailable,
}

impl LoginStatus {
    pub fn class_detail(self) -> (u8, u8) {
        match self {
            LoginStatus::Success => (0x00, 0x00),
            LoginStatus::InitiatorError => (0x02, 0x00),
            LoginStatus::AuthFailure => (0x02, 0x01),
            LoginStatus::AuthorizationFailure => (0x02, 0x02),
            LoginStatus::TargetNotFound => (0x02, 0x03),
            LoginStatus::UnsupportedVersion => (0x02, 0x07),
            LoginStatus::SessionDoesNotExist => (0x02, 0x0a),
            LoginStatus::TargetError => (0x03, 0x00),
            LoginStatus::ServiceUnavailable => (0x03, 0x01),
        }
    }

    pub fn from_class_detail(class: u8, detail: u8) -> Result<Self> {
        Ok(match (class, detail) {
            (0x00, 0x00) => LoginStatus::Success,
            (0x02, 0x00) => LoginStatus::InitiatorError,
            (0x02, 0x01) => LoginStatus::AuthFailure,
            (0x02, 0x02) => LoginStatus::AuthorizationFailure,
            (0x02, 0x03) => LoginStatus::TargetNotFound,
            (0x02, 0x07) => LoginStatus::UnsupportedVersion,
            (0x02, 0x0a) => LoginStatus::SessionDoesNotExist,
            (0x03, 0x00) => LoginStatus::TargetError,
            (0x03, 0x01) => LoginStatus::ServiceUnavailable,
            other => bail!("unhandled login status {other:?}"),
        })
    }

    /// Anything but Success terminates the connection after the
    /// response is sent.
    pub fn is_fatal(self) -> bool {
        !matches!(self, LoginStatus::Success)
    }
}

impl fmt::Display for LoginStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (c, d) = self.class_detail();
        write!(f, "{self:?}({c:#04x}/{d:#04x})")
    }
}
