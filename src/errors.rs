// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Two-level error split for the wire path.
//!
//! `CodecError` covers everything that can go wrong while *decoding one
//! PDU* from an otherwise healthy byte stream; the connection answers
//! with a Reject PDU and keeps running.  `ProtocolError` covers
//! violations of the protocol state machine itself; those terminate the
//! connection (or fail the login with the carried status).

use thiserror::Error;

use crate::models::{login::status::LoginStatus, reject::reason::RejectReason};

/// Fallible PDU decode.  Maps to a Reject PDU, connection stays open.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("unknown opcode 0x{0:02x}")]
    UnknownOpcode(u8),

    #[error("header digest mismatch: got {got:#010x}, want {want:#010x}")]
    HeaderDigestMismatch { got: u32, want: u32 },

    #[error("data digest mismatch: got {got:#010x}, want {want:#010x}")]
    DataDigestMismatch { got: u32, want: u32 },

    #[error("PDU field out of range: {0}")]
    InvalidField(&'static str),

    #[error("data segment length {got} exceeds negotiated limit {limit}")]
    DataSegmentTooLong { got: usize, limit: usize },
}

impl CodecError {
    /// Reject reason code this decode failure is answered with.
    pub fn reject_reason(&self) -> RejectReason {
        match self {
            CodecError::HeaderDigestMismatch { .. } => RejectReason::HeaderDigestError,
            CodecError::DataDigestMismatch { .. } => RejectReason::DataDigestError,
            CodecError::UnknownOpcode(_) => RejectReason::CommandNotSupported,
            CodecError::InvalidField(_) => RejectReason::InvalidPduField,
            CodecError::DataSegmentTooLong { .. } => RejectReason::ProtocolError,
        }
    }
}

/// Protocol violation.  Terminates the connection; login-phase variants
/// carry the status the closing Login Response reports.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("first PDU on a connection must be a Login Request, got 0x{0:02x}")]
    FirstPduNotLogin(u8),

    #[error("login failed: {status:?}: {reason}")]
    LoginFailed { status: LoginStatus, reason: String },

    #[error("PDU 0x{opcode:02x} not allowed in {phase}")]
    UnexpectedPdu { opcode: u8, phase: &'static str },

    #[error("ExpStatSN {got} outside window (StatSN {stat_sn})")]
    ExpStatSnOutOfWindow { got: u32, stat_sn: u32 },

    #[error("connection closed by peer")]
    ConnectionClosed,
}
