// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use core::fmt;

use anyhow::{Context, Result, anyhow};

pub const FIXED_MIN_LEN: usize = 18;

/// Sense keys this target raises (SPC-3 § 4.5.6).
pub mod key {
    pub const NO_SENSE: u8 = 0x00;
    pub const NOT_READY: u8 = 0x02;
    pub const MEDIUM_ERROR: u8 = 0x03;
    pub const ILLEGAL_REQUEST: u8 = 0x05;
}

/// ASC/ASCQ pairs this target raises.
pub mod asc {
    /// INVALID COMMAND OPERATION CODE
    pub const INVALID_OPCODE: (u8, u8) = (0x20, 0x00);
    /// LOGICAL BLOCK ADDRESS OUT OF RANGE
    pub const LBA_OUT_OF_RANGE: (u8, u8) = (0x21, 0x00);
    /// INVALID FIELD IN CDB
    pub const INVALID_FIELD_IN_CDB: (u8, u8) = (0x24, 0x00);
    /// LOGICAL UNIT NOT SUPPORTED
    pub const LUN_NOT_SUPPORTED: (u8, u8) = (0x25, 0x00);
    /// WRITE ERROR
    pub const WRITE_ERROR: (u8, u8) = (0x0c, 0x00);
    /// UNRECOVERED READ ERROR
    pub const READ_ERROR: (u8, u8) = (0x11, 0x00);
}

/// Fixed-format sense data (response code 0x70), SPC-3 § 4.5.3.
#[repr(C)]
#[derive(Default, PartialEq, Clone)]
pub struct SenseData {
    pub valid: bool,
    pub response_code: u8,
    pub sense_key: u8,
    pub ili: bool,
    pub eom: bool,
    pub filemark: bool,
    pub information: u32,
    pub additional_len: u8,
    pub cmd_specific: u32,
    pub asc: u8,
    pub ascq: u8,
}

impl SenseData {
    /// Current sense for the given key and ASC/ASCQ pair.
    pub fn current(sense_key: u8, (asc, ascq): (u8, u8)) -> Self {
        SenseData {
            response_code: 0x70,
            sense_key,
            additional_len: 10,
            asc,
            ascq,
            ..Default::default()
        }
    }

    /// "Nothing to report" sense used by REQUEST SENSE when no command
    /// has failed since the last report.
    pub fn no_sense() -> Self {
        Self::current(key::NO_SENSE, (0x00, 0x00))
    }

    /// 18-byte fixed-format image.
    pub fn to_fixed_bytes(&self) -> [u8; FIXED_MIN_LEN] {
        let mut out = [0u8; FIXED_MIN_LEN];
        out[0] = self.response_code & 0x7F;
        if self.valid {
            out[0] |= 0x80;
        }
        out[2] = self.sense_key & 0x0F;
        if self.filemark {
            out[2] |= 0x80;
        }
        if self.eom {
            out[2] |= 0x40;
        }
        if self.ili {
            out[2] |= 0x20;
        }
        out[3..7].copy_from_slice(&self.information.to_be_bytes());
        out[7] = self.additional_len;
        out[8..12].copy_from_slice(&self.cmd_specific.to_be_bytes());
        out[12] = self.asc;
        out[13] = self.ascq;
        out
    }

    /// Sense as carried in a SCSI Response data segment: the fixed
    /// image prefixed by its two-byte big-endian length (RFC 3720
    /// § 10.4.7).
    pub fn to_data_segment(&self) -> Vec<u8> {
        let fixed = self.to_fixed_bytes();
        let mut out = Vec::with_capacity(2 + fixed.len());
        out.extend_from_slice(&(fixed.len() as u16).to_be_bytes());
        out.extend_from_slice(&fixed);
        out
    }

    /// Parse sense out of a SCSI Response data segment, accepting both
    /// the length-prefixed and the bare fixed form.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < FIXED_MIN_LEN {
            return Err(anyhow!("sense buffer too small: {}", buf.len()));
        }

        let sense = {
            let maybe_len = u16::from_be_bytes([buf[0], buf[1]]) as usize;
            let rc = buf[2] & 0x7F;
            if maybe_len + 2 == buf.len() && matches!(rc, 0x70..=0x73) {
                &buf[2..]
            } else {
                buf
            }
        };

        if sense.len() < FIXED_MIN_LEN {
            return Err(anyhow!(
                "sense payload too small after prefix stripping: {}",
                sense.len()
            ));
        }

        let response_code = sense[0] & 0x7F;
        match response_code {
            0x70 | 0x71 => Self::parse_fixed(sense),
            0x72 | 0x73 => Err(anyhow!(
                "descriptor-format sense (0x{:02x}) is not supported",
                response_code
            )),
            other => Err(anyhow!("unknown sense response code 0x{:02x}", other)),
        }
    }

    fn parse_fixed(sense: &[u8]) -> Result<Self> {
        let valid = sense[0] & 0x80 != 0;
        let response_code = sense[0] & 0x7F;

        let filemark = sense[2] & 0x80 != 0;
        let eom = sense[2] & 0x40 != 0;
        let ili = sense[2] & 0x20 != 0;
        let sense_key = sense[2] & 0x0F;

        let information = u32::from_be_bytes(
            sense[3..7]
                .try_into()
                .context("failed to read Information (3..6)")?,
        );

        let additional_len = sense[7];

        let needed = 8usize + (additional_len as usize);
        if sense.len() < needed {
            return Err(anyhow!(
                "sense length mismatch: have {}, need at least {}",
                sense.len(),
                needed
            ));
        }

        let cmd_specific = u32::from_be_bytes(
            sense[8..12]
                .try_into()
                .context("failed to read Cmd-specific (8..11)")?,
        );

        Ok(SenseData {
            valid,
            response_code,
            sense_key,
            ili,
            eom,
            filemark,
            information,
            additional_len,
            cmd_specific,
            asc: sense[12],
            ascq: sense[13],
        })
    }
}

impl fmt::Debug for SenseData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SenseData")
            .field("response_code", &format_args!("{:#04x}", self.response_code))
            .field("sense_key", &format_args!("{:#x}", self.sense_key))
            .field("asc", &format_args!("{:#04x}", self.asc))
            .field("ascq", &format_args!("{:#04x}", self.ascq))
            .field("description", &asc_ascq_to_str(self.asc, self.ascq))
            .finish()
    }
}

/// Human-readable description for the ASC/ASCQ pairs this target emits.
/// Falls back to a generic message for everything else.
#[inline]
pub fn asc_ascq_to_str(asc: u8, ascq: u8) -> &'static str {
    match (asc, ascq) {
        (0x00, 0x00) => "NO ADDITIONAL SENSE INFORMATION",
        (0x0c, 0x00) => "WRITE ERROR",
        (0x11, 0x00) => "UNRECOVERED READ ERROR",
        (0x20, 0x00) => "INVALID COMMAND OPERATION CODE",
        (0x21, 0x00) => "LOGICAL BLOCK ADDRESS OUT OF RANGE",
        (0x24, 0x00) => "INVALID FIELD IN CDB",
        (0x25, 0x00) => "LOGICAL UNIT NOT SUPPORTED",
        _ => "UNSPECIFIED / vendor specific",
    }
}
