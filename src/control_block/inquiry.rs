// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::{Result, bail};

use crate::control_block::common::{PRODUCT_ID, PRODUCT_REV, VENDOR_ID, be16, op};

/// VPD pages this target serves.
pub mod vpd {
    pub const SUPPORTED_PAGES: u8 = 0x00;
    pub const UNIT_SERIAL_NUMBER: u8 = 0x80;
    pub const DEVICE_IDENTIFICATION: u8 = 0x83;
}

/// Parsed **INQUIRY** CDB (SPC-3 § 6.4).
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct InquiryCdb {
    /// EVPD bit: page_code selects a VPD page instead of standard data.
    pub evpd: bool,
    pub page_code: u8,
    pub allocation_length: u16,
}

impl InquiryCdb {
    pub fn parse(cdb: &[u8; 16]) -> Result<Self> {
        if cdb[0] != op::INQUIRY {
            bail!("not an INQUIRY CDB: opcode 0x{:02x}", cdb[0]);
        }
        let evpd = cdb[1] & 0x01 != 0;
        let page_code = cdb[2];
        if !evpd && page_code != 0 {
            // SPC-3: PAGE CODE without EVPD is an illegal CDB field.
            bail!("INQUIRY: page code {page_code:#04x} without EVPD");
        }
        Ok(InquiryCdb {
            evpd,
            page_code,
            allocation_length: be16(cdb[3], cdb[4]),
        })
    }
}

/// Build a padded 16-byte INQUIRY CDB.
#[inline]
pub fn build_inquiry(cdb: &mut [u8; 16], evpd: bool, page: u8, alloc_len: u16) {
    cdb.fill(0);
    cdb[0] = op::INQUIRY;
    cdb[1] = evpd as u8;
    cdb[2] = page;
    cdb[3..5].copy_from_slice(&alloc_len.to_be_bytes());
}

/// Standard INQUIRY data for the single direct-access LUN (SPC-3
/// § 6.4.2): peripheral type 0x00, no removable media, SPC-3 level,
/// response format 2.
pub fn standard_inquiry_data() -> Vec<u8> {
    let mut out = vec![0u8; 36];
    out[0] = 0x00; // connected, direct-access block device
    out[1] = 0x00; // not removable
    out[2] = 0x05; // SPC-3
    out[3] = 0x02; // response data format 2
    out[4] = (out.len() - 5) as u8; // additional length
    out[8..16].copy_from_slice(VENDOR_ID);
    out[16..32].copy_from_slice(PRODUCT_ID);
    out[32..36].copy_from_slice(PRODUCT_REV);
    out
}

/// VPD page for the given code, or `None` for an unsupported page (the
/// dispatcher answers CHECK CONDITION / INVALID FIELD IN CDB then).
pub fn vpd_page_data(page_code: u8, target_name: &str) -> Option<Vec<u8>> {
    match page_code {
        vpd::SUPPORTED_PAGES => {
            let pages = [
                vpd::SUPPORTED_PAGES,
                vpd::UNIT_SERIAL_NUMBER,
                vpd::DEVICE_IDENTIFICATION,
            ];
            let mut out = vec![0u8; 4 + pages.len()];
            out[1] = page_code;
            out[3] = pages.len() as u8;
            out[4..].copy_from_slice(&pages);
            Some(out)
        },
        vpd::UNIT_SERIAL_NUMBER => {
            // serial derived from the target name, capped per SPC-3
            let serial = serial_from_name(target_name);
            let mut out = vec![0u8; 4 + serial.len()];
            out[1] = page_code;
            out[3] = serial.len() as u8;
            out[4..].copy_from_slice(&serial);
            Some(out)
        },
        vpd::DEVICE_IDENTIFICATION => {
            // one designator: the iSCSI name, UTF-8, target-scoped
            let name = target_name.as_bytes();
            let desc_len = 4 + name.len();
            let mut out = vec![0u8; 4 + desc_len];
            out[1] = page_code;
            out[2..4].copy_from_slice(&(desc_len as u16).to_be_bytes());
            out[4] = 0x53; // UTF-8 codeset, iSCSI protocol id
            out[5] = 0x88; // PIV=1, target scope, SCSI name string
            out[7] = name.len() as u8;
            out[8..].copy_from_slice(name);
            Some(out)
        },
        _ => None,
    }
}

fn serial_from_name(target_name: &str) -> Vec<u8> {
    let mut serial: Vec<u8> = target_name
        .bytes()
        .rev()
        .take(16)
        .filter(u8::is_ascii_alphanumeric)
        .collect();
    serial.reverse();
    if serial.is_empty() {
        serial.extend_from_slice(b"0");
    }
    serial
}
