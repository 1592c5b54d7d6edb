// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! SCSI Command Descriptor Block handling.
//!
//! [`Cdb::parse`] turns the 16-byte CDB of a SCSI Command PDU into a
//! typed sum keyed on opcode byte 0; the per-command modules also build
//! the parameter data the target returns (INQUIRY pages, capacity data,
//! LUN inventory, mode pages).

pub mod common;
pub mod inquiry;
pub mod mode_sense;
pub mod read;
pub mod read_capacity;
pub mod report_luns;
pub mod request_sense;
pub mod start_stop;
pub mod sync_cache;
pub mod test_unit_ready;
pub mod write;

use anyhow::Result;

use crate::control_block::{
    common::op,
    inquiry::InquiryCdb,
    mode_sense::ModeSense6Cdb,
    read::ReadCdb,
    read_capacity::{ReadCapacity10Cdb, ReadCapacity16Cdb},
    report_luns::ReportLunsCdb,
    request_sense::RequestSenseCdb,
    start_stop::StartStopUnitCdb,
    sync_cache::SynchronizeCache10Cdb,
    test_unit_ready::TestUnitReadyCdb,
    write::WriteCdb,
};

/// Typed view over the CDB of one SCSI command.
#[derive(Debug, PartialEq)]
pub enum Cdb {
    TestUnitReady(TestUnitReadyCdb),
    RequestSense(RequestSenseCdb),
    Inquiry(InquiryCdb),
    ModeSense6(ModeSense6Cdb),
    StartStopUnit(StartStopUnitCdb),
    ReadCapacity10(ReadCapacity10Cdb),
    Read(ReadCdb),
    Write(WriteCdb),
    SynchronizeCache(SynchronizeCache10Cdb),
    ReadCapacity16(ReadCapacity16Cdb),
    ReportLuns(ReportLunsCdb),
    /// Opcode outside the supported set; answered with CHECK CONDITION,
    /// ILLEGAL REQUEST, INVALID COMMAND OPERATION CODE.
    Unsupported(u8),
}

impl Cdb {
    pub fn parse(cdb: &[u8; 16]) -> Result<Self> {
        Ok(match cdb[0] {
            op::TEST_UNIT_READY => {
                Cdb::TestUnitReady(TestUnitReadyCdb::parse(cdb)?)
            },
            op::REQUEST_SENSE => Cdb::RequestSense(RequestSenseCdb::parse(cdb)?),
            op::INQUIRY => Cdb::Inquiry(InquiryCdb::parse(cdb)?),
            op::MODE_SENSE_6 => Cdb::ModeSense6(ModeSense6Cdb::parse(cdb)?),
            op::START_STOP_UNIT => {
                Cdb::StartStopUnit(StartStopUnitCdb::parse(cdb)?)
            },
            op::READ_CAPACITY_10 => {
                Cdb::ReadCapacity10(ReadCapacity10Cdb::parse(cdb)?)
            },
            op::READ_10 | op::READ_16 => Cdb::Read(ReadCdb::parse(cdb)?),
            op::WRITE_10 | op::WRITE_16 => Cdb::Write(WriteCdb::parse(cdb)?),
            op::SYNCHRONIZE_CACHE_10 => {
                Cdb::SynchronizeCache(SynchronizeCache10Cdb::parse(cdb)?)
            },
            op::SERVICE_ACTION_IN_16
                if cdb[1] & 0x1f == op::SA_READ_CAPACITY_16 =>
            {
                Cdb::ReadCapacity16(ReadCapacity16Cdb::parse(cdb)?)
            },
            op::REPORT_LUNS => Cdb::ReportLuns(ReportLunsCdb::parse(cdb)?),
            other => Cdb::Unsupported(other),
        })
    }
}
