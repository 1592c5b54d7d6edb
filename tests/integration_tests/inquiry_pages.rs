// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::Result;
use iscsi_target_rs::{
    control_block::inquiry::build_inquiry,
    models::{command::common::ScsiStatus, data::sense_data::SenseData},
};
use serial_test::serial;

use crate::integration_tests::common::{
    Initiator, TARGET_IQN, spawn_target_with_blocks,
};

#[tokio::test]
#[serial]
async fn standard_inquiry_identifies_a_disk() -> Result<()> {
    let target = spawn_target_with_blocks(64).await?;
    let mut init = Initiator::connect(target.addr).await?;
    init.login_normal(&[]).await?;

    let mut cdb = [0u8; 16];
    build_inquiry(&mut cdb, false, 0, 36);
    init.send_scsi(&cdb, 36, true, false, &[]).await?;

    let (payload, status, _) = init.collect_data_in().await?;
    assert_eq!(status, u8::from(ScsiStatus::Good));
    assert_eq!(payload.len(), 36);
    assert_eq!(payload[0], 0x00, "direct-access block device");
    assert_eq!(payload[2], 0x05, "SPC-3");
    assert_eq!(&payload[8..16], b"ISCSIRS ");

    Ok(())
}

#[tokio::test]
#[serial]
async fn vpd_device_identification_carries_the_iqn() -> Result<()> {
    let target = spawn_target_with_blocks(64).await?;
    let mut init = Initiator::connect(target.addr).await?;
    init.login_normal(&[]).await?;

    let mut cdb = [0u8; 16];
    build_inquiry(&mut cdb, true, 0x83, 255);
    init.send_scsi(&cdb, 255, true, false, &[]).await?;

    let (payload, status, _) = init.collect_data_in().await?;
    assert_eq!(status, u8::from(ScsiStatus::Good));
    assert_eq!(payload[1], 0x83);
    let tail = &payload[payload.len() - TARGET_IQN.len()..];
    assert_eq!(tail, TARGET_IQN.as_bytes());

    Ok(())
}

#[tokio::test]
#[serial]
async fn unsupported_vpd_page_is_an_illegal_request() -> Result<()> {
    let target = spawn_target_with_blocks(64).await?;
    let mut init = Initiator::connect(target.addr).await?;
    init.login_normal(&[]).await?;

    let mut cdb = [0u8; 16];
    build_inquiry(&mut cdb, true, 0xb1, 255);
    init.send_scsi(&cdb, 255, true, false, &[]).await?;

    let (_, status, sense_seg) = init.collect_data_in().await?;
    assert_eq!(status, u8::from(ScsiStatus::CheckCondition));
    let sense = SenseData::parse(&sense_seg)?;
    assert_eq!(sense.sense_key, 0x05);
    assert_eq!((sense.asc, sense.ascq), (0x24, 0x00), "INVALID FIELD IN CDB");

    Ok(())
}

#[tokio::test]
#[serial]
async fn unsupported_opcode_is_reported_as_such() -> Result<()> {
    let target = spawn_target_with_blocks(64).await?;
    let mut init = Initiator::connect(target.addr).await?;
    init.login_normal(&[]).await?;

    let mut cdb = [0u8; 16];
    cdb[0] = 0x42; // UNMAP, not in the supported set
    init.send_scsi(&cdb, 0, false, false, &[]).await?;

    let (_, status, sense_seg) = init.collect_data_in().await?;
    assert_eq!(status, u8::from(ScsiStatus::CheckCondition));
    let sense = SenseData::parse(&sense_seg)?;
    assert_eq!(sense.sense_key, 0x05);
    assert_eq!(
        (sense.asc, sense.ascq),
        (0x20, 0x00),
        "INVALID COMMAND OPERATION CODE"
    );

    Ok(())
}
