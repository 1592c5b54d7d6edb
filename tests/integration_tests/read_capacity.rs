// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::Result;
use iscsi_target_rs::{
    control_block::read_capacity::{
        build_read_capacity10, build_read_capacity16, parse_rc10, parse_rc16,
    },
    models::command::common::ScsiStatus,
};
use serial_test::serial;

use crate::integration_tests::common::{Initiator, spawn_target_with_blocks};

#[tokio::test]
#[serial]
async fn read_capacity10_on_one_mib_store() -> Result<()> {
    // 1 MiB = 2048 blocks of 512 bytes
    let target = spawn_target_with_blocks(2048).await?;
    let mut init = Initiator::connect(target.addr).await?;
    init.login_normal(&[]).await?;

    let mut cdb = [0u8; 16];
    build_read_capacity10(&mut cdb);
    init.send_scsi(&cdb, 8, true, false, &[]).await?;

    let (payload, status, _) = init.collect_data_in().await?;
    assert_eq!(status, u8::from(ScsiStatus::Good));

    let rc = parse_rc10(&payload)?;
    assert_eq!(rc.max_lba.get(), 0x0000_07ff);
    assert_eq!(rc.block_len.get(), 0x0000_0200);
    Ok(())
}

#[tokio::test]
#[serial]
async fn read_capacity16_agrees() -> Result<()> {
    let target = spawn_target_with_blocks(2048).await?;
    let mut init = Initiator::connect(target.addr).await?;
    init.login_normal(&[]).await?;

    let mut cdb = [0u8; 16];
    build_read_capacity16(&mut cdb, 32);
    init.send_scsi(&cdb, 32, true, false, &[]).await?;

    let (payload, status, _) = init.collect_data_in().await?;
    assert_eq!(status, u8::from(ScsiStatus::Good));

    let rc = parse_rc16(&payload)?;
    assert_eq!(rc.max_lba.get(), 2047);
    assert_eq!(rc.block_len.get(), 512);
    Ok(())
}
