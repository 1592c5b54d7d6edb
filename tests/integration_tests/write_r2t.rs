// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::Result;
use iscsi_target_rs::{
    control_block::{read::build_read10, write::build_write10},
    models::{
        command::common::ScsiStatus,
        common::BHS_LEN,
        data::request::{ScsiDataOut, ScsiDataOutBuilder},
        data_format::PduFrame,
        opcode::Opcode,
        ready_2_transfer::response::ReadyToTransfer,
    },
};
use serial_test::serial;

use crate::integration_tests::common::{Initiator, spawn_target_with_blocks};

#[tokio::test]
#[serial]
async fn write_via_r2t_then_read_back() -> Result<()> {
    let target = spawn_target_with_blocks(64).await?;
    let mut init = Initiator::connect(target.addr).await?;
    init.login_normal(&[
        ("InitialR2T", "Yes"),
        ("ImmediateData", "No"),
        ("MaxBurstLength", "4096"),
        ("FirstBurstLength", "4096"),
    ])
    .await?;

    // WRITE(10): 8 blocks = 4096 bytes, no immediate data
    let mut cdb = [0u8; 16];
    build_write10(&mut cdb, 0, 8);
    let itt = init.send_scsi(&cdb, 4096, false, true, &[]).await?;

    // the whole transfer is solicited by one R2T
    let (r2t_bhs, _) = init.recv().await?;
    assert_eq!(r2t_bhs[0] & 0x3f, Opcode::ReadyToTransfer as u8);
    let r2t = ReadyToTransfer::from_bhs_bytes(&r2t_bhs)?;
    assert_eq!(r2t.initiator_task_tag, itt);
    assert_ne!(r2t.target_transfer_tag.get(), 0xffff_ffff);
    assert_eq!(r2t.buffer_offset.get(), 0);
    assert_eq!(r2t.desired_data_transfer_length.get(), 4096);
    assert_eq!(r2t.r2t_sn.get(), 0);

    // answer with one final Data-Out burst
    let pattern: Vec<u8> = (0..4096u32).map(|i| (i % 253) as u8).collect();
    let builder = ScsiDataOutBuilder::new()
        .final_bit()
        .lun(0)
        .initiator_task_tag(itt)
        .target_transfer_tag(r2t.target_transfer_tag.get())
        .exp_stat_sn(init.exp_stat_sn)
        .data_sn(0)
        .buffer_offset(0);
    let mut bhs = [0u8; BHS_LEN];
    builder.header.to_bhs_bytes(&mut bhs)?;
    let mut frame = PduFrame::<ScsiDataOut>::new_reply(bhs, init.digests);
    frame.append_data(&pattern);
    init.send_frame(&mut frame).await?;

    let (_, status, _) = init.collect_data_in().await?;
    assert_eq!(status, u8::from(ScsiStatus::Good));

    // the same range reads back byte-identical
    let mut cdb = [0u8; 16];
    build_read10(&mut cdb, 0, 8);
    init.send_scsi(&cdb, 4096, true, false, &[]).await?;
    let (payload, status, _) = init.collect_data_in().await?;
    assert_eq!(status, u8::from(ScsiStatus::Good));
    assert_eq!(payload, pattern);

    Ok(())
}

#[tokio::test]
#[serial]
async fn large_write_is_solicited_in_max_burst_chunks() -> Result<()> {
    let target = spawn_target_with_blocks(64).await?;
    let mut init = Initiator::connect(target.addr).await?;
    init.login_normal(&[
        ("ImmediateData", "No"),
        ("MaxBurstLength", "4096"),
    ])
    .await?;

    // 16 blocks = 8192 bytes: two bursts of 4096
    let mut cdb = [0u8; 16];
    build_write10(&mut cdb, 8, 16);
    let itt = init.send_scsi(&cdb, 8192, false, true, &[]).await?;

    let pattern: Vec<u8> = (0..8192u32).map(|i| (i % 241) as u8).collect();
    let mut r2t_sn_seen = Vec::new();

    for _ in 0..2 {
        let (r2t_bhs, _) = init.recv().await?;
        assert_eq!(r2t_bhs[0] & 0x3f, Opcode::ReadyToTransfer as u8);
        let r2t = ReadyToTransfer::from_bhs_bytes(&r2t_bhs)?;
        r2t_sn_seen.push(r2t.r2t_sn.get());
        let offset = r2t.buffer_offset.get() as usize;
        let want = r2t.desired_data_transfer_length.get() as usize;
        assert_eq!(want, 4096);

        let builder = ScsiDataOutBuilder::new()
            .final_bit()
            .lun(0)
            .initiator_task_tag(itt)
            .target_transfer_tag(r2t.target_transfer_tag.get())
            .exp_stat_sn(init.exp_stat_sn)
            .buffer_offset(offset as u32);
        let mut bhs = [0u8; BHS_LEN];
        builder.header.to_bhs_bytes(&mut bhs)?;
        let mut frame = PduFrame::<ScsiDataOut>::new_reply(bhs, init.digests);
        frame.append_data(&pattern[offset..offset + want]);
        init.send_frame(&mut frame).await?;
    }
    assert_eq!(r2t_sn_seen, vec![0, 1]);

    let (_, status, _) = init.collect_data_in().await?;
    assert_eq!(status, u8::from(ScsiStatus::Good));

    let mut cdb = [0u8; 16];
    build_read10(&mut cdb, 8, 16);
    init.send_scsi(&cdb, 8192, true, false, &[]).await?;
    let (payload, status, _) = init.collect_data_in().await?;
    assert_eq!(status, u8::from(ScsiStatus::Good));
    assert_eq!(payload, pattern);

    Ok(())
}

#[tokio::test]
#[serial]
async fn immediate_data_completes_without_r2t() -> Result<()> {
    let target = spawn_target_with_blocks(64).await?;
    let mut init = Initiator::connect(target.addr).await?;
    init.login_normal(&[("ImmediateData", "Yes")]).await?;

    let pattern = vec![0xc3u8; 512];
    let mut cdb = [0u8; 16];
    build_write10(&mut cdb, 4, 1);
    init.send_scsi(&cdb, 512, false, true, &pattern).await?;

    // straight to the status, no solicitation round
    let (_, status, _) = init.collect_data_in().await?;
    assert_eq!(status, u8::from(ScsiStatus::Good));

    let mut cdb = [0u8; 16];
    build_read10(&mut cdb, 4, 1);
    init.send_scsi(&cdb, 512, true, false, &[]).await?;
    let (payload, status, _) = init.collect_data_in().await?;
    assert_eq!(status, u8::from(ScsiStatus::Good));
    assert_eq!(payload, pattern);

    Ok(())
}
