// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::Result;
use iscsi_target_rs::models::{
    common::BHS_LEN,
    data_format::PduFrame,
    nop::{
        request::{NopOutRequest, NopOutRequestBuilder},
        response::NopInResponse,
    },
    opcode::Opcode,
};
use serial_test::serial;

use crate::integration_tests::common::{Initiator, spawn_target_with_blocks};

#[tokio::test]
#[serial]
async fn nop_ping_echoes_the_payload() -> Result<()> {
    let target = spawn_target_with_blocks(64).await?;
    let mut init = Initiator::connect(target.addr).await?;
    init.login_normal(&[]).await?;

    let itt = init.next_itt();
    let builder = NopOutRequestBuilder::new()
        .immediate()
        .lun(0)
        .initiator_task_tag(itt)
        .cmd_sn(init.cmd_sn)
        .exp_stat_sn(init.exp_stat_sn);
    let mut bhs = [0u8; BHS_LEN];
    builder.header.to_bhs_bytes(&mut bhs)?;
    let mut frame = PduFrame::<NopOutRequest>::new_reply(bhs, init.digests);
    frame.append_data(b"are you alive?");
    init.send_frame(&mut frame).await?;

    let (rbhs, rdata) = init.recv().await?;
    assert_eq!(rbhs[0] & 0x3f, Opcode::NopIn as u8);
    let resp = NopInResponse::from_bhs_bytes(&rbhs)?;
    assert_eq!(resp.initiator_task_tag, itt);
    assert_eq!(
        resp.target_transfer_tag.get(),
        NopInResponse::RESERVED_TAG,
        "echo NOP-In never solicits a reply"
    );
    assert_eq!(rdata, b"are you alive?");
    init.exp_stat_sn = resp.stat_sn.get().wrapping_add(1);

    // an immediate ping must not consume a CmdSN slot: a command with
    // the same CmdSN still executes
    let mut cdb = [0u8; 16];
    iscsi_target_rs::control_block::test_unit_ready::build_test_unit_ready(
        &mut cdb,
    );
    let before = init.exp_stat_sn;
    init.send_scsi(&cdb, 0, false, false, &[]).await?;
    let (_, status, _) = init.collect_data_in().await?;
    assert_eq!(status, 0x00);
    // StatSN advanced by exactly one across consecutive responses
    assert_eq!(init.exp_stat_sn, before.wrapping_add(1));

    Ok(())
}
