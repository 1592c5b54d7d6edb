// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::Result;
use iscsi_target_rs::{
    control_block::test_unit_ready::build_test_unit_ready,
    models::{
        command::{
            common::ScsiStatus,
            request::{ScsiCommandRequest, ScsiCommandRequestBuilder},
        },
        common::BHS_LEN,
        data_format::PduFrame,
        opcode::Opcode,
        reject::{reason::RejectReason, response::RejectPdu},
    },
};
use serial_test::serial;

use crate::integration_tests::common::{Initiator, spawn_target_with_blocks};

#[tokio::test]
#[serial]
async fn corrupted_header_digest_draws_a_reject() -> Result<()> {
    let target = spawn_target_with_blocks(64).await?;
    let mut init = Initiator::connect(target.addr).await?;
    init.login_normal(&[("HeaderDigest", "CRC32C")]).await?;
    assert!(init.digests.header);

    // a well-formed TEST UNIT READY, then one bit of the digest flipped
    let mut cdb = [0u8; 16];
    build_test_unit_ready(&mut cdb);

    let itt = init.next_itt();
    let builder = ScsiCommandRequestBuilder::new()
        .lun(0)
        .initiator_task_tag(itt)
        .cmd_sn(init.cmd_sn)
        .exp_stat_sn(init.exp_stat_sn)
        .cdb(&cdb);
    let mut bhs = [0u8; BHS_LEN];
    builder.header.to_bhs_bytes(&mut bhs)?;
    let mut frame = PduFrame::<ScsiCommandRequest>::new_reply(bhs, init.digests);
    let (hdr, mut body) = frame.build()?;

    // the header digest is the first trailer word
    body[0] ^= 0x01;
    init.send_raw(&hdr).await?;
    init.send_raw(&body).await?;

    let (rbhs, rdata) = init.recv().await?;
    assert_eq!(rbhs[0] & 0x3f, Opcode::Reject as u8);
    let reject = RejectPdu::from_bhs_bytes(&rbhs)?;
    assert_eq!(
        reject.reason.decode().expect("reason"),
        RejectReason::HeaderDigestError
    );
    // the rejected header rides in the data segment
    assert_eq!(&rdata[..BHS_LEN], &hdr);
    init.exp_stat_sn = reject.stat_sn.get().wrapping_add(1);

    // the connection is still usable: same command, intact digest
    init.send_scsi(&cdb, 0, false, false, &[]).await?;
    let (_, status, _) = init.collect_data_in().await?;
    assert_eq!(status, u8::from(ScsiStatus::Good));

    Ok(())
}

#[tokio::test]
#[serial]
async fn corrupted_data_digest_draws_a_reject() -> Result<()> {
    let target = spawn_target_with_blocks(64).await?;
    let mut init = Initiator::connect(target.addr).await?;
    init.login_normal(&[("DataDigest", "CRC32C"), ("ImmediateData", "Yes")])
        .await?;
    assert!(init.digests.data);

    // WRITE(10) of one block carried entirely as immediate data
    let mut cdb = [0u8; 16];
    iscsi_target_rs::control_block::write::build_write10(&mut cdb, 0, 1);

    let itt = init.next_itt();
    let builder = ScsiCommandRequestBuilder::new()
        .write()
        .lun(0)
        .initiator_task_tag(itt)
        .expected_data_transfer_length(512)
        .cmd_sn(init.cmd_sn)
        .exp_stat_sn(init.exp_stat_sn)
        .cdb(&cdb);
    let mut bhs = [0u8; BHS_LEN];
    builder.header.to_bhs_bytes(&mut bhs)?;
    let mut frame = PduFrame::<ScsiCommandRequest>::new_reply(bhs, init.digests);
    frame.append_data(&[0x5a; 512]);
    let (hdr, mut body) = frame.build()?;

    // the data digest is the last trailer word
    let last = body.len() - 1;
    body[last] ^= 0x80;
    init.send_raw(&hdr).await?;
    init.send_raw(&body).await?;

    let (rbhs, _) = init.recv().await?;
    let reject = RejectPdu::from_bhs_bytes(&rbhs)?;
    assert_eq!(
        reject.reason.decode().expect("reason"),
        RejectReason::DataDigestError
    );
    init.exp_stat_sn = reject.stat_sn.get().wrapping_add(1);

    Ok(())
}
