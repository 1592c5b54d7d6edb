// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::Result;
use iscsi_target_rs::{
    models::{
        common::BHS_LEN,
        data_format::PduFrame,
        opcode::Opcode,
        text::{
            request::{TextRequest, TextRequestBuilder},
            response::TextResponse,
        },
    },
    negotiation::negotiator::parse_text_keys,
};
use serial_test::serial;

use crate::integration_tests::common::{
    Initiator, TARGET_IQN, spawn_target_with_blocks,
};

#[tokio::test]
#[serial]
async fn discovery_send_targets_lists_the_registry() -> Result<()> {
    let target = spawn_target_with_blocks(64).await?;
    let mut init = Initiator::connect(target.addr).await?;
    init.login_discovery().await?;

    let itt = init.next_itt();
    let builder = TextRequestBuilder::new()
        .final_bit()
        .initiator_task_tag(itt)
        .cmd_sn(init.cmd_sn)
        .exp_stat_sn(init.exp_stat_sn);
    let mut bhs = [0u8; BHS_LEN];
    builder.header.to_bhs_bytes(&mut bhs)?;
    let mut frame = PduFrame::<TextRequest>::new_reply(bhs, init.digests);
    frame.append_data(b"SendTargets=All\0");
    init.send_frame(&mut frame).await?;
    init.cmd_sn = init.cmd_sn.wrapping_add(1);

    let (rbhs, rdata) = init.recv().await?;
    assert_eq!(rbhs[0] & 0x3f, Opcode::TextResp as u8);
    let resp = TextResponse::from_bhs_bytes(&rbhs)?;
    assert!(resp.flags.fin());
    assert_eq!(resp.initiator_task_tag, itt);
    init.exp_stat_sn = resp.stat_sn.get().wrapping_add(1);

    let pairs = parse_text_keys(&rdata).expect("reply keys");
    let names: Vec<_> = pairs
        .iter()
        .filter(|(k, _)| k == "TargetName")
        .map(|(_, v)| v.as_str())
        .collect();
    assert_eq!(names, vec![TARGET_IQN]);
    assert!(
        pairs.iter().any(|(k, v)| k == "TargetAddress" && v.ends_with(",1")),
        "portal address with portal group tag"
    );

    Ok(())
}

#[tokio::test]
#[serial]
async fn unknown_text_key_is_not_understood() -> Result<()> {
    let target = spawn_target_with_blocks(64).await?;
    let mut init = Initiator::connect(target.addr).await?;
    init.login_normal(&[]).await?;

    let itt = init.next_itt();
    let builder = TextRequestBuilder::new()
        .final_bit()
        .initiator_task_tag(itt)
        .cmd_sn(init.cmd_sn)
        .exp_stat_sn(init.exp_stat_sn);
    let mut bhs = [0u8; BHS_LEN];
    builder.header.to_bhs_bytes(&mut bhs)?;
    let mut frame = PduFrame::<TextRequest>::new_reply(bhs, init.digests);
    frame.append_data(b"X-com.example.custom=1\0");
    init.send_frame(&mut frame).await?;
    init.cmd_sn = init.cmd_sn.wrapping_add(1);

    let (rbhs, rdata) = init.recv().await?;
    let resp = TextResponse::from_bhs_bytes(&rbhs)?;
    init.exp_stat_sn = resp.stat_sn.get().wrapping_add(1);

    let pairs = parse_text_keys(&rdata).expect("reply keys");
    assert_eq!(
        pairs,
        vec![("X-com.example.custom".to_string(), "NotUnderstood".to_string())]
    );
    Ok(())
}
