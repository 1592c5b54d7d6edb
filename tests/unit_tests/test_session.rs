// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::Arc;

use anyhow::Result;
use iscsi_target_rs::{
    negotiation::settings::{CMD_WINDOW, SettingsBuilder},
    server::session::{CmdGate, SessionRegistry},
};

const ISID: [u8; 6] = [0x00, 0x02, 0x3d, 0x01, 0x02, 0x03];

fn registry_with_session(
    initial_cmd_sn: u32,
) -> Result<(SessionRegistry, Arc<iscsi_target_rs::server::session::Session>)> {
    let registry = SessionRegistry::new();
    let mut builder = SettingsBuilder::default();
    builder.session.initiator_name = "iqn.initiator".to_string();
    let session = registry.create(ISID, initial_cmd_sn, builder.commit(), None)?;
    Ok((registry, session))
}

#[test]
fn tsih_is_nonzero_and_unique() -> Result<()> {
    let registry = SessionRegistry::new();
    let mut seen = std::collections::BTreeSet::new();
    for i in 0..16u8 {
        let mut isid = ISID;
        isid[5] = i;
        let session =
            registry.create(isid, 0, SettingsBuilder::default().commit(), None)?;
        assert_ne!(session.tsih, 0);
        assert!(seen.insert(session.tsih), "duplicate TSIH {}", session.tsih);
    }
    assert_eq!(registry.len(), 16);
    Ok(())
}

#[test]
fn duplicate_isid_per_target_is_refused() -> Result<()> {
    let (registry, _session) = registry_with_session(0)?;
    // same ISID, same (absent) target: reinstatement, unsupported
    assert!(
        registry
            .create(ISID, 0, SettingsBuilder::default().commit(), None)
            .is_err()
    );
    Ok(())
}

#[test]
fn window_gates_commands() -> Result<()> {
    let (_registry, session) = registry_with_session(100)?;

    let (exp, max) = session.cmd_window();
    assert_eq!(exp, 100);
    assert_eq!(max, 100 + CMD_WINDOW - 1);

    assert_eq!(session.admit(100, false), CmdGate::InOrder);
    assert_eq!(session.admit(101, false), CmdGate::Queue);
    assert_eq!(session.admit(100 + CMD_WINDOW - 1, false), CmdGate::Queue);
    // just past MaxCmdSN
    assert_eq!(session.admit(100 + CMD_WINDOW, false), CmdGate::Drop);
    // far behind ExpCmdSN
    assert_eq!(session.admit(42, false), CmdGate::Drop);
    // the I bit bypasses the window entirely
    assert_eq!(session.admit(9999, true), CmdGate::Immediate);
    Ok(())
}

#[test]
fn advance_slides_the_window() -> Result<()> {
    let (_registry, session) = registry_with_session(10)?;

    let (exp, max) = session.advance_cmd_sn();
    assert_eq!(exp, 11);
    assert_eq!(max, 11 + CMD_WINDOW - 1);

    assert_eq!(session.admit(10, false), CmdGate::Drop);
    assert_eq!(session.admit(11, false), CmdGate::InOrder);
    Ok(())
}

#[test]
fn window_survives_cmd_sn_wraparound() -> Result<()> {
    let start = u32::MAX - 2;
    let (_registry, session) = registry_with_session(start)?;

    assert_eq!(session.admit(start, false), CmdGate::InOrder);
    // wraps past zero but stays inside the window
    assert_eq!(session.admit(1, false), CmdGate::Queue);

    session.advance_cmd_sn();
    session.advance_cmd_sn();
    session.advance_cmd_sn();
    let (exp, _) = session.cmd_window();
    assert_eq!(exp, 0);
    assert_eq!(session.admit(0, false), CmdGate::InOrder);
    Ok(())
}

#[test]
fn sense_retention_is_take_once() -> Result<()> {
    use iscsi_target_rs::models::data::sense_data::{SenseData, asc, key};

    let (_registry, session) = registry_with_session(0)?;
    assert!(session.take_last_sense().is_none());

    session.set_last_sense(SenseData::current(
        key::ILLEGAL_REQUEST,
        asc::LBA_OUT_OF_RANGE,
    ));
    let sense = session.take_last_sense().expect("retained sense");
    assert_eq!(sense.asc, 0x21);
    // REQUEST SENSE clears the retained sense
    assert!(session.take_last_sense().is_none());
    Ok(())
}

#[test]
fn settings_republish_swaps_snapshots() -> Result<()> {
    let (_registry, session) = registry_with_session(0)?;
    let before = session.settings();

    let mut builder = SettingsBuilder::from_snapshot(&before);
    builder.session.max_burst_length = 1024;
    session.publish_settings(builder.commit());

    let after = session.settings();
    assert!(after.id > before.id);
    assert_eq!(after.session.max_burst_length, 1024);
    // the old snapshot is unchanged for whoever still holds it
    assert_ne!(before.session.max_burst_length, 1024);
    Ok(())
}

#[test]
fn removal_by_tsih() -> Result<()> {
    let (registry, session) = registry_with_session(0)?;
    assert!(registry.find(session.tsih).is_some());
    registry.remove(session.tsih);
    assert!(registry.find(session.tsih).is_none());
    assert!(registry.is_empty());
    Ok(())
}
