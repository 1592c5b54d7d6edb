// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use iscsi_target_rs::{
    cfg::enums::Digest,
    negotiation::settings::{Settings, SettingsBuilder},
};

#[test]
fn commit_produces_increasing_ids() {
    let first = SettingsBuilder::default().commit();
    let second = SettingsBuilder::default().commit();
    assert!(second.id > first.id, "{} !> {}", second.id, first.id);
}

#[test]
fn snapshot_survives_later_builder_changes() {
    let mut builder = SettingsBuilder::default();
    builder.connection.header_digest = Digest::CRC32C;
    builder.session.max_burst_length = 4096;

    let snapshot = builder.clone().commit();
    assert_eq!(snapshot.connection.header_digest, Digest::CRC32C);
    assert_eq!(snapshot.session.max_burst_length, 4096);

    // keep negotiating; the published snapshot must not move
    builder.connection.header_digest = Digest::None;
    builder.session.max_burst_length = 512;

    assert_eq!(snapshot.connection.header_digest, Digest::CRC32C);
    assert_eq!(snapshot.session.max_burst_length, 4096);

    let newer = builder.commit();
    assert!(newer.id > snapshot.id);
    assert_eq!(newer.connection.header_digest, Digest::None);
}

#[test]
fn builder_from_snapshot_carries_values_forward() {
    let mut builder = SettingsBuilder::default();
    builder.session.initiator_name = "iqn.initiator".to_string();
    builder.connection.max_recv_data_segment_length = 16384;
    let snapshot = builder.commit();

    let carried = SettingsBuilder::from_snapshot(&snapshot);
    assert_eq!(carried.session.initiator_name, "iqn.initiator");
    assert_eq!(carried.connection.max_recv_data_segment_length, 16384);
}

#[test]
fn rfc_defaults() {
    let s = Settings::default();
    assert_eq!(s.id, 0);
    assert_eq!(s.connection.max_recv_data_segment_length, 8192);
    assert_eq!(s.connection.header_digest, Digest::None);
    assert_eq!(s.session.max_burst_length, 262_144);
    assert_eq!(s.session.first_burst_length, 65_536);
    assert_eq!(s.session.max_connections, 1);
    assert_eq!(s.session.error_recovery_level, 0);
    assert!(!s.header_digest_enabled());
    assert!(!s.data_digest_enabled());
}
