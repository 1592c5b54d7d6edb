// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::Result;
use iscsi_target_rs::{
    cfg::enums::{Digest, SessionType},
    negotiation::{
        negotiator::{
            NegotiationError, check_required, negotiate, parse_text_keys,
            render_text_keys,
        },
        settings::SettingsBuilder,
    },
};

fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
    items
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn reply_value<'a>(reply: &'a [(String, String)], key: &str) -> Option<&'a str> {
    reply.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
}

#[test]
fn parse_splits_nul_terminated_pairs() -> Result<()> {
    let blob = b"InitiatorName=iqn.1993-08.org.debian:01:cafe\0SessionType=Normal\0";
    let parsed = parse_text_keys(blob).expect("parse failed");
    assert_eq!(parsed.len(), 2);
    assert_eq!(parsed[0].0, "InitiatorName");
    assert_eq!(parsed[1], ("SessionType".to_string(), "Normal".to_string()));
    Ok(())
}

#[test]
fn parse_tolerates_missing_final_nul() {
    let parsed = parse_text_keys(b"HeaderDigest=None").expect("parse failed");
    assert_eq!(parsed, pairs(&[("HeaderDigest", "None")]));
}

#[test]
fn parse_rejects_entry_without_separator() {
    assert!(matches!(
        parse_text_keys(b"NoEqualsSign\0"),
        Err(NegotiationError::Malformed(_))
    ));
}

#[test]
fn render_is_parse_inverse() {
    let original = pairs(&[("HeaderDigest", "None"), ("MaxBurstLength", "4096")]);
    let blob = render_text_keys(&original);
    assert_eq!(parse_text_keys(&blob).expect("parse failed"), original);
}

#[test]
fn declarative_keys_stage_without_reply() {
    let mut builder = SettingsBuilder::default();
    let reply = negotiate(
        &pairs(&[
            ("InitiatorName", "iqn.x"),
            ("InitiatorAlias", "box"),
            ("TargetName", "iqn.tgt"),
            ("SessionType", "Discovery"),
        ]),
        &mut builder,
        false,
    )
    .expect("negotiate failed");

    assert!(reply.is_empty(), "declarative keys must not be echoed");
    assert_eq!(builder.session.initiator_name, "iqn.x");
    assert_eq!(builder.session.initiator_alias.as_deref(), Some("box"));
    assert_eq!(builder.session.target_name.as_deref(), Some("iqn.tgt"));
    assert_eq!(builder.session.session_type, SessionType::Discovery);
}

#[test]
fn digest_list_picks_first_supported() {
    let mut builder = SettingsBuilder::default();
    let reply = negotiate(
        &pairs(&[
            ("HeaderDigest", "CRC32C,None"),
            ("DataDigest", "None,CRC32C"),
        ]),
        &mut builder,
        false,
    )
    .expect("negotiate failed");

    assert_eq!(reply_value(&reply, "HeaderDigest"), Some("CRC32C"));
    assert_eq!(reply_value(&reply, "DataDigest"), Some("None"));
    assert_eq!(builder.connection.header_digest, Digest::CRC32C);
    assert_eq!(builder.connection.data_digest, Digest::None);
}

#[test]
fn digest_list_with_no_common_entry_fails() {
    let mut builder = SettingsBuilder::default();
    let err = negotiate(
        &pairs(&[("HeaderDigest", "MD5CRC,SHA1")]),
        &mut builder,
        false,
    )
    .expect_err("should fail");
    assert!(matches!(err, NegotiationError::Irreconcilable { .. }));
}

#[test]
fn initial_r2t_results_in_no() {
    // AND with the target preference No
    for offered in ["Yes", "No"] {
        let mut builder = SettingsBuilder::default();
        let reply = negotiate(
            &pairs(&[("InitialR2T", offered)]),
            &mut builder,
            false,
        )
        .expect("negotiate failed");
        assert_eq!(reply_value(&reply, "InitialR2T"), Some("No"));
        assert!(!builder.session.initial_r2t);
    }
}

#[test]
fn immediate_data_follows_the_offer() {
    let mut builder = SettingsBuilder::default();
    let reply = negotiate(&pairs(&[("ImmediateData", "No")]), &mut builder, false)
        .expect("negotiate failed");
    assert_eq!(reply_value(&reply, "ImmediateData"), Some("No"));
    assert!(!builder.session.immediate_data);
}

#[test]
fn numeric_keys_resolve_to_minimum() {
    let mut builder = SettingsBuilder::default();
    let reply = negotiate(
        &pairs(&[
            ("MaxRecvDataSegmentLength", "8192"),
            ("MaxBurstLength", "1048576"),
            ("FirstBurstLength", "4096"),
            ("DefaultTime2Wait", "10"),
            ("DefaultTime2Retain", "5"),
            ("MaxOutstandingR2T", "8"),
            ("ErrorRecoveryLevel", "2"),
        ]),
        &mut builder,
        false,
    )
    .expect("negotiate failed");

    // below the target preference: the offer wins
    assert_eq!(reply_value(&reply, "MaxRecvDataSegmentLength"), Some("8192"));
    // above the target preference: the preference wins
    assert_eq!(reply_value(&reply, "MaxBurstLength"), Some("262144"));
    assert_eq!(reply_value(&reply, "FirstBurstLength"), Some("4096"));
    // DefaultTime2Wait prefers 2, DefaultTime2Retain prefers 20
    assert_eq!(reply_value(&reply, "DefaultTime2Wait"), Some("2"));
    assert_eq!(reply_value(&reply, "DefaultTime2Retain"), Some("5"));
    assert_eq!(reply_value(&reply, "MaxOutstandingR2T"), Some("1"));
    assert_eq!(reply_value(&reply, "ErrorRecoveryLevel"), Some("0"));

    assert_eq!(builder.connection.max_recv_data_segment_length, 8192);
    assert_eq!(builder.session.max_burst_length, 262_144);
    assert_eq!(builder.session.error_recovery_level, 0);
}

#[test]
fn max_connections_is_clamped_to_one() {
    let mut builder = SettingsBuilder::default();
    let reply = negotiate(&pairs(&[("MaxConnections", "8")]), &mut builder, false)
        .expect("negotiate failed");
    assert_eq!(reply_value(&reply, "MaxConnections"), Some("1"));
    assert_eq!(builder.session.max_connections, 1);
}

#[test]
fn literal_keys_echo_the_offer() {
    let mut builder = SettingsBuilder::default();
    let reply = negotiate(
        &pairs(&[("DataPDUInOrder", "Yes"), ("DataSequenceInOrder", "Yes")]),
        &mut builder,
        false,
    )
    .expect("negotiate failed");
    assert_eq!(reply_value(&reply, "DataPDUInOrder"), Some("Yes"));
    assert_eq!(reply_value(&reply, "DataSequenceInOrder"), Some("Yes"));
}

#[test]
fn markers_are_always_refused() {
    let mut builder = SettingsBuilder::default();
    let reply = negotiate(
        &pairs(&[("OFMarker", "Yes"), ("IFMarker", "No")]),
        &mut builder,
        false,
    )
    .expect("negotiate failed");
    assert_eq!(reply_value(&reply, "OFMarker"), Some("No"));
    assert_eq!(reply_value(&reply, "IFMarker"), Some("No"));
}

#[test]
fn unknown_key_answers_not_understood() {
    let mut builder = SettingsBuilder::default();
    let reply = negotiate(
        &pairs(&[("X-com.example.flag", "1")]),
        &mut builder,
        false,
    )
    .expect("negotiate failed");
    assert_eq!(reply_value(&reply, "X-com.example.flag"), Some("NotUnderstood"));
}

#[test]
fn auth_method_none_is_accepted() {
    let mut builder = SettingsBuilder::default();
    let reply = negotiate(
        &pairs(&[("AuthMethod", "CHAP,None")]),
        &mut builder,
        false,
    )
    .expect("negotiate failed");
    assert_eq!(reply_value(&reply, "AuthMethod"), Some("None"));
}

#[test]
fn auth_method_chap_only_is_irreconcilable() {
    let mut builder = SettingsBuilder::default();
    let err = negotiate(&pairs(&[("AuthMethod", "CHAP")]), &mut builder, false)
        .expect_err("should fail");
    assert!(matches!(
        err,
        NegotiationError::Irreconcilable { ref key, .. } if key == "AuthMethod"
    ));
}

#[test]
fn bad_boolean_value_fails() {
    let mut builder = SettingsBuilder::default();
    let err = negotiate(&pairs(&[("ImmediateData", "Maybe")]), &mut builder, false)
        .expect_err("should fail");
    assert!(matches!(err, NegotiationError::BadValue { .. }));
}

#[test]
fn required_keys_enforced_in_strict_mode() {
    let builder = SettingsBuilder::default();
    assert!(matches!(
        check_required(&builder, false),
        Err(NegotiationError::MissingRequiredKey("InitiatorName"))
    ));

    let mut named = SettingsBuilder::default();
    named.session.initiator_name = "iqn.x".to_string();
    assert!(matches!(
        check_required(&named, false),
        Err(NegotiationError::MissingRequiredKey("TargetName"))
    ));

    named.session.target_name = Some("iqn.tgt".to_string());
    assert!(check_required(&named, false).is_ok());
}

#[test]
fn sloppy_mode_waives_required_keys() {
    let builder = SettingsBuilder::default();
    assert!(check_required(&builder, true).is_ok());

    // an invalid session type also passes, defaulting to Normal
    let mut b = SettingsBuilder::default();
    let reply = negotiate(&pairs(&[("SessionType", "Weird")]), &mut b, true)
        .expect("sloppy negotiate failed");
    assert!(reply.is_empty());
    assert_eq!(b.session.session_type, SessionType::Normal);
}
