// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Text key=value negotiation (RFC 3720 § 5, § 12).
//!
//! Each recognized key follows one of five disposition rules:
//!
//! * **Declarative** — the initiator states, the target accepts
//!   (InitiatorName, TargetName, SessionType, ...).  No response line.
//! * **Boolean-AND** — result is the conjunction of the offer and the
//!   target preference (InitialR2T prefers No, ImmediateData prefers
//!   Yes).
//! * **List-pick** — the offer is a preference list; the first entry
//!   the target supports wins (HeaderDigest, DataDigest, AuthMethod).
//! * **Minimum-of** — numeric keys resolve to min(offer, target
//!   preference).
//! * **Literal** — the offer is echoed back.
//!
//! Responses keep the initiator's offer order; anything the target
//! originates is appended by the login handler.  Unknown keys answer
//! `NotUnderstood`.  A "sloppy" mode tolerates missing required keys
//! for the benefit of permissive initiators.

use thiserror::Error;

use crate::{
    cfg::enums::{Digest, SessionType, YesNo},
    negotiation::settings::SettingsBuilder,
};

/// Target-side preferences the Minimum-of keys resolve against.
mod prefer {
    pub const MAX_RECV_DATA_SEGMENT_LENGTH: u32 = 262_144;
    pub const MAX_BURST_LENGTH: u32 = 262_144;
    pub const FIRST_BURST_LENGTH: u32 = 65_536;
    pub const DEFAULT_TIME2WAIT: u16 = 2;
    pub const DEFAULT_TIME2RETAIN: u16 = 20;
    pub const MAX_OUTSTANDING_R2T: u16 = 1;
    pub const ERROR_RECOVERY_LEVEL: u8 = 0;
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NegotiationError {
    #[error("malformed key=value entry: {0:?}")]
    Malformed(String),

    #[error("missing required key {0}")]
    MissingRequiredKey(&'static str),

    #[error("no acceptable value for {key}: offered {offered:?}")]
    Irreconcilable { key: String, offered: String },

    #[error("bad value for {key}: {value:?}")]
    BadValue { key: String, value: String },
}

/// Splits a login/text data segment into `(key, value)` pairs.  Entries
/// are NUL-terminated; a trailing NUL is optional on the last one.
pub fn parse_text_keys(blob: &[u8]) -> Result<Vec<(String, String)>, NegotiationError> {
    let mut out = Vec::new();
    for chunk in blob.split(|&b| b == 0) {
        if chunk.is_empty() {
            continue;
        }
        let s = std::str::from_utf8(chunk)
            .map_err(|_| NegotiationError::Malformed(String::from_utf8_lossy(chunk).into_owned()))?;
        let (k, v) = s
            .split_once('=')
            .ok_or_else(|| NegotiationError::Malformed(s.to_string()))?;
        if k.is_empty() {
            return Err(NegotiationError::Malformed(s.to_string()));
        }
        out.push((k.to_string(), v.to_string()));
    }
    Ok(out)
}

/// Serializes response pairs back into a NUL-terminated blob.
pub fn render_text_keys(pairs: &[(String, String)]) -> Vec<u8> {
    let mut out = Vec::with_capacity(
        pairs.iter().map(|(k, v)| k.len() + 1 + v.len() + 1).sum(),
    );
    for (k, v) in pairs {
        out.extend_from_slice(k.as_bytes());
        out.push(b'=');
        out.extend_from_slice(v.as_bytes());
        out.push(0);
    }
    out
}

fn parse_bool(key: &str, value: &str) -> Result<bool, NegotiationError> {
    YesNo::from_wire(value)
        .map(YesNo::as_bool)
        .ok_or_else(|| NegotiationError::BadValue {
            key: key.to_string(),
            value: value.to_string(),
        })
}

fn parse_num<T>(key: &str, value: &str) -> Result<T, NegotiationError>
where T: std::str::FromStr {
    value.parse().map_err(|_| NegotiationError::BadValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn pick_digest(key: &str, offered: &str) -> Result<Digest, NegotiationError> {
    offered
        .split(',')
        .find_map(Digest::from_wire)
        .ok_or_else(|| NegotiationError::Irreconcilable {
            key: key.to_string(),
            offered: offered.to_string(),
        })
}

/// Runs one negotiation round: stages results into `builder` and
/// returns the response pairs in offer order.
pub fn negotiate(
    pairs: &[(String, String)],
    builder: &mut SettingsBuilder,
    sloppy: bool,
) -> Result<Vec<(String, String)>, NegotiationError> {
    let mut reply: Vec<(String, String)> = Vec::with_capacity(pairs.len());

    for (key, value) in pairs {
        match key.as_str() {
            // ---- Declarative: accepted, never echoed ----
            "InitiatorName" => {
                builder.session.initiator_name = value.clone();
            },
            "InitiatorAlias" => {
                builder.session.initiator_alias = Some(value.clone());
            },
            "TargetName" => {
                builder.session.target_name = Some(value.clone());
            },
            "SessionType" => match SessionType::from_wire(value) {
                Some(t) => builder.session.session_type = t,
                None if sloppy => {
                    builder.session.session_type = SessionType::Normal;
                },
                None => {
                    return Err(NegotiationError::BadValue {
                        key: key.clone(),
                        value: value.clone(),
                    });
                },
            },

            // ---- List-pick ----
            "AuthMethod" => {
                if !value.split(',').any(|m| m == "None") {
                    return Err(NegotiationError::Irreconcilable {
                        key: key.clone(),
                        offered: value.clone(),
                    });
                }
                reply.push((key.clone(), "None".to_string()));
            },
            "HeaderDigest" => {
                let d = pick_digest(key, value)?;
                builder.connection.header_digest = d;
                reply.push((key.clone(), d.to_string()));
            },
            "DataDigest" => {
                let d = pick_digest(key, value)?;
                builder.connection.data_digest = d;
                reply.push((key.clone(), d.to_string()));
            },

            // ---- Boolean-AND (target preference in the comment) ----
            "InitialR2T" => {
                // AND with the target preference No: the result is No
                // whatever was offered, the offer is still validated
                parse_bool(key, value)?;
                builder.session.initial_r2t = false;
                reply.push((key.clone(), YesNo::No.to_string()));
            },
            "ImmediateData" => {
                // target prefers Yes: the offer decides
                let res = parse_bool(key, value)?;
                builder.session.immediate_data = res;
                reply.push((key.clone(), YesNo::from(res).to_string()));
            },

            // ---- Minimum-of ----
            "MaxRecvDataSegmentLength" => {
                let res = parse_num::<u32>(key, value)?
                    .min(prefer::MAX_RECV_DATA_SEGMENT_LENGTH);
                builder.connection.max_recv_data_segment_length = res;
                reply.push((key.clone(), res.to_string()));
            },
            "MaxBurstLength" => {
                let res =
                    parse_num::<u32>(key, value)?.min(prefer::MAX_BURST_LENGTH);
                builder.session.max_burst_length = res;
                reply.push((key.clone(), res.to_string()));
            },
            "FirstBurstLength" => {
                let res =
                    parse_num::<u32>(key, value)?.min(prefer::FIRST_BURST_LENGTH);
                builder.session.first_burst_length = res;
                reply.push((key.clone(), res.to_string()));
            },
            "DefaultTime2Wait" => {
                let res =
                    parse_num::<u16>(key, value)?.min(prefer::DEFAULT_TIME2WAIT);
                builder.session.default_time2wait = res;
                reply.push((key.clone(), res.to_string()));
            },
            "DefaultTime2Retain" => {
                let res =
                    parse_num::<u16>(key, value)?.min(prefer::DEFAULT_TIME2RETAIN);
                builder.session.default_time2retain = res;
                reply.push((key.clone(), res.to_string()));
            },
            "MaxOutstandingR2T" => {
                let res =
                    parse_num::<u16>(key, value)?.min(prefer::MAX_OUTSTANDING_R2T);
                builder.session.max_outstanding_r2t = res;
                reply.push((key.clone(), res.to_string()));
            },
            "ErrorRecoveryLevel" => {
                let res =
                    parse_num::<u8>(key, value)?.min(prefer::ERROR_RECOVERY_LEVEL);
                builder.session.error_recovery_level = res;
                reply.push((key.clone(), res.to_string()));
            },
            "MaxConnections" => {
                // negotiated but enforced as 1: clamp, do not error
                let _ = parse_num::<u16>(key, value)?;
                builder.session.max_connections = 1;
                reply.push((key.clone(), "1".to_string()));
            },

            // ---- Literal echo ----
            "DataPDUInOrder" => {
                builder.session.data_pdu_in_order = parse_bool(key, value)?;
                reply.push((key.clone(), value.clone()));
            },
            "DataSequenceInOrder" => {
                builder.session.data_sequence_in_order = parse_bool(key, value)?;
                reply.push((key.clone(), value.clone()));
            },

            // stream markers are never supported
            "OFMarker" | "IFMarker" => {
                reply.push((key.clone(), "No".to_string()));
            },

            _ => {
                reply.push((key.clone(), "NotUnderstood".to_string()));
            },
        }
    }

    Ok(reply)
}

/// Final check before the transition to full-feature phase.
pub fn check_required(
    builder: &SettingsBuilder,
    sloppy: bool,
) -> Result<(), NegotiationError> {
    if sloppy {
        return Ok(());
    }
    if builder.session.initiator_name.is_empty() {
        return Err(NegotiationError::MissingRequiredKey("InitiatorName"));
    }
    if builder.session.session_type.is_normal()
        && builder.session.target_name.is_none()
    {
        return Err(NegotiationError::MissingRequiredKey("TargetName"));
    }
    Ok(())
}
