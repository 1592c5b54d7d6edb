// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Immutable negotiation snapshots.
//!
//! A [`Settings`] value never mutates after publication; each commit of
//! a [`SettingsBuilder`] produces a fresh snapshot with a process-wide
//! monotonically increasing id, and readers swap whole `Arc`s.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use crate::cfg::enums::{Digest, SessionType};

/// Sliding command window advertised to the initiator.
pub const CMD_WINDOW: u32 = 32;

static SETTINGS_ID: AtomicU64 = AtomicU64::new(0);

/// Connection-scoped negotiated keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
    pub header_digest: Digest,
    pub data_digest: Digest,
    /// Result of the MaxRecvDataSegmentLength negotiation: the cap on
    /// every data segment this connection sends.
    pub max_recv_data_segment_length: u32,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            header_digest: Digest::None,
            data_digest: Digest::None,
            // RFC 3720 default until negotiated otherwise
            max_recv_data_segment_length: 8192,
        }
    }
}

/// Session-scoped negotiated keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    pub session_type: SessionType,
    pub initiator_name: String,
    pub initiator_alias: Option<String>,
    pub target_name: Option<String>,

    pub max_connections: u16,
    pub initial_r2t: bool,
    pub immediate_data: bool,
    pub max_burst_length: u32,
    pub first_burst_length: u32,
    pub default_time2wait: u16,
    pub default_time2retain: u16,
    pub max_outstanding_r2t: u16,
    pub data_pdu_in_order: bool,
    pub data_sequence_in_order: bool,
    pub error_recovery_level: u8,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            session_type: SessionType::Normal,
            initiator_name: String::new(),
            initiator_alias: None,
            target_name: None,
            max_connections: 1,
            initial_r2t: true,
            immediate_data: true,
            max_burst_length: 262_144,
            first_burst_length: 65_536,
            default_time2wait: 2,
            default_time2retain: 20,
            max_outstanding_r2t: 1,
            data_pdu_in_order: true,
            data_sequence_in_order: true,
            error_recovery_level: 0,
        }
    }
}

/// One published snapshot.  `id` increases with every commit, so a
/// reader can tell stale references from current ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub id: u64,
    pub connection: ConnectionSettings,
    pub session: SessionSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            id: 0,
            connection: ConnectionSettings::default(),
            session: SessionSettings::default(),
        }
    }
}

impl Settings {
    pub fn header_digest_enabled(&self) -> bool {
        self.connection.header_digest.is_crc32c()
    }

    pub fn data_digest_enabled(&self) -> bool {
        self.connection.data_digest.is_crc32c()
    }
}

/// Mutable staging area the negotiator writes into.  Committing seals
/// the staged values into a new immutable snapshot.
#[derive(Debug, Default, Clone)]
pub struct SettingsBuilder {
    pub connection: ConnectionSettings,
    pub session: SessionSettings,
}

impl SettingsBuilder {
    pub fn from_snapshot(snapshot: &Settings) -> Self {
        Self {
            connection: snapshot.connection.clone(),
            session: snapshot.session.clone(),
        }
    }

    /// Seal the staged values; the new snapshot's id is strictly
    /// greater than every previously committed one.
    pub fn commit(self) -> Arc<Settings> {
        let id = SETTINGS_ID.fetch_add(1, Ordering::Relaxed) + 1;
        Arc::new(Settings {
            id,
            connection: self.connection,
            session: self.session,
        })
    }
}
