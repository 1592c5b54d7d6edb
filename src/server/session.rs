// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::{
    Arc, Mutex, RwLock, Weak,
    atomic::{AtomicU16, Ordering},
};

use anyhow::{Result, bail};
use dashmap::DashMap;
use tracing::{debug, info};

use crate::{
    cfg::enums::SessionType,
    models::data::sense_data::SenseData,
    negotiation::settings::{CMD_WINDOW, Settings},
    server::{connection::Connection, registry::TargetEntry},
};

/// How the CmdSN window gates one arriving command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmdGate {
    /// I-bit set: execute on arrival, window untouched.
    Immediate,
    /// CmdSN == ExpCmdSN: execute now, advance on completion.
    InOrder,
    /// Ahead of ExpCmdSN but inside the window: hold by CmdSN.
    Queue,
    /// Outside [ExpCmdSN, MaxCmdSN]: silently dropped.
    Drop,
}

#[derive(Debug, Clone, Copy)]
struct CmdWindow {
    exp_cmd_sn: u32,
    max_cmd_sn: u32,
}

/// One live session: the unit that owns the command window, the
/// negotiated identity, and (for Normal sessions) the bound target.
///
/// The session owns weak references to its connections; each connection
/// holds a strong `Arc<Session>`, so teardown cannot double-drop
/// either side.
pub struct Session {
    pub tsih: u16,
    pub isid: [u8; 6],
    pub session_type: SessionType,
    pub initiator_name: String,

    /// Bound target; `None` for Discovery sessions.
    pub target: Option<Arc<TargetEntry>>,

    window: Mutex<CmdWindow>,
    settings: RwLock<Arc<Settings>>,
    last_sense: Mutex<Option<SenseData>>,

    /// Live connections by CID (MaxConnections=1, so at most one).
    pub connections: DashMap<u16, Weak<Connection>>,
}

impl Session {
    fn new(
        tsih: u16,
        isid: [u8; 6],
        initial_cmd_sn: u32,
        settings: Arc<Settings>,
        target: Option<Arc<TargetEntry>>,
    ) -> Self {
        Self {
            tsih,
            isid,
            session_type: settings.session.session_type,
            initiator_name: settings.session.initiator_name.clone(),
            target,
            window: Mutex::new(CmdWindow {
                exp_cmd_sn: initial_cmd_sn,
                max_cmd_sn: initial_cmd_sn.wrapping_add(CMD_WINDOW - 1),
            }),
            settings: RwLock::new(settings),
            last_sense: Mutex::new(None),
            connections: DashMap::new(),
        }
    }

    /// Gate an arriving command against the window.  Uses serial
    /// arithmetic so CmdSN wrap is handled.
    pub fn admit(&self, cmd_sn: u32, immediate: bool) -> CmdGate {
        if immediate {
            return CmdGate::Immediate;
        }
        let w = match self.window.lock() {
            Ok(w) => *w,
            Err(_) => return CmdGate::Drop,
        };
        let ahead = cmd_sn.wrapping_sub(w.exp_cmd_sn);
        match ahead {
            0 => CmdGate::InOrder,
            d if d < CMD_WINDOW => CmdGate::Queue,
            _ => {
                debug!(
                    cmd_sn,
                    exp_cmd_sn = w.exp_cmd_sn,
                    max_cmd_sn = w.max_cmd_sn,
                    "command outside window, dropped"
                );
                CmdGate::Drop
            },
        }
    }

    /// Current `(ExpCmdSN, MaxCmdSN)` pair for response headers.
    pub fn cmd_window(&self) -> (u32, u32) {
        match self.window.lock() {
            Ok(w) => (w.exp_cmd_sn, w.max_cmd_sn),
            Err(_) => (0, 0),
        }
    }

    /// Completes one non-immediate command: slides the window forward.
    pub fn advance_cmd_sn(&self) -> (u32, u32) {
        match self.window.lock() {
            Ok(mut w) => {
                w.exp_cmd_sn = w.exp_cmd_sn.wrapping_add(1);
                w.max_cmd_sn = w.exp_cmd_sn.wrapping_add(CMD_WINDOW - 1);
                (w.exp_cmd_sn, w.max_cmd_sn)
            },
            Err(_) => (0, 0),
        }
    }

    pub fn settings(&self) -> Arc<Settings> {
        self.settings
            .read()
            .map(|s| Arc::clone(&s))
            .unwrap_or_default()
    }

    /// Atomically replace the published snapshot.
    pub fn publish_settings(&self, snapshot: Arc<Settings>) {
        if let Ok(mut s) = self.settings.write() {
            *s = snapshot;
        }
    }

    pub fn set_last_sense(&self, sense: SenseData) {
        if let Ok(mut s) = self.last_sense.lock() {
            *s = Some(sense);
        }
    }

    /// Hands out and clears the retained sense (REQUEST SENSE).
    pub fn take_last_sense(&self) -> Option<SenseData> {
        self.last_sense.lock().ok().and_then(|mut s| s.take())
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("tsih", &self.tsih)
            .field("isid", &format_args!("{:02x?}", self.isid))
            .field("type", &self.session_type)
            .field("initiator", &self.initiator_name)
            .field("target", &self.target.as_ref().map(|t| t.name.as_str()))
            .finish()
    }
}

/// The live-session set, keyed by TSIH.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<u16, Arc<Session>>,
    next_tsih: AtomicU16,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            next_tsih: AtomicU16::new(1),
        }
    }

    fn alloc_tsih(&self) -> u16 {
        loop {
            let tsih = self.next_tsih.fetch_add(1, Ordering::Relaxed);
            // TSIH 0 means "new session" on the wire, never assign it
            if tsih != 0 && !self.sessions.contains_key(&tsih) {
                return tsih;
            }
        }
    }

    /// Creates and registers a session on a successful TSIH=0 login.
    ///
    /// Refuses a second session with the same (ISID, TargetName) pair:
    /// that is session reinstatement, which this target does not
    /// support.
    pub fn create(
        &self,
        isid: [u8; 6],
        initial_cmd_sn: u32,
        settings: Arc<Settings>,
        target: Option<Arc<TargetEntry>>,
    ) -> Result<Arc<Session>> {
        let target_name = target.as_ref().map(|t| t.name.clone());
        let conflict = self.sessions.iter().any(|s| {
            s.isid == isid
                && s.target.as_ref().map(|t| t.name.clone()) == target_name
        });
        if conflict {
            bail!(
                "session with ISID {:02x?} already exists for this target",
                isid
            );
        }

        let tsih = self.alloc_tsih();
        let session = Arc::new(Session::new(
            tsih,
            isid,
            initial_cmd_sn,
            settings,
            target,
        ));
        self.sessions.insert(tsih, Arc::clone(&session));
        info!(tsih, session = ?session, "session created");
        Ok(session)
    }

    pub fn find(&self, tsih: u16) -> Option<Arc<Session>> {
        self.sessions.get(&tsih).map(|s| Arc::clone(&s))
    }

    pub fn remove(&self, tsih: u16) {
        if self.sessions.remove(&tsih).is_some() {
            info!(tsih, "session removed");
        }
    }

    pub fn all(&self) -> Vec<Arc<Session>> {
        self.sessions.iter().map(|s| Arc::clone(&s)).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
