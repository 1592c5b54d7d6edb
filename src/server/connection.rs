// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Per-TCP-connection driver: frame PDUs off the socket, verify
//! digests, gate commands through the session window, and route to the
//! per-opcode handlers.

use std::{
    collections::BTreeMap,
    net::SocketAddr,
    sync::{
        Arc, Mutex as StdMutex, RwLock as StdRwLock,
        atomic::{AtomicU16, AtomicU32, Ordering},
    },
};

use anyhow::{Context, Result, anyhow};
use bytes::BytesMut;
use once_cell::sync::OnceCell;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::Mutex,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    errors::ProtocolError,
    handlers,
    models::{
        common::{BHS_LEN, BasicHeaderSegment, ZeroCopyBhs, raw_segment_lengths},
        data_format::{DigestFlags, PduFrame, pad_len, verify_wire_trailer},
        opcode::{BhsOpcode, Opcode},
        reject::{reason::RejectReason, response::{RejectPdu, RejectPduBuilder}},
    },
    negotiation::settings::{CMD_WINDOW, Settings, SettingsBuilder},
    server::{
        registry::TargetRegistry,
        session::{CmdGate, Session, SessionRegistry},
        transfer::TransferEngine,
    },
};

/// Connection phases, in protocol order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    SecurityNegotiation,
    LoginOperational,
    FullFeature,
    LogoutPending,
    Closed,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::SecurityNegotiation => "SecurityNegotiation",
            Phase::LoginOperational => "LoginOperational",
            Phase::FullFeature => "FullFeature",
            Phase::LogoutPending => "LogoutPending",
            Phase::Closed => "Closed",
        }
    }
}

/// Login-phase scratch: text accumulated across C-bit PDUs plus the
/// staged negotiation results.
#[derive(Default)]
pub struct LoginState {
    pub text_buf: Vec<u8>,
    pub builder: SettingsBuilder,
}

/// A command held back until the window reaches its CmdSN.
pub struct QueuedCommand {
    pub bhs: [u8; BHS_LEN],
    pub data: Vec<u8>,
}

/// What a command handler did with the window slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Response sent; a non-immediate command releases its slot now.
    Done,
    /// Still waiting for data (WRITE with outstanding R2T); the slot is
    /// released when the transfer commits.
    Deferred,
    /// Logout answered; wind the connection down.
    Close,
}

pub struct Connection {
    reader: Mutex<OwnedReadHalf>,
    writer: Mutex<OwnedWriteHalf>,
    pub peer: SocketAddr,
    /// `ip:port` the target is reachable at (SendTargets answers).
    pub portal: String,

    pub cid: AtomicU16,
    stat_sn: AtomicU32,
    phase: StdMutex<Phase>,
    settings: StdRwLock<Arc<Settings>>,
    pub session: OnceCell<Arc<Session>>,

    pub registry: Arc<TargetRegistry>,
    pub sessions: Arc<SessionRegistry>,
    pub transfers: TransferEngine,

    pub login: StdMutex<LoginState>,
    /// Full-feature Text Request accumulation (C-bit).
    pub text_buf: StdMutex<Vec<u8>>,
    /// CmdSN from the login request, used for window fields before a
    /// session exists.
    pub pre_session_cmd_sn: AtomicU32,

    queued: StdMutex<BTreeMap<u32, QueuedCommand>>,
    cancel: CancellationToken,
    pub sloppy: bool,
}

impl Connection {
    pub fn new(
        stream: TcpStream,
        registry: Arc<TargetRegistry>,
        sessions: Arc<SessionRegistry>,
        portal: String,
        sloppy: bool,
        cancel: CancellationToken,
    ) -> Result<Arc<Self>> {
        let peer = stream.peer_addr().context("peer_addr failed")?;
        stream.set_nodelay(true).context("TCP_NODELAY failed")?;
        let (r, w) = stream.into_split();

        Ok(Arc::new(Self {
            reader: Mutex::new(r),
            writer: Mutex::new(w),
            peer,
            portal,
            cid: AtomicU16::new(0),
            stat_sn: AtomicU32::new(0),
            phase: StdMutex::new(Phase::SecurityNegotiation),
            settings: StdRwLock::new(Arc::new(Settings::default())),
            session: OnceCell::new(),
            registry,
            sessions,
            transfers: TransferEngine::new(),
            login: StdMutex::new(LoginState::default()),
            text_buf: StdMutex::new(Vec::new()),
            pre_session_cmd_sn: AtomicU32::new(0),
            queued: StdMutex::new(BTreeMap::new()),
            cancel,
            sloppy,
        }))
    }

    // ---- phase / settings / counters ----

    pub fn phase(&self) -> Phase {
        self.phase.lock().map(|p| *p).unwrap_or(Phase::Closed)
    }

    pub fn set_phase(&self, phase: Phase) {
        if let Ok(mut p) = self.phase.lock() {
            debug!(peer = %self.peer, from = p.as_str(), to = phase.as_str(), "phase transition");
            *p = phase;
        }
    }

    pub fn settings(&self) -> Arc<Settings> {
        self.settings
            .read()
            .map(|s| Arc::clone(&s))
            .unwrap_or_default()
    }

    /// Atomically replace the published snapshot, on the connection
    /// and, once bound, on the session.
    pub fn publish_settings(&self, snapshot: Arc<Settings>) {
        if let Ok(mut s) = self.settings.write() {
            *s = Arc::clone(&snapshot);
        }
        if let Some(session) = self.session.get() {
            session.publish_settings(snapshot);
        }
    }

    /// Digests only apply from full-feature phase on.
    pub fn digest_flags(&self) -> DigestFlags {
        if self.phase() < Phase::FullFeature {
            return DigestFlags::NONE;
        }
        let s = self.settings();
        DigestFlags::new(s.header_digest_enabled(), s.data_digest_enabled())
    }

    /// Allocates the StatSN for one status-bearing response.
    pub fn next_stat_sn(&self) -> u32 {
        self.stat_sn.fetch_add(1, Ordering::Relaxed)
    }

    /// StatSN the next response will carry.
    pub fn cur_stat_sn(&self) -> u32 {
        self.stat_sn.load(Ordering::Relaxed)
    }

    /// `(ExpCmdSN, MaxCmdSN)` for response headers, session-backed once
    /// one exists.
    pub fn cmd_window(&self) -> (u32, u32) {
        if let Some(session) = self.session.get() {
            return session.cmd_window();
        }
        let exp = self.pre_session_cmd_sn.load(Ordering::Relaxed);
        (exp, exp.wrapping_add(CMD_WINDOW - 1))
    }

    pub fn bound_session(&self) -> Result<&Arc<Session>> {
        self.session
            .get()
            .ok_or_else(|| anyhow!("connection has no bound session"))
    }

    /// Releases the window slot of one finished non-immediate command.
    pub fn complete_command(&self, immediate: bool) {
        if immediate {
            return;
        }
        if let Some(session) = self.session.get() {
            session.advance_cmd_sn();
        }
    }

    // ---- wire I/O ----

    /// Reads one PDU off the socket: the 48-byte BHS plus the trailer
    /// sized from the generic length fields and active digests.
    async fn read_frame(&self) -> Result<([u8; BHS_LEN], BytesMut)> {
        let mut bhs = [0u8; BHS_LEN];
        let digests = self.digest_flags();

        let mut r = self.reader.lock().await;
        r.read_exact(&mut bhs)
            .await
            .map_err(|_| ProtocolError::ConnectionClosed)?;

        let (ahs_len, data_len) = raw_segment_lengths(&bhs);
        let trailer_len = ahs_len
            + pad_len(ahs_len)
            + 4 * digests.header as usize
            + data_len
            + pad_len(data_len)
            + 4 * (digests.data && data_len > 0) as usize;

        let mut trailer = BytesMut::zeroed(trailer_len);
        if trailer_len > 0 {
            r.read_exact(&mut trailer)
                .await
                .map_err(|_| ProtocolError::ConnectionClosed)?;
        }

        Ok((bhs, trailer))
    }

    /// Builds and writes one outbound frame.
    pub async fn send_frame<T>(&self, frame: &mut PduFrame<T>) -> Result<()>
    where T: BasicHeaderSegment + ZeroCopyBhs {
        let (hdr, body) = frame.build()?;
        let mut w = self.writer.lock().await;
        w.write_all(&hdr).await.context("write BHS failed")?;
        if !body.is_empty() {
            w.write_all(&body).await.context("write body failed")?;
        }
        Ok(())
    }

    /// Answers a decode failure with a Reject PDU; the connection
    /// stays up.
    pub async fn send_reject(&self, reason: RejectReason, bad_bhs: &[u8]) -> Result<()> {
        let (exp, max) = self.cmd_window();
        let builder = RejectPduBuilder::new(reason)
            .stat_sn(self.next_stat_sn())
            .cmd_window(exp, max);

        let mut bhs_buf = [0u8; BHS_LEN];
        builder.header.to_bhs_bytes(&mut bhs_buf)?;
        let mut frame: PduFrame<RejectPdu> = PduFrame::new_reply(bhs_buf, self.digest_flags());
        // data segment carries the header being rejected
        frame.append_data(bad_bhs);
        warn!(peer = %self.peer, ?reason, "sending Reject");
        self.send_frame(&mut frame).await
    }

    // ---- main loop ----

    /// Runs the connection to completion and then tears it down.
    pub async fn serve(self: Arc<Self>) -> Result<()> {
        let peer = self.peer;
        info!(%peer, "connection accepted");
        let res = Arc::clone(&self).run_loop().await;
        self.teardown();
        match &res {
            Ok(()) => info!(%peer, "connection closed"),
            Err(e) => info!(%peer, error = %e, "connection terminated"),
        }
        res
    }

    async fn run_loop(self: Arc<Self>) -> Result<()> {
        let mut first_pdu = true;

        loop {
            if self.phase() == Phase::Closed {
                return Ok(());
            }

            let (bhs, trailer) = tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                frame = self.read_frame() => match frame {
                    Ok(f) => f,
                    Err(e) if e.is::<ProtocolError>() => return Ok(()),
                    Err(e) => return Err(e),
                },
            };

            let op = match BhsOpcode::try_from(bhs[0]) {
                Ok(op) => op,
                Err(e) => {
                    if first_pdu {
                        return Err(ProtocolError::FirstPduNotLogin(bhs[0]).into());
                    }
                    self.send_reject(e.reject_reason(), &bhs).await?;
                    continue;
                },
            };

            // The server contract: nothing before a Login Request.
            if first_pdu && op.opcode != Opcode::LoginReq {
                return Err(ProtocolError::FirstPduNotLogin(bhs[0]).into());
            }
            first_pdu = false;

            match self.phase() {
                Phase::SecurityNegotiation | Phase::LoginOperational => {
                    if op.opcode != Opcode::LoginReq {
                        return Err(ProtocolError::UnexpectedPdu {
                            opcode: bhs[0],
                            phase: self.phase().as_str(),
                        }
                        .into());
                    }
                    // login PDUs are never digested
                    let range =
                        match verify_wire_trailer(&bhs, &trailer, DigestFlags::NONE) {
                            Ok(r) => r,
                            Err(e) => {
                                self.send_reject(e.reject_reason(), &bhs).await?;
                                continue;
                            },
                        };
                    let data = trailer[range].to_vec();
                    if let Completion::Close =
                        handlers::login::handle(&self, bhs, &data).await?
                    {
                        return Ok(());
                    }
                },
                Phase::FullFeature | Phase::LogoutPending => {
                    Self::dispatch_full_feature(&self, op, bhs, trailer).await?;
                    Self::drain_queued(&self).await?;
                },
                Phase::Closed => return Ok(()),
            }
        }
    }

    async fn dispatch_full_feature(
        conn: &Arc<Self>,
        op: BhsOpcode,
        bhs: [u8; BHS_LEN],
        trailer: BytesMut,
    ) -> Result<()> {
        // digest verification happens once, type-independent
        let range = match verify_wire_trailer(&bhs, &trailer, conn.digest_flags()) {
            Ok(r) => r,
            Err(e) => {
                conn.send_reject(e.reject_reason(), &bhs).await?;
                return Ok(());
            },
        };
        let data = trailer[range].to_vec();

        // ExpStatSN echo must not run ahead of what was actually sent
        let exp_stat_sn =
            u32::from_be_bytes([bhs[28], bhs[29], bhs[30], bhs[31]]);
        let ahead = exp_stat_sn.wrapping_sub(conn.cur_stat_sn());
        if ahead != 0 && ahead < (1 << 31) {
            warn!(
                peer = %conn.peer,
                exp_stat_sn,
                stat_sn = conn.cur_stat_sn(),
                "ExpStatSN outside window"
            );
            conn.send_reject(RejectReason::ProtocolError, &bhs).await?;
            return Ok(());
        }

        match op.opcode {
            Opcode::ScsiDataOut => {
                handlers::data_out::handle(conn, bhs, &data).await?;
            },
            Opcode::ScsiCommandReq
            | Opcode::TextReq
            | Opcode::NopOut
            | Opcode::LogoutReq => {
                let cmd_sn =
                    u32::from_be_bytes([bhs[24], bhs[25], bhs[26], bhs[27]]);
                let session = Arc::clone(conn.bound_session()?);
                match session.admit(cmd_sn, op.immediate) {
                    CmdGate::Immediate | CmdGate::InOrder => {
                        Self::process_command(conn, op, bhs, data).await?;
                    },
                    CmdGate::Queue => {
                        if let Ok(mut q) = conn.queued.lock() {
                            q.insert(cmd_sn, QueuedCommand { bhs, data });
                        }
                    },
                    CmdGate::Drop => {},
                }
            },
            Opcode::SnackReq => {
                // ERL 0: every SNACK is refused
                conn.send_reject(RejectReason::SnackReject, &bhs).await?;
            },
            Opcode::ScsiTaskMgmtReq => {
                conn.send_reject(RejectReason::CommandNotSupported, &bhs)
                    .await?;
            },
            Opcode::LoginReq => {
                // login after full-feature is a protocol violation
                return Err(ProtocolError::UnexpectedPdu {
                    opcode: bhs[0],
                    phase: conn.phase().as_str(),
                }
                .into());
            },
            _ => {
                // a target-opcode sent at us
                conn.send_reject(RejectReason::ProtocolError, &bhs).await?;
            },
        }
        Ok(())
    }

    /// Executes one admitted command PDU.
    async fn process_command(
        conn: &Arc<Self>,
        op: BhsOpcode,
        bhs: [u8; BHS_LEN],
        data: Vec<u8>,
    ) -> Result<()> {
        let completion = match op.opcode {
            Opcode::ScsiCommandReq => {
                handlers::scsi::handle(conn, bhs, &data).await?
            },
            Opcode::TextReq => handlers::text::handle(conn, bhs, &data).await?,
            Opcode::NopOut => handlers::nop::handle(conn, bhs, &data).await?,
            Opcode::LogoutReq => handlers::logout::handle(conn, bhs).await?,
            other => {
                return Err(anyhow!("process_command got opcode {other:?}"));
            },
        };

        match completion {
            Completion::Done => conn.complete_command(op.immediate),
            Completion::Deferred => {
                // window slot released when the transfer commits
            },
            Completion::Close => {
                conn.complete_command(op.immediate);
                conn.set_phase(Phase::Closed);
            },
        }
        Ok(())
    }

    /// Runs queued commands that the advancing window has made
    /// eligible.
    async fn drain_queued(conn: &Arc<Self>) -> Result<()> {
        loop {
            let next = {
                let session = match conn.session.get() {
                    Some(s) => s,
                    None => return Ok(()),
                };
                let (exp, _) = session.cmd_window();
                match conn.queued.lock() {
                    Ok(mut q) => q.remove(&exp),
                    Err(_) => None,
                }
            };

            let Some(cmd) = next else { return Ok(()) };
            let op = BhsOpcode::try_from(cmd.bhs[0])
                .map_err(|e| anyhow!("queued command went bad: {e}"))?;
            Self::process_command(conn, op, cmd.bhs, cmd.data).await?;
            if conn.phase() == Phase::Closed {
                return Ok(());
            }
        }
    }

    fn teardown(&self) {
        self.set_phase(Phase::Closed);
        self.transfers.clear();

        if let Some(session) = self.session.get() {
            session
                .connections
                .remove(&self.cid.load(Ordering::Relaxed));
            if session.connections.is_empty() {
                self.sessions.remove(session.tsih);
            }
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("peer", &self.peer)
            .field("cid", &self.cid.load(Ordering::Relaxed))
            .field("phase", &self.phase())
            .field("stat_sn", &self.cur_stat_sn())
            .finish()
    }
}
