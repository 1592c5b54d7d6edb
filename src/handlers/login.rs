// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Login phase: CSG/NSG stage machine, TSIH assignment, and the
//! negotiation rounds that produce the session's first Settings
//! snapshot.

use std::sync::{Arc, atomic::Ordering};

use anyhow::{Result, anyhow};
use tracing::{info, warn};

use crate::{
    models::{
        common::BHS_LEN,
        data_format::{DigestFlags, PduFrame},
        login::{
            common::Stage,
            request::LoginRequest,
            response::{LoginResponse, LoginResponseBuilder},
            status::LoginStatus,
        },
    },
    negotiation::negotiator::{
        NegotiationError, check_required, negotiate, parse_text_keys,
        render_text_keys,
    },
    server::connection::{Completion, Connection, Phase},
};

/// Everything a login response needs besides connection counters.
struct Reply {
    isid: [u8; 6],
    tsih: u16,
    itt: u32,
    csg: Stage,
    nsg: Stage,
    transit: bool,
    status: LoginStatus,
    text: Vec<u8>,
}

pub async fn handle(
    conn: &Arc<Connection>,
    bhs: [u8; BHS_LEN],
    data: &[u8],
) -> Result<Completion> {
    let (isid, tsih, itt, cid, cmd_sn, flags, version_min) = {
        let req = LoginRequest::from_bhs_bytes(&bhs)?;
        (
            req.isid,
            req.tsih.get(),
            req.initiator_task_tag,
            req.cid.get(),
            req.cmd_sn.get(),
            req.flags,
            req.version_min,
        )
    };

    conn.cid.store(cid, Ordering::Relaxed);
    conn.pre_session_cmd_sn.store(cmd_sn, Ordering::Relaxed);

    let csg = flags.csg().unwrap_or(Stage::Security);

    // this target implements protocol version 0x00 only
    if version_min > 0x00 {
        return fail(conn, isid, itt, csg, LoginStatus::UnsupportedVersion).await;
    }

    // non-zero TSIH would join an existing session; reinstatement and
    // multi-connection sessions are both out
    if tsih != 0 {
        warn!(peer = %conn.peer, tsih, "login to unknown TSIH");
        return fail(conn, isid, itt, csg, LoginStatus::SessionDoesNotExist)
            .await;
    }

    {
        let mut login = conn
            .login
            .lock()
            .map_err(|_| anyhow!("login state poisoned"))?;
        login.text_buf.extend_from_slice(data);
    }

    if flags.cont() {
        // partial key list: ack and wait for the rest
        return send_reply(
            conn,
            Reply {
                isid,
                tsih: 0,
                itt,
                csg,
                nsg: csg,
                transit: false,
                status: LoginStatus::Success,
                text: Vec::new(),
            },
            Completion::Done,
        )
        .await;
    }

    let pairs = {
        let mut login = conn
            .login
            .lock()
            .map_err(|_| anyhow!("login state poisoned"))?;
        let blob = std::mem::take(&mut login.text_buf);
        parse_text_keys(&blob)
    };
    let pairs = match pairs {
        Ok(p) => p,
        Err(e) => {
            warn!(peer = %conn.peer, error = %e, "malformed login keys");
            return fail(conn, isid, itt, csg, LoginStatus::InitiatorError).await;
        },
    };

    let negotiated = {
        let mut login = conn
            .login
            .lock()
            .map_err(|_| anyhow!("login state poisoned"))?;
        negotiate(&pairs, &mut login.builder, conn.sloppy)
    };
    let reply_pairs = match negotiated {
        Ok(p) => p,
        Err(NegotiationError::Irreconcilable { ref key, .. })
            if key == "AuthMethod" =>
        {
            return fail(conn, isid, itt, csg, LoginStatus::AuthFailure).await;
        },
        Err(e) => {
            warn!(peer = %conn.peer, error = %e, "negotiation failed");
            return fail(conn, isid, itt, csg, LoginStatus::InitiatorError).await;
        },
    };

    match csg {
        Stage::Security => conn.set_phase(Phase::SecurityNegotiation),
        Stage::Operational => conn.set_phase(Phase::LoginOperational),
        Stage::FullFeature => {
            // CSG has no FullFeature encoding in a request
            return fail(conn, isid, itt, csg, LoginStatus::InitiatorError).await;
        },
    }

    if !flags.transit() {
        return send_reply(
            conn,
            Reply {
                isid,
                tsih: 0,
                itt,
                csg,
                nsg: csg,
                transit: false,
                status: LoginStatus::Success,
                text: render_text_keys(&reply_pairs),
            },
            Completion::Done,
        )
        .await;
    }

    let Some(nsg) = flags.nsg() else {
        return fail(conn, isid, itt, csg, LoginStatus::InitiatorError).await;
    };

    match (csg, nsg) {
        (Stage::Security, Stage::Operational) => {
            conn.set_phase(Phase::LoginOperational);
            send_reply(
                conn,
                Reply {
                    isid,
                    tsih: 0,
                    itt,
                    csg,
                    nsg,
                    transit: true,
                    status: LoginStatus::Success,
                    text: render_text_keys(&reply_pairs),
                },
                Completion::Done,
            )
            .await
        },
        (Stage::Security, Stage::FullFeature)
        | (Stage::Operational, Stage::FullFeature) => {
            finalize(conn, isid, itt, cid, cmd_sn, csg, reply_pairs).await
        },
        _ => fail(conn, isid, itt, csg, LoginStatus::InitiatorError).await,
    }
}

/// Last login round: required keys, target binding, session creation,
/// transition to full-feature.
async fn finalize(
    conn: &Arc<Connection>,
    isid: [u8; 6],
    itt: u32,
    cid: u16,
    cmd_sn: u32,
    csg: Stage,
    reply_pairs: Vec<(String, String)>,
) -> Result<Completion> {
    let builder = {
        let login = conn
            .login
            .lock()
            .map_err(|_| anyhow!("login state poisoned"))?;
        login.builder.clone()
    };

    if let Err(e) = check_required(&builder, conn.sloppy) {
        warn!(peer = %conn.peer, error = %e, "login incomplete");
        return fail(conn, isid, itt, csg, LoginStatus::InitiatorError).await;
    }

    let is_normal = builder.session.session_type.is_normal();
    let target = if is_normal {
        let name = builder.session.target_name.clone().unwrap_or_default();
        match conn.registry.lookup(&name) {
            Some(t) => Some(t),
            None => {
                warn!(peer = %conn.peer, target = %name, "unknown target");
                return fail(conn, isid, itt, csg, LoginStatus::TargetNotFound)
                    .await;
            },
        }
    } else {
        None
    };

    let snapshot = builder.commit();
    let session = match conn.sessions.create(
        isid,
        cmd_sn,
        Arc::clone(&snapshot),
        target.clone(),
    ) {
        Ok(s) => s,
        Err(e) => {
            warn!(peer = %conn.peer, error = %e, "session refused");
            return fail(conn, isid, itt, csg, LoginStatus::InitiatorError).await;
        },
    };

    let tsih = session.tsih;
    let _ = conn.session.set(Arc::clone(&session));
    session.connections.insert(cid, Arc::downgrade(conn));
    conn.publish_settings(snapshot);

    let mut reply_pairs = reply_pairs;
    if is_normal {
        reply_pairs
            .push(("TargetPortalGroupTag".to_string(), "1".to_string()));
        if let Some(alias) = target.as_ref().and_then(|t| t.alias.clone()) {
            reply_pairs.push(("TargetAlias".to_string(), alias));
        }
    }

    conn.set_phase(Phase::FullFeature);
    info!(
        peer = %conn.peer,
        tsih,
        initiator = %session.initiator_name,
        target = session.target.as_ref().map(|t| t.name.as_str()).unwrap_or("-"),
        "login complete, full-feature phase"
    );

    send_reply(
        conn,
        Reply {
            isid,
            tsih,
            itt,
            csg,
            nsg: Stage::FullFeature,
            transit: true,
            status: LoginStatus::Success,
            text: render_text_keys(&reply_pairs),
        },
        Completion::Done,
    )
    .await
}

async fn fail(
    conn: &Arc<Connection>,
    isid: [u8; 6],
    itt: u32,
    csg: Stage,
    status: LoginStatus,
) -> Result<Completion> {
    send_reply(
        conn,
        Reply {
            isid,
            tsih: 0,
            itt,
            csg,
            nsg: csg,
            transit: false,
            status,
            text: Vec::new(),
        },
        Completion::Close,
    )
    .await
}

async fn send_reply(
    conn: &Arc<Connection>,
    reply: Reply,
    completion: Completion,
) -> Result<Completion> {
    let (exp, max) = conn.cmd_window();

    let builder = LoginResponseBuilder::new(reply.isid, reply.tsih)
        .transit(reply.transit)
        .csg(reply.csg)
        .nsg(reply.nsg)
        .versions(0x00, 0x00)
        .initiator_task_tag(reply.itt)
        .stat_sn(conn.next_stat_sn())
        .cmd_window(exp, max)
        .status(reply.status);

    let mut bhs = [0u8; BHS_LEN];
    builder.header.to_bhs_bytes(&mut bhs)?;

    // login responses are never digested
    let mut frame = PduFrame::<LoginResponse>::new_reply(bhs, DigestFlags::NONE);
    if !reply.text.is_empty() {
        frame.append_data(&reply.text);
    }
    conn.send_frame(&mut frame).await?;

    Ok(completion)
}
