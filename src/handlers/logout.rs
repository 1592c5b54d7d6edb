// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Logout: answer, release transfer state, and wind the connection or
//! the whole session down.

use std::sync::{Arc, atomic::Ordering};

use anyhow::Result;
use tracing::info;

use crate::{
    models::{
        common::BHS_LEN,
        data_format::PduFrame,
        logout::{
            common::{LogoutReason, LogoutResponseCode},
            request::LogoutRequest,
            response::{LogoutResponse, LogoutResponseBuilder},
        },
    },
    server::connection::{Completion, Connection, Phase},
};

pub async fn handle(
    conn: &Arc<Connection>,
    bhs: [u8; BHS_LEN],
) -> Result<Completion> {
    let (itt, cid, reason) = {
        let req = LogoutRequest::from_bhs_bytes(&bhs)?;
        (req.initiator_task_tag, req.cid.get(), req.reason.decode())
    };

    let session = Arc::clone(conn.bound_session()?);
    let settings = session.settings();

    let (code, close) = match &reason {
        Ok(LogoutReason::CloseSession) => {
            conn.sessions.remove(session.tsih);
            (LogoutResponseCode::Success, true)
        },
        Ok(LogoutReason::CloseConnection) => {
            if cid == conn.cid.load(Ordering::Relaxed) {
                (LogoutResponseCode::Success, true)
            } else {
                (LogoutResponseCode::CidNotFound, false)
            }
        },
        Ok(LogoutReason::RemoveConnectionForRecovery) => {
            // ERL 0: recovery was never negotiated
            (LogoutResponseCode::RecoveryNotSupported, false)
        },
        Err(_) => (LogoutResponseCode::CleanupFailed, false),
    };

    if close {
        conn.set_phase(Phase::LogoutPending);
        // pending R2T waits are released with the transfer state
        conn.transfers.clear();
    }

    info!(
        peer = %conn.peer,
        tsih = session.tsih,
        reason = reason.as_ref().map(|r| r.to_string()).unwrap_or_else(|_| "invalid".into()),
        response = ?code,
        "logout"
    );

    let (exp, max) = session.cmd_window();
    let builder = LogoutResponseBuilder::new(code)
        .initiator_task_tag(itt)
        .stat_sn(conn.next_stat_sn())
        .cmd_window(exp, max)
        .timers(
            settings.session.default_time2wait,
            settings.session.default_time2retain,
        );

    let mut out = [0u8; BHS_LEN];
    builder.header.to_bhs_bytes(&mut out)?;
    let mut frame =
        PduFrame::<LogoutResponse>::new_reply(out, conn.digest_flags());
    conn.send_frame(&mut frame).await?;

    Ok(if close { Completion::Close } else { Completion::Done })
}
