// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Text Requests in full-feature phase: SendTargets discovery plus
//! the NotUnderstood fallback for anything else.

use std::sync::Arc;

use anyhow::{Result, anyhow};
use tracing::{debug, warn};

use crate::{
    models::{
        common::BHS_LEN,
        data_format::PduFrame,
        reject::reason::RejectReason,
        text::{
            request::TextRequest,
            response::{TextResponse, TextResponseBuilder},
        },
    },
    negotiation::negotiator::{parse_text_keys, render_text_keys},
    server::connection::{Completion, Connection},
};

pub async fn handle(
    conn: &Arc<Connection>,
    bhs: [u8; BHS_LEN],
    data: &[u8],
) -> Result<Completion> {
    let (itt, lun, cont) = {
        let req = TextRequest::from_bhs_bytes(&bhs)?;
        (req.initiator_task_tag, req.lun.get(), req.flags.cont())
    };

    {
        let mut buf = conn
            .text_buf
            .lock()
            .map_err(|_| anyhow!("text buffer poisoned"))?;
        buf.extend_from_slice(data);
    }

    if cont {
        // C=1 must be answered with an empty response before the next
        // chunk arrives
        return respond(conn, itt, lun, false, Vec::new()).await;
    }

    let blob = {
        let mut buf = conn
            .text_buf
            .lock()
            .map_err(|_| anyhow!("text buffer poisoned"))?;
        std::mem::take(&mut *buf)
    };

    let pairs = match parse_text_keys(&blob) {
        Ok(p) => p,
        Err(e) => {
            warn!(peer = %conn.peer, error = %e, "malformed text keys");
            conn.send_reject(RejectReason::ProtocolError, &bhs).await?;
            return Ok(Completion::Done);
        },
    };

    let mut reply: Vec<(String, String)> = Vec::new();
    for (key, value) in &pairs {
        match key.as_str() {
            "SendTargets" => send_targets(conn, value, &mut reply),
            _ => reply.push((key.clone(), "NotUnderstood".to_string())),
        }
    }

    respond(conn, itt, lun, true, render_text_keys(&reply)).await
}

/// SendTargets scoping (RFC 3720 § D.2): `All` enumerates the registry
/// on a Discovery session; an empty value names the session's own
/// target; a target name selects that entry.
fn send_targets(
    conn: &Arc<Connection>,
    value: &str,
    reply: &mut Vec<(String, String)>,
) {
    let session = conn.session.get();
    let discovery =
        session.map(|s| s.session_type.is_discovery()).unwrap_or(false);

    let mut push_entry = |name: &str| {
        reply.push(("TargetName".to_string(), name.to_string()));
        reply.push((
            "TargetAddress".to_string(),
            format!("{},1", conn.portal),
        ));
    };

    match value {
        "All" if discovery => {
            for entry in conn.registry.entries() {
                push_entry(&entry.name);
            }
        },
        "All" | "" => {
            if let Some(target) =
                session.and_then(|s| s.target.as_ref().map(|t| t.name.clone()))
            {
                push_entry(&target);
            }
        },
        name => {
            if let Some(entry) = conn.registry.lookup(name) {
                push_entry(&entry.name);
            } else {
                debug!(peer = %conn.peer, target = name, "SendTargets miss");
            }
        },
    }
}

async fn respond(
    conn: &Arc<Connection>,
    itt: u32,
    lun: u64,
    fin: bool,
    text: Vec<u8>,
) -> Result<Completion> {
    let (exp, max) = conn.cmd_window();
    let mut builder = TextResponseBuilder::new()
        .initiator_task_tag(itt)
        .lun(lun)
        .stat_sn(conn.next_stat_sn())
        .cmd_window(exp, max);
    if fin {
        builder = builder.final_bit();
    }

    let mut bhs = [0u8; BHS_LEN];
    builder.header.to_bhs_bytes(&mut bhs)?;
    let mut frame =
        PduFrame::<TextResponse>::new_reply(bhs, conn.digest_flags());
    if !text.is_empty() {
        frame.append_data(&text);
    }
    conn.send_frame(&mut frame).await?;

    Ok(Completion::Done)
}
