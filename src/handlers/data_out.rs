// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! SCSI Data-Out routing: bursts are matched to their pending WRITE by
//! ITT, assembled at the carried buffer offset, and either committed or
//! answered with the next R2T.

use std::sync::Arc;

use anyhow::{Result, anyhow};
use tracing::{debug, warn};

use crate::{
    handlers::scsi::{commit_write, send_r2t},
    models::{
        common::BHS_LEN,
        data::request::ScsiDataOut,
        reject::reason::RejectReason,
    },
    server::{
        connection::Connection,
        transfer::RESERVED_TTT,
    },
};

pub async fn handle(
    conn: &Arc<Connection>,
    bhs: [u8; BHS_LEN],
    data: &[u8],
) -> Result<()> {
    let (itt, ttt, fin, offset) = {
        let req = ScsiDataOut::from_bhs_bytes(&bhs)?;
        (
            req.initiator_task_tag,
            req.target_transfer_tag.get(),
            req.flags.fin(),
            req.buffer_offset.get(),
        )
    };

    if !conn.transfers.contains(itt) {
        // data for a command that is not waiting for any
        warn!(peer = %conn.peer, itt, "Data-Out without pending WRITE");
        conn.send_reject(RejectReason::InvalidPduField, &bhs).await?;
        return Ok(());
    }

    let absorb = conn
        .transfers
        .with_pending(itt, |pending| {
            if ttt != RESERVED_TTT
                && pending.ttt != RESERVED_TTT
                && ttt != pending.ttt
            {
                return Err(anyhow!(
                    "TTT mismatch: got {ttt:#010x}, want {:#010x}",
                    pending.ttt
                ));
            }
            pending.absorb(offset, data)
        })
        .unwrap_or_else(|| Err(anyhow!("pending WRITE vanished")));

    if let Err(e) = absorb {
        warn!(peer = %conn.peer, itt, error = %e, "bad Data-Out burst");
        conn.transfers.remove(itt);
        conn.send_reject(RejectReason::InvalidPduField, &bhs).await?;
        return Ok(());
    }

    let complete = conn
        .transfers
        .with_pending(itt, |p| p.is_complete())
        .unwrap_or(false);

    if complete {
        let pending = conn
            .transfers
            .remove(itt)
            .ok_or_else(|| anyhow!("pending WRITE vanished"))?;
        let session = Arc::clone(conn.bound_session()?);
        let immediate = pending.immediate;
        let edtl = pending.total_bytes;
        commit_write(conn, &session, pending, itt, edtl).await?;
        // the WRITE's window slot opens now
        conn.complete_command(immediate);
        return Ok(());
    }

    if fin {
        // burst done, transfer not: solicit the next chunk
        let max_burst = conn.settings().session.max_burst_length;
        let next = conn
            .transfers
            .with_pending(itt, |p| (p.lun, p.next_r2t(max_burst)));
        if let Some((lun, (burst_offset, desired, r2t_sn, new_ttt))) = next {
            debug!(
                peer = %conn.peer,
                itt,
                burst_offset,
                desired,
                "soliciting next write burst"
            );
            let session = Arc::clone(conn.bound_session()?);
            send_r2t(
                conn,
                &session,
                itt,
                lun,
                burst_offset,
                desired,
                r2t_sn,
                new_ttt,
            )
            .await?;
        }
    }

    Ok(())
}
