// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! NOP-Out handling: echo initiator pings, swallow ping replies.

use std::sync::Arc;

use anyhow::Result;
use tracing::debug;

use crate::{
    models::{
        common::BHS_LEN,
        data_format::PduFrame,
        nop::{
            request::NopOutRequest,
            response::{NopInResponse, NopInResponseBuilder},
        },
    },
    server::connection::{Completion, Connection},
};

pub async fn handle(
    conn: &Arc<Connection>,
    bhs: [u8; BHS_LEN],
    data: &[u8],
) -> Result<Completion> {
    let (itt, ttt, lun) = {
        let req = NopOutRequest::from_bhs_bytes(&bhs)?;
        (req.initiator_task_tag, req.target_transfer_tag.get(), req.lun.get())
    };

    if itt == NopOutRequest::RESERVED_TAG {
        // answer to a target NOP-In; nothing outstanding here
        debug!(peer = %conn.peer, "NOP-Out reply swallowed");
        return Ok(Completion::Done);
    }

    if ttt != NopOutRequest::RESERVED_TAG {
        // data for a target ping this target never sent
        debug!(peer = %conn.peer, ttt, "NOP-Out with stale TTT ignored");
        return Ok(Completion::Done);
    }

    // ping: echo the data segment back, capped at what the peer takes
    let cap = conn.settings().connection.max_recv_data_segment_length as usize;
    let echo = &data[..data.len().min(cap)];

    let (exp, max) = conn.cmd_window();
    let builder = NopInResponseBuilder::new()
        .lun(lun)
        .initiator_task_tag(itt)
        .stat_sn(conn.next_stat_sn())
        .cmd_window(exp, max);

    let mut out = [0u8; BHS_LEN];
    builder.header.to_bhs_bytes(&mut out)?;
    let mut frame =
        PduFrame::<NopInResponse>::new_reply(out, conn.digest_flags());
    frame.append_data(echo);
    conn.send_frame(&mut frame).await?;

    Ok(Completion::Done)
}
