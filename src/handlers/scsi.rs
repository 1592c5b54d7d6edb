// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The SCSI dispatcher: routes parsed CDBs against the session's
//! BlockStore and frames the Data-In / R2T / SCSI Response traffic.

use std::sync::Arc;

use anyhow::{Result, anyhow};
use tracing::{debug, warn};

use crate::{
    control_block::{
        Cdb, inquiry, mode_sense, read_capacity, report_luns,
    },
    models::{
        command::{
            request::ScsiCommandRequest,
            response::{ScsiCommandResponse, ScsiCommandResponseBuilder},
        },
        common::BHS_LEN,
        data::{
            response::{ScsiDataIn, ScsiDataInBuilder},
            sense_data::{SenseData, asc, key},
        },
        data_format::PduFrame,
        ready_2_transfer::response::{ReadyToTransfer, ReadyToTransferBuilder},
        reject::reason::RejectReason,
    },
    server::{
        connection::{Completion, Connection},
        session::Session,
        transfer::{PendingWrite, plan_data_in_bursts},
    },
};

pub async fn handle(
    conn: &Arc<Connection>,
    bhs: [u8; BHS_LEN],
    data: &[u8],
) -> Result<Completion> {
    let (itt, lun, cdb_bytes, edtl, immediate) = {
        let req = ScsiCommandRequest::from_bhs_bytes(&bhs)?;
        (
            req.initiator_task_tag,
            req.lun.get(),
            req.cdb,
            req.expected_data_transfer_length.get(),
            req.opcode.immediate(),
        )
    };

    let session = Arc::clone(conn.bound_session()?);

    if session.session_type.is_discovery() {
        // Discovery sessions carry Text and Logout only
        conn.send_reject(RejectReason::ProtocolError, &bhs).await?;
        return Ok(Completion::Done);
    }

    let target = session
        .target
        .clone()
        .ok_or_else(|| anyhow!("normal session without target"))?;
    let store = Arc::clone(&target.store);

    let cdb = match Cdb::parse(&cdb_bytes) {
        Ok(c) => c,
        Err(e) => {
            debug!(peer = %conn.peer, error = %e, "unparsable CDB");
            return respond_check(
                conn,
                &session,
                itt,
                edtl,
                key::ILLEGAL_REQUEST,
                asc::INVALID_FIELD_IN_CDB,
            )
            .await;
        },
    };

    // single-LUN target: everything except the inventory commands
    // answers LOGICAL UNIT NOT SUPPORTED off LUN 0
    if lun != 0 && !matches!(cdb, Cdb::ReportLuns(_) | Cdb::Inquiry(_)) {
        return respond_check(
            conn,
            &session,
            itt,
            edtl,
            key::ILLEGAL_REQUEST,
            asc::LUN_NOT_SUPPORTED,
        )
        .await;
    }

    match cdb {
        Cdb::TestUnitReady(_) | Cdb::StartStopUnit(_) => {
            respond_good(conn, &session, itt, edtl, 0).await
        },

        Cdb::RequestSense(rs) => {
            let sense = session
                .take_last_sense()
                .unwrap_or_else(SenseData::no_sense);
            let fixed = sense.to_fixed_bytes();
            let cap = (rs.allocation_length as usize).min(fixed.len());
            respond_with_data(conn, &session, itt, edtl, &fixed[..cap]).await
        },

        Cdb::Inquiry(inq) => {
            let payload = if inq.evpd {
                inquiry::vpd_page_data(inq.page_code, &target.name)
            } else {
                Some(inquiry::standard_inquiry_data())
            };
            match payload {
                Some(p) => {
                    let cap = (inq.allocation_length as usize).min(p.len());
                    respond_with_data(conn, &session, itt, edtl, &p[..cap])
                        .await
                },
                None => {
                    respond_check(
                        conn,
                        &session,
                        itt,
                        edtl,
                        key::ILLEGAL_REQUEST,
                        asc::INVALID_FIELD_IN_CDB,
                    )
                    .await
                },
            }
        },

        Cdb::ModeSense6(ms) => match mode_sense::mode_sense6_data(ms.page_code) {
            Some(p) => {
                let cap = (ms.allocation_length as usize).min(p.len());
                respond_with_data(conn, &session, itt, edtl, &p[..cap]).await
            },
            None => {
                respond_check(
                    conn,
                    &session,
                    itt,
                    edtl,
                    key::ILLEGAL_REQUEST,
                    asc::INVALID_FIELD_IN_CDB,
                )
                .await
            },
        },

        Cdb::ReadCapacity10(_) => {
            let payload = read_capacity::rc10_data(
                store.size_in_blocks(),
                store.block_size(),
            );
            respond_with_data(conn, &session, itt, edtl, &payload).await
        },

        Cdb::ReadCapacity16(rc) => {
            let payload = read_capacity::rc16_data(
                store.size_in_blocks(),
                store.block_size(),
            );
            let cap = (rc.allocation_length as usize).min(payload.len());
            respond_with_data(conn, &session, itt, edtl, &payload[..cap]).await
        },

        Cdb::ReportLuns(rl) => {
            let payload = report_luns::report_luns_data();
            let cap = (rl.allocation_length as usize).min(payload.len());
            respond_with_data(conn, &session, itt, edtl, &payload[..cap]).await
        },

        Cdb::Read(r) => {
            if !store.check_bounds(r.lba, r.transfer_blocks).is_ok() {
                return respond_check(
                    conn,
                    &session,
                    itt,
                    edtl,
                    key::ILLEGAL_REQUEST,
                    asc::LBA_OUT_OF_RANGE,
                )
                .await;
            }
            if r.transfer_blocks == 0 {
                return respond_good(conn, &session, itt, edtl, 0).await;
            }

            let len = r.transfer_bytes(store.block_size()) as usize;
            let mut payload = vec![0u8; len];
            if let Err(e) =
                store.read(&mut payload, r.lba * store.block_size() as u64)
            {
                warn!(peer = %conn.peer, error = %e, "store read failed");
                return respond_check(
                    conn,
                    &session,
                    itt,
                    edtl,
                    key::MEDIUM_ERROR,
                    asc::READ_ERROR,
                )
                .await;
            }
            respond_with_data(conn, &session, itt, edtl, &payload).await
        },

        Cdb::Write(w) => {
            if !store.check_bounds(w.lba, w.transfer_blocks).is_ok() {
                return respond_check(
                    conn,
                    &session,
                    itt,
                    edtl,
                    key::ILLEGAL_REQUEST,
                    asc::LBA_OUT_OF_RANGE,
                )
                .await;
            }
            let total = w.transfer_bytes(store.block_size());
            if total == 0 {
                return respond_good(conn, &session, itt, edtl, 0).await;
            }
            if (edtl as u64) < total || total > u32::MAX as u64 {
                return respond_check(
                    conn,
                    &session,
                    itt,
                    edtl,
                    key::ILLEGAL_REQUEST,
                    asc::INVALID_FIELD_IN_CDB,
                )
                .await;
            }
            let total = total as u32;

            let settings = conn.settings();
            let mut pending =
                PendingWrite::new(lun, w.lba, total, immediate);

            if !data.is_empty() {
                let allowed = settings.session.immediate_data
                    && data.len() as u32
                        <= settings.session.first_burst_length.min(total);
                if !allowed {
                    return respond_check(
                        conn,
                        &session,
                        itt,
                        edtl,
                        key::ILLEGAL_REQUEST,
                        asc::INVALID_FIELD_IN_CDB,
                    )
                    .await;
                }
                pending.absorb(0, data)?;
            }

            if pending.is_complete() {
                return commit_write(conn, &session, pending, itt, edtl).await;
            }

            // solicit the remainder
            let (offset, desired, r2t_sn, ttt) =
                pending.next_r2t(settings.session.max_burst_length);
            conn.transfers.insert(itt, pending);
            send_r2t(conn, &session, itt, lun, offset, desired, r2t_sn, ttt)
                .await?;
            Ok(Completion::Deferred)
        },

        Cdb::SynchronizeCache(_) => match store.flush() {
            Ok(()) => respond_good(conn, &session, itt, edtl, 0).await,
            Err(e) => {
                warn!(peer = %conn.peer, error = %e, "store flush failed");
                respond_check(
                    conn,
                    &session,
                    itt,
                    edtl,
                    key::MEDIUM_ERROR,
                    asc::WRITE_ERROR,
                )
                .await
            },
        },

        Cdb::Unsupported(opcode) => {
            debug!(peer = %conn.peer, opcode, "unsupported SCSI opcode");
            respond_check(
                conn,
                &session,
                itt,
                edtl,
                key::ILLEGAL_REQUEST,
                asc::INVALID_OPCODE,
            )
            .await
        },
    }
}

/// Streams one READ payload as Data-In bursts (DataSN from 0, F on the
/// last) and closes with a GOOD response carrying the residuals.
async fn respond_with_data(
    conn: &Arc<Connection>,
    session: &Arc<Session>,
    itt: u32,
    edtl: u32,
    payload: &[u8],
) -> Result<Completion> {
    let sent = payload.len().min(edtl as usize);
    let to_send = &payload[..sent];

    let mrdsl =
        conn.settings().connection.max_recv_data_segment_length as usize;
    let bursts = plan_data_in_bursts(to_send.len(), mrdsl);
    let last = bursts.len().saturating_sub(1);

    for (data_sn, (offset, len)) in bursts.iter().enumerate() {
        let (exp, max) = session.cmd_window();
        let mut builder = ScsiDataInBuilder::new()
            .initiator_task_tag(itt)
            .stat_sn(conn.cur_stat_sn())
            .cmd_window(exp, max)
            .data_sn(data_sn as u32)
            .buffer_offset(*offset as u32);
        if data_sn == last {
            builder = builder.final_bit();
        }

        let mut bhs = [0u8; BHS_LEN];
        builder.header.to_bhs_bytes(&mut bhs)?;
        let mut frame =
            PduFrame::<ScsiDataIn>::new_reply(bhs, conn.digest_flags());
        frame.append_data(&to_send[*offset..*offset + *len]);
        conn.send_frame(&mut frame).await?;
    }

    let overflow = payload.len().saturating_sub(edtl as usize) as u32;
    respond_status(conn, session, itt, edtl, sent as u32, overflow, None).await
}

/// GOOD response with no data phase.
async fn respond_good(
    conn: &Arc<Connection>,
    session: &Arc<Session>,
    itt: u32,
    edtl: u32,
    sent: u32,
) -> Result<Completion> {
    respond_status(conn, session, itt, edtl, sent, 0, None).await
}

/// CHECK CONDITION with fixed-format sense, retained for REQUEST SENSE.
pub(crate) async fn respond_check(
    conn: &Arc<Connection>,
    session: &Arc<Session>,
    itt: u32,
    edtl: u32,
    sense_key: u8,
    code: (u8, u8),
) -> Result<Completion> {
    let sense = SenseData::current(sense_key, code);
    session.set_last_sense(sense.clone());
    respond_status(conn, session, itt, edtl, 0, 0, Some(sense)).await
}

async fn respond_status(
    conn: &Arc<Connection>,
    session: &Arc<Session>,
    itt: u32,
    edtl: u32,
    sent: u32,
    overflow: u32,
    sense: Option<SenseData>,
) -> Result<Completion> {
    let (exp, max) = session.cmd_window();
    let mut builder = ScsiCommandResponseBuilder::new()
        .initiator_task_tag(itt)
        .stat_sn(conn.next_stat_sn())
        .cmd_window(exp, max);

    builder = if sense.is_some() {
        builder.check_condition()
    } else {
        builder.good()
    };

    if overflow > 0 {
        builder = builder.residual_overflow(overflow);
    } else if edtl > sent {
        builder = builder.residual_underflow(edtl - sent);
    }

    let mut bhs = [0u8; BHS_LEN];
    builder.header.to_bhs_bytes(&mut bhs)?;
    let mut frame =
        PduFrame::<ScsiCommandResponse>::new_reply(bhs, conn.digest_flags());
    if let Some(sense) = sense {
        frame.append_data(&sense.to_data_segment());
    }
    conn.send_frame(&mut frame).await?;

    Ok(Completion::Done)
}

/// Write-through of one fully assembled WRITE, then the status.
pub(crate) async fn commit_write(
    conn: &Arc<Connection>,
    session: &Arc<Session>,
    pending: PendingWrite,
    itt: u32,
    edtl: u32,
) -> Result<Completion> {
    let target = session
        .target
        .clone()
        .ok_or_else(|| anyhow!("normal session without target"))?;
    let store = &target.store;

    let offset = pending.lba * store.block_size() as u64;
    if let Err(e) = store.write(&pending.buf, offset) {
        warn!(peer = %conn.peer, error = %e, "store write failed");
        return respond_check(
            conn,
            session,
            itt,
            edtl,
            key::MEDIUM_ERROR,
            asc::WRITE_ERROR,
        )
        .await;
    }

    respond_status(conn, session, itt, edtl, pending.total_bytes, 0, None).await
}

/// One R2T burst solicitation.  R2Ts carry the current StatSN without
/// consuming it.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn send_r2t(
    conn: &Arc<Connection>,
    session: &Arc<Session>,
    itt: u32,
    lun: u64,
    buffer_offset: u32,
    desired: u32,
    r2t_sn: u32,
    ttt: u32,
) -> Result<()> {
    let (exp, max) = session.cmd_window();
    let builder = ReadyToTransferBuilder::new()
        .lun(lun)
        .initiator_task_tag(itt)
        .target_transfer_tag(ttt)
        .stat_sn(conn.cur_stat_sn())
        .cmd_window(exp, max)
        .r2t_sn(r2t_sn)
        .burst(buffer_offset, desired);

    let mut bhs = [0u8; BHS_LEN];
    builder.header.to_bhs_bytes(&mut bhs)?;
    let mut frame =
        PduFrame::<ReadyToTransfer>::new_reply(bhs, conn.digest_flags());
    conn.send_frame(&mut frame).await
}
