// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! WRITE solicitation state: immediate data, R2T bursts, Data-Out
//! assembly.  READ burst planning lives here too so both data paths
//! share the chunk arithmetic.

use std::sync::atomic::{AtomicU32, Ordering};

use anyhow::{Result, bail};
use dashmap::DashMap;

/// Process-wide Target Transfer Tag counter.  0xffffffff is reserved
/// on the wire ("no TTT"), so the counter skips it.
static NEXT_TTT: AtomicU32 = AtomicU32::new(1);

pub const RESERVED_TTT: u32 = 0xffff_ffff;

pub fn next_ttt() -> u32 {
    loop {
        let ttt = NEXT_TTT.fetch_add(1, Ordering::Relaxed);
        if ttt != RESERVED_TTT {
            return ttt;
        }
    }
}

/// One WRITE command waiting for its data.
#[derive(Debug)]
pub struct PendingWrite {
    pub lun: u64,
    pub lba: u64,
    /// Total bytes the command moves.
    pub total_bytes: u32,
    /// Assembly buffer, sized to `total_bytes` up front.
    pub buf: Vec<u8>,
    /// Bytes received so far (immediate + every Data-Out).
    pub received: u32,
    /// TTT of the currently outstanding R2T, or `RESERVED_TTT` while
    /// only unsolicited data is expected.
    pub ttt: u32,
    /// Sequence number for the next R2T.
    pub r2t_sn: u32,
    /// Whether the command PDU had the I bit (window bookkeeping).
    pub immediate: bool,
}

impl PendingWrite {
    pub fn new(lun: u64, lba: u64, total_bytes: u32, immediate: bool) -> Self {
        Self {
            lun,
            lba,
            total_bytes,
            buf: vec![0u8; total_bytes as usize],
            received: 0,
            ttt: RESERVED_TTT,
            r2t_sn: 0,
            immediate,
        }
    }

    /// Copy one burst into the assembly buffer.
    pub fn absorb(&mut self, offset: u32, data: &[u8]) -> Result<()> {
        let end = offset as usize + data.len();
        if end > self.buf.len() {
            bail!(
                "Data-Out past expected transfer length: {end} > {}",
                self.buf.len()
            );
        }
        self.buf[offset as usize..end].copy_from_slice(data);
        self.received = self.received.saturating_add(data.len() as u32);
        Ok(())
    }

    pub fn is_complete(&self) -> bool {
        self.received >= self.total_bytes
    }

    pub fn remaining(&self) -> u32 {
        self.total_bytes.saturating_sub(self.received)
    }

    /// Plan the next R2T burst: `(buffer_offset, desired_length,
    /// r2t_sn, ttt)`.  Stamps a fresh TTT from the process-wide
    /// counter.
    pub fn next_r2t(&mut self, max_burst_length: u32) -> (u32, u32, u32, u32) {
        let offset = self.received;
        let desired = self.remaining().min(max_burst_length);
        let sn = self.r2t_sn;
        self.r2t_sn += 1;
        self.ttt = next_ttt();
        (offset, desired, sn, self.ttt)
    }
}

/// Per-connection transfer table, keyed by ITT.
#[derive(Default)]
pub struct TransferEngine {
    pending: DashMap<u32, PendingWrite>,
}

impl TransferEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, itt: u32, write: PendingWrite) {
        self.pending.insert(itt, write);
    }

    pub fn with_pending<R>(
        &self,
        itt: u32,
        f: impl FnOnce(&mut PendingWrite) -> R,
    ) -> Option<R> {
        self.pending.get_mut(&itt).map(|mut w| f(&mut w))
    }

    pub fn remove(&self, itt: u32) -> Option<PendingWrite> {
        self.pending.remove(&itt).map(|(_, w)| w)
    }

    pub fn contains(&self, itt: u32) -> bool {
        self.pending.contains_key(&itt)
    }

    /// Drop every pending transfer (logout, connection teardown);
    /// pending R2T waits die with them.
    pub fn clear(&self) {
        self.pending.clear();
    }
}

/// Split a READ payload into Data-In bursts of at most
/// `max_recv_data_segment_length` bytes: `(offset, len)` pairs in
/// DataSN order.
pub fn plan_data_in_bursts(total: usize, mrdsl: usize) -> Vec<(usize, usize)> {
    if total == 0 || mrdsl == 0 {
        return Vec::new();
    }
    let mut bursts = Vec::with_capacity(total.div_ceil(mrdsl));
    let mut off = 0;
    while off < total {
        let len = (total - off).min(mrdsl);
        bursts.push((off, len));
        off += len;
    }
    bursts
}
