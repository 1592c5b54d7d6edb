// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Pluggable block storage consumed by the SCSI dispatcher.

pub mod file;

use std::sync::{Arc, Mutex};

use anyhow::{Result, bail};

/// Logical block size every store reports (bytes).
pub const BLOCK_SIZE: u32 = 512;

/// Outcome of a bounds check against the store's capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundsCheck {
    /// request fits
    Ok,
    /// starting LBA is past the end
    LbaOutOfRange,
    /// starting LBA fits but the run does not
    LengthOutOfRange,
}

impl BoundsCheck {
    pub fn is_ok(self) -> bool {
        matches!(self, BoundsCheck::Ok)
    }
}

/// Random-access byte I/O over a fixed-size region.
///
/// Reads may run concurrently; writes are serialized by the
/// implementation's own discipline.  Calls may block, so connection
/// tasks treat them as suspension points.
pub trait BlockStore: Send + Sync {
    /// Fill `dst` from the region starting at byte `offset`.
    fn read(&self, dst: &mut [u8], offset: u64) -> Result<()>;

    /// Write `src` to the region starting at byte `offset`.
    fn write(&self, src: &[u8], offset: u64) -> Result<()>;

    /// Push buffered writes down to the medium.
    fn flush(&self) -> Result<()>;

    /// Fixed size of the region in bytes.
    fn size_in_bytes(&self) -> u64;

    #[inline]
    fn block_size(&self) -> u32 {
        BLOCK_SIZE
    }

    #[inline]
    fn size_in_blocks(&self) -> u64 {
        self.size_in_bytes() / self.block_size() as u64
    }

    /// Validate an `(lba, blocks)` run against the capacity before any
    /// I/O is attempted.
    fn check_bounds(&self, lba: u64, blocks: u32) -> BoundsCheck {
        let total = self.size_in_blocks();
        if lba >= total {
            return BoundsCheck::LbaOutOfRange;
        }
        if lba + blocks as u64 > total {
            return BoundsCheck::LengthOutOfRange;
        }
        BoundsCheck::Ok
    }
}

/// Shared handle the registry and dispatcher pass around.
pub type SharedBlockStore = Arc<dyn BlockStore>;

/// Memory-backed store for tests and throwaway targets.
pub struct MemBlockStore {
    data: Mutex<Vec<u8>>,
}

impl MemBlockStore {
    pub fn new(size_in_bytes: u64) -> Result<Self> {
        if size_in_bytes % BLOCK_SIZE as u64 != 0 {
            bail!(
                "store size {size_in_bytes} is not a multiple of the {BLOCK_SIZE}-byte block size"
            );
        }
        Ok(Self {
            data: Mutex::new(vec![0u8; size_in_bytes as usize]),
        })
    }
}

impl BlockStore for MemBlockStore {
    fn read(&self, dst: &mut [u8], offset: u64) -> Result<()> {
        let data = self.data.lock().map_err(|_| poisoned())?;
        let start = offset as usize;
        let end = start + dst.len();
        if end > data.len() {
            bail!("read past end of store: {end} > {}", data.len());
        }
        dst.copy_from_slice(&data[start..end]);
        Ok(())
    }

    fn write(&self, src: &[u8], offset: u64) -> Result<()> {
        let mut data = self.data.lock().map_err(|_| poisoned())?;
        let start = offset as usize;
        let end = start + src.len();
        if end > data.len() {
            bail!("write past end of store: {end} > {}", data.len());
        }
        data[start..end].copy_from_slice(src);
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }

    fn size_in_bytes(&self) -> u64 {
        self.data.lock().map(|d| d.len() as u64).unwrap_or(0)
    }
}

fn poisoned() -> anyhow::Error {
    anyhow::anyhow!("block store mutex poisoned")
}
