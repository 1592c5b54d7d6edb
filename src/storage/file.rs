// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    fs::{File, OpenOptions},
    io::{Read, Seek, SeekFrom, Write},
    path::Path,
    sync::Mutex,
};

use anyhow::{Context, Result, bail};

use crate::storage::{BLOCK_SIZE, BlockStore};

/// BlockStore over a raw image file: plain bytes, no header, length =
/// blocks x 512.  All I/O goes through one mutex-guarded handle, which
/// serializes writes; concurrent readers queue on the same lock.
pub struct FileBlockStore {
    file: Mutex<File>,
    size_in_bytes: u64,
}

impl FileBlockStore {
    /// Opens an existing image read-write.  The file length must be a
    /// whole number of blocks.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .with_context(|| format!("failed to open backing file {:?}", path.as_ref()))?;

        let size_in_bytes = file
            .metadata()
            .context("failed to stat backing file")?
            .len();
        if size_in_bytes == 0 || size_in_bytes % BLOCK_SIZE as u64 != 0 {
            bail!(
                "backing file {:?} length {size_in_bytes} is not a positive multiple of {BLOCK_SIZE}",
                path.as_ref()
            );
        }

        Ok(Self {
            file: Mutex::new(file),
            size_in_bytes,
        })
    }

    /// Creates (or truncates) an image of the given block count, then
    /// opens it.  Used by tooling and tests.
    pub fn create<P: AsRef<Path>>(path: P, blocks: u64) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .with_context(|| {
                format!("failed to create backing file {:?}", path.as_ref())
            })?;
        let size_in_bytes = blocks * BLOCK_SIZE as u64;
        file.set_len(size_in_bytes)
            .context("failed to size backing file")?;
        Ok(Self {
            file: Mutex::new(file),
            size_in_bytes,
        })
    }

    fn locked(&self) -> Result<std::sync::MutexGuard<'_, File>> {
        self.file
            .lock()
            .map_err(|_| anyhow::anyhow!("backing file mutex poisoned"))
    }
}

impl BlockStore for FileBlockStore {
    fn read(&self, dst: &mut [u8], offset: u64) -> Result<()> {
        if offset + dst.len() as u64 > self.size_in_bytes {
            bail!(
                "read past end of store: {} > {}",
                offset + dst.len() as u64,
                self.size_in_bytes
            );
        }
        let mut f = self.locked()?;
        f.seek(SeekFrom::Start(offset)).context("seek failed")?;
        f.read_exact(dst).context("read failed")?;
        Ok(())
    }

    fn write(&self, src: &[u8], offset: u64) -> Result<()> {
        if offset + src.len() as u64 > self.size_in_bytes {
            bail!(
                "write past end of store: {} > {}",
                offset + src.len() as u64,
                self.size_in_bytes
            );
        }
        let mut f = self.locked()?;
        f.seek(SeekFrom::Start(offset)).context("seek failed")?;
        f.write_all(src).context("write failed")?;
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        let mut f = self.locked()?;
        f.flush().context("flush failed")?;
        f.sync_data().context("sync_data failed")?;
        Ok(())
    }

    fn size_in_bytes(&self) -> u64 {
        self.size_in_bytes
    }
}
