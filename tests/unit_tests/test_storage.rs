// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::atomic::{AtomicU32, Ordering};

use anyhow::Result;
use iscsi_target_rs::storage::{
    BLOCK_SIZE, BlockStore, BoundsCheck, MemBlockStore, file::FileBlockStore,
};

#[test]
fn mem_store_roundtrip() -> Result<()> {
    let store = MemBlockStore::new(16 * BLOCK_SIZE as u64)?;
    assert_eq!(store.size_in_blocks(), 16);
    assert_eq!(store.block_size(), 512);

    let payload = vec![0xabu8; 1024];
    store.write(&payload, 512)?;

    let mut back = vec![0u8; 1024];
    store.read(&mut back, 512)?;
    assert_eq!(back, payload);

    // untouched neighbors stay zero
    let mut first = vec![0u8; 512];
    store.read(&mut first, 0)?;
    assert!(first.iter().all(|&b| b == 0));
    Ok(())
}

#[test]
fn mem_store_rejects_unaligned_size() {
    assert!(MemBlockStore::new(1000).is_err());
}

#[test]
fn bounds_check_three_outcomes() -> Result<()> {
    let store = MemBlockStore::new(8 * BLOCK_SIZE as u64)?;

    assert_eq!(store.check_bounds(0, 8), BoundsCheck::Ok);
    assert_eq!(store.check_bounds(7, 1), BoundsCheck::Ok);
    assert_eq!(store.check_bounds(8, 1), BoundsCheck::LbaOutOfRange);
    assert_eq!(store.check_bounds(1000, 0), BoundsCheck::LbaOutOfRange);
    assert_eq!(store.check_bounds(7, 2), BoundsCheck::LengthOutOfRange);
    assert_eq!(store.check_bounds(0, 9), BoundsCheck::LengthOutOfRange);
    Ok(())
}

#[test]
fn out_of_range_io_fails_without_touching_data() -> Result<()> {
    let store = MemBlockStore::new(4 * BLOCK_SIZE as u64)?;
    let mut buf = vec![0u8; 1024];
    assert!(store.read(&mut buf, 4096).is_err());
    assert!(store.write(&buf, 2048).is_err());
    Ok(())
}

fn scratch_file(name: &str) -> std::path::PathBuf {
    static SEQ: AtomicU32 = AtomicU32::new(0);
    let seq = SEQ.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!(
        "iscsi-target-rs-{name}-{}-{seq}.img",
        std::process::id()
    ))
}

#[test]
fn file_store_roundtrip() -> Result<()> {
    let path = scratch_file("roundtrip");
    let store = FileBlockStore::create(&path, 32)?;
    assert_eq!(store.size_in_bytes(), 32 * 512);

    let payload: Vec<u8> = (0..2048u32).map(|i| (i % 251) as u8).collect();
    store.write(&payload, 3 * 512)?;
    store.flush()?;

    let mut back = vec![0u8; payload.len()];
    store.read(&mut back, 3 * 512)?;
    assert_eq!(back, payload);

    // reopen sees the same bytes
    drop(store);
    let reopened = FileBlockStore::open(&path)?;
    let mut again = vec![0u8; payload.len()];
    reopened.read(&mut again, 3 * 512)?;
    assert_eq!(again, payload);

    std::fs::remove_file(&path).ok();
    Ok(())
}

#[test]
fn file_store_refuses_ragged_images() -> Result<()> {
    let path = scratch_file("ragged");
    std::fs::write(&path, vec![0u8; 700])?;
    assert!(FileBlockStore::open(&path).is_err());
    std::fs::remove_file(&path).ok();
    Ok(())
}

#[test]
fn file_store_refuses_missing_file() {
    let path = scratch_file("missing");
    assert!(FileBlockStore::open(&path).is_err());
}
