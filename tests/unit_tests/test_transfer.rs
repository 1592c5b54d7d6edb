// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use iscsi_target_rs::server::transfer::{
    PendingWrite, RESERVED_TTT, TransferEngine, next_ttt, plan_data_in_bursts,
};

#[test]
fn ttt_counter_never_hands_out_the_reserved_value() {
    for _ in 0..4096 {
        assert_ne!(next_ttt(), RESERVED_TTT);
    }
}

#[test]
fn ttt_counter_is_monotonic_within_a_run() {
    let a = next_ttt();
    let b = next_ttt();
    assert!(b > a, "{b} !> {a}");
}

#[test]
fn pending_write_assembles_out_of_order_bursts() {
    let mut pw = PendingWrite::new(0, 4, 4096, false);
    assert!(!pw.is_complete());
    assert_eq!(pw.remaining(), 4096);

    pw.absorb(2048, &[0xbb; 2048]).expect("second half");
    pw.absorb(0, &[0xaa; 2048]).expect("first half");

    assert!(pw.is_complete());
    assert!(pw.buf[..2048].iter().all(|&b| b == 0xaa));
    assert!(pw.buf[2048..].iter().all(|&b| b == 0xbb));
}

#[test]
fn pending_write_rejects_overrun() {
    let mut pw = PendingWrite::new(0, 0, 1024, false);
    assert!(pw.absorb(512, &[0u8; 1024]).is_err());
}

#[test]
fn r2t_planning_respects_max_burst() {
    let mut pw = PendingWrite::new(0, 0, 10_000, false);

    let (offset, desired, sn, ttt) = pw.next_r2t(4096);
    assert_eq!((offset, desired, sn), (0, 4096, 0));
    assert_ne!(ttt, RESERVED_TTT);

    pw.absorb(0, &vec![0u8; 4096]).expect("first burst");
    let (offset, desired, sn, ttt2) = pw.next_r2t(4096);
    assert_eq!((offset, desired, sn), (4096, 4096, 1));
    assert_ne!(ttt2, ttt, "every R2T gets a fresh tag");

    pw.absorb(4096, &vec![0u8; 4096]).expect("second burst");
    let (offset, desired, sn, _) = pw.next_r2t(4096);
    assert_eq!((offset, desired, sn), (8192, 10_000 - 8192, 2));
}

#[test]
fn engine_tracks_pending_by_itt() {
    let engine = TransferEngine::new();
    engine.insert(7, PendingWrite::new(0, 0, 512, false));

    assert!(engine.contains(7));
    assert!(!engine.contains(8));

    let total = engine.with_pending(7, |p| p.total_bytes);
    assert_eq!(total, Some(512));

    let removed = engine.remove(7).expect("present");
    assert_eq!(removed.total_bytes, 512);
    assert!(!engine.contains(7));
}

#[test]
fn engine_clear_releases_everything() {
    let engine = TransferEngine::new();
    engine.insert(1, PendingWrite::new(0, 0, 512, false));
    engine.insert(2, PendingWrite::new(0, 8, 512, true));
    engine.clear();
    assert!(!engine.contains(1));
    assert!(!engine.contains(2));
}

#[test]
fn data_in_burst_plan_covers_the_payload_exactly() {
    assert_eq!(plan_data_in_bursts(0, 8192), vec![]);
    assert_eq!(plan_data_in_bursts(100, 8192), vec![(0, 100)]);
    assert_eq!(
        plan_data_in_bursts(20_000, 8192),
        vec![(0, 8192), (8192, 8192), (16_384, 3616)]
    );

    // exact multiple: no empty tail burst
    assert_eq!(
        plan_data_in_bursts(16_384, 8192),
        vec![(0, 8192), (8192, 8192)]
    );
}
