// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::Arc;

use anyhow::Result;
use iscsi_target_rs::{
    control_block::read::build_read10,
    models::{
        command::common::ScsiStatus,
        data::sense_data::SenseData,
    },
    storage::BlockStore,
};
use serial_test::serial;

use crate::integration_tests::common::{CountingStore, Initiator, spawn_target};

#[tokio::test]
#[serial]
async fn out_of_bounds_read_is_checked_before_the_store() -> Result<()> {
    let store = Arc::new(CountingStore::new(2048)?);
    let target = spawn_target(Arc::clone(&store) as Arc<dyn BlockStore>).await?;
    let mut init = Initiator::connect(target.addr).await?;
    init.login_normal(&[]).await?;

    // first block past the end
    let mut cdb = [0u8; 16];
    build_read10(&mut cdb, 2048, 1);
    init.send_scsi(&cdb, 512, true, false, &[]).await?;

    let (payload, status, sense_seg) = init.collect_data_in().await?;
    assert!(payload.is_empty(), "no data phase on a bounds failure");
    assert_eq!(status, u8::from(ScsiStatus::CheckCondition));

    let sense = SenseData::parse(&sense_seg)?;
    assert_eq!(sense.sense_key, 0x05, "ILLEGAL REQUEST");
    assert_eq!((sense.asc, sense.ascq), (0x21, 0x00), "LBA OUT OF RANGE");

    assert_eq!(store.read_count(), 0, "BlockStore must not be touched");

    // the straddling case fails the same way
    let mut cdb = [0u8; 16];
    build_read10(&mut cdb, 2047, 2);
    init.send_scsi(&cdb, 1024, true, false, &[]).await?;
    let (_, status, _) = init.collect_data_in().await?;
    assert_eq!(status, u8::from(ScsiStatus::CheckCondition));
    assert_eq!(store.read_count(), 0);

    // an in-bounds read still works afterwards
    let mut cdb = [0u8; 16];
    build_read10(&mut cdb, 2047, 1);
    init.send_scsi(&cdb, 512, true, false, &[]).await?;
    let (payload, status, _) = init.collect_data_in().await?;
    assert_eq!(status, u8::from(ScsiStatus::Good));
    assert_eq!(payload.len(), 512);
    assert_eq!(store.read_count(), 1);

    Ok(())
}
