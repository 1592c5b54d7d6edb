// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use iscsi_target_rs::models::data::sense_data::{
    FIXED_MIN_LEN, SenseData, asc, asc_ascq_to_str, key,
};

#[test]
fn fixed_sense_layout() {
    let sense = SenseData::current(key::ILLEGAL_REQUEST, asc::LBA_OUT_OF_RANGE);
    let bytes = sense.to_fixed_bytes();

    assert_eq!(bytes.len(), FIXED_MIN_LEN);
    assert_eq!(bytes[0], 0x70); // current, fixed format
    assert_eq!(bytes[2] & 0x0F, 0x05); // ILLEGAL REQUEST
    assert_eq!(bytes[7], 10); // additional length
    assert_eq!(bytes[12], 0x21); // ASC
    assert_eq!(bytes[13], 0x00); // ASCQ
}

#[test]
fn data_segment_is_length_prefixed() {
    let sense = SenseData::current(key::ILLEGAL_REQUEST, asc::INVALID_OPCODE);
    let seg = sense.to_data_segment();
    assert_eq!(seg.len(), 2 + FIXED_MIN_LEN);
    assert_eq!(
        u16::from_be_bytes([seg[0], seg[1]]) as usize,
        FIXED_MIN_LEN
    );
    assert_eq!(seg[2], 0x70);
}

#[test]
fn parse_roundtrip_both_forms() {
    let sense = SenseData::current(key::MEDIUM_ERROR, asc::WRITE_ERROR);

    let bare = SenseData::parse(&sense.to_fixed_bytes()).expect("bare parse");
    assert_eq!(bare, sense);

    let prefixed = SenseData::parse(&sense.to_data_segment()).expect("prefixed parse");
    assert_eq!(prefixed, sense);
}

#[test]
fn no_sense_reads_as_empty_report() {
    let sense = SenseData::no_sense();
    assert_eq!(sense.sense_key, key::NO_SENSE);
    assert_eq!((sense.asc, sense.ascq), (0x00, 0x00));
}

#[test]
fn short_buffer_is_an_error() {
    assert!(SenseData::parse(&[0x70; 8]).is_err());
}

#[test]
fn descriptions_for_emitted_codes() {
    assert_eq!(
        asc_ascq_to_str(0x21, 0x00),
        "LOGICAL BLOCK ADDRESS OUT OF RANGE"
    );
    assert_eq!(
        asc_ascq_to_str(0x20, 0x00),
        "INVALID COMMAND OPERATION CODE"
    );
    assert_eq!(asc_ascq_to_str(0xEE, 0xEE), "UNSPECIFIED / vendor specific");
}
