// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::Result;
use bytes::BytesMut;
use iscsi_target_rs::{
    errors::CodecError,
    models::{
        common::{BHS_LEN, raw_segment_lengths},
        data_format::{
            DigestFlags, PduFrame, compute_header_digest, pad_len,
            verify_wire_trailer,
        },
        login::{common::Stage, request::LoginRequestBuilder},
        nop::response::{NopInResponse, NopInResponseBuilder},
        opcode::{BhsOpcode, Opcode},
        parse::Pdu,
        reject::reason::RejectReason,
    },
};

const ISID: [u8; 6] = [0x00, 0x02, 0x3d, 0x00, 0x00, 0x0e];

#[test]
fn opcode_byte_roundtrip() -> Result<()> {
    for op in [
        Opcode::NopOut,
        Opcode::ScsiCommandReq,
        Opcode::LoginReq,
        Opcode::TextReq,
        Opcode::ScsiDataOut,
        Opcode::LogoutReq,
        Opcode::NopIn,
        Opcode::ScsiCommandResp,
        Opcode::LoginResp,
        Opcode::TextResp,
        Opcode::ScsiDataIn,
        Opcode::LogoutResp,
        Opcode::ReadyToTransfer,
        Opcode::AsyncMessage,
        Opcode::Reject,
    ] {
        let decoded = BhsOpcode::try_from(op as u8)?;
        assert_eq!(decoded.opcode, op);
        assert!(!decoded.immediate);

        let with_i = BhsOpcode::try_from(op as u8 | 0x40)?;
        assert!(with_i.immediate);
    }
    assert!(BhsOpcode::try_from(0x3e).is_err());
    Ok(())
}

#[test]
fn login_request_golden_bytes() -> Result<()> {
    use hex_literal::hex;

    let builder = LoginRequestBuilder::new(ISID, 0)
        .transit()
        .csg(Stage::Operational)
        .nsg(Stage::FullFeature)
        .connection_id(1)
        .cmd_sn(4)
        .exp_stat_sn(7);

    let mut buf = [0u8; BHS_LEN];
    builder.header.to_bhs_bytes(&mut buf)?;

    let expected = hex!(
        "43 87 00 00 00 00 00 00"
        "00 02 3d 00 00 0e 00 00"
        "00 00 00 00 00 01 00 00"
        "00 00 00 04 00 00 00 07"
        "00 00 00 00 00 00 00 00"
        "00 00 00 00 00 00 00 00"
    );
    assert_eq!(buf, expected, "wire image drifted");
    assert_eq!(hex::encode(ISID), "00023d00000e");
    Ok(())
}

#[test]
fn login_request_bhs_layout() -> Result<()> {
    let builder = LoginRequestBuilder::new(ISID, 0)
        .transit()
        .csg(Stage::Operational)
        .nsg(Stage::FullFeature)
        .connection_id(1)
        .cmd_sn(4)
        .exp_stat_sn(7);

    let mut buf = [0u8; BHS_LEN];
    builder.header.to_bhs_bytes(&mut buf)?;

    // I-bit + opcode 0x03
    assert_eq!(buf[0], 0x43);
    // T=1, CSG=1, NSG=3
    assert_eq!(buf[1], 0x87);
    assert_eq!(&buf[8..14], &ISID);
    assert_eq!(u16::from_be_bytes([buf[20], buf[21]]), 1);
    assert_eq!(u32::from_be_bytes([buf[24], buf[25], buf[26], buf[27]]), 4);
    assert_eq!(u32::from_be_bytes([buf[28], buf[29], buf[30], buf[31]]), 7);

    let (ahs, data) = raw_segment_lengths(&buf);
    assert_eq!((ahs, data), (0, 0));
    Ok(())
}

fn sample_nop_in(data: &[u8], digests: DigestFlags) -> Result<([u8; BHS_LEN], Vec<u8>)> {
    let builder = NopInResponseBuilder::new()
        .initiator_task_tag(0x11223344)
        .stat_sn(5)
        .cmd_window(6, 37);
    let mut bhs = [0u8; BHS_LEN];
    builder.header.to_bhs_bytes(&mut bhs)?;

    let mut frame = PduFrame::<NopInResponse>::new_reply(bhs, digests);
    frame.append_data(data);
    Ok(frame.build()?)
}

#[test]
fn digest_roundtrip_matrix() -> Result<()> {
    let payload = b"ping payload of uneven length!!";
    for header in [false, true] {
        for data in [false, true] {
            let digests = DigestFlags::new(header, data);
            let (bhs, body) = sample_nop_in(payload, digests)?;

            let range = verify_wire_trailer(&bhs, &body, digests)
                .map_err(|e| anyhow::anyhow!("verify failed: {e}"))?;
            assert_eq!(&body[range], payload.as_slice());

            // the typed path agrees
            let frame = PduFrame::<NopInResponse>::from_wire(
                bhs,
                BytesMut::from(&body[..]),
                digests,
            )
            .map_err(|e| anyhow::anyhow!("from_wire failed: {e}"))?;
            assert_eq!(frame.data()?, payload.as_slice());
            assert_eq!(frame.header_view()?.initiator_task_tag, 0x11223344);
        }
    }
    Ok(())
}

#[test]
fn payload_padded_to_four_bytes() -> Result<()> {
    let (bhs, body) = sample_nop_in(b"abcde", DigestFlags::NONE)?;
    let (_, data_len) = raw_segment_lengths(&bhs);
    assert_eq!(data_len, 5);
    assert_eq!(body.len(), 5 + pad_len(5));
    assert_eq!(&body[5..], &[0, 0, 0]);
    Ok(())
}

#[test]
fn corrupt_header_digest_is_detected() -> Result<()> {
    let digests = DigestFlags::new(true, false);
    let (bhs, mut body) = sample_nop_in(b"data", digests)?;

    // digest sits first in the trailer; flip one bit
    body[0] ^= 0x01;

    match verify_wire_trailer(&bhs, &body, digests) {
        Err(CodecError::HeaderDigestMismatch { .. }) => {},
        other => panic!("expected HeaderDigestMismatch, got {other:?}"),
    }
    Ok(())
}

#[test]
fn corrupt_data_digest_is_detected() -> Result<()> {
    let digests = DigestFlags::new(false, true);
    let (bhs, mut body) = sample_nop_in(b"data", digests)?;

    let last = body.len() - 1;
    body[last] ^= 0x80;

    match verify_wire_trailer(&bhs, &body, digests) {
        Err(CodecError::DataDigestMismatch { .. }) => {},
        other => panic!("expected DataDigestMismatch, got {other:?}"),
    }
    Ok(())
}

#[test]
fn header_digest_is_castagnoli() {
    // CRC32C("123456789") = 0xE3069283, the classic check value
    let mut bhs = [0u8; BHS_LEN];
    bhs[..9].copy_from_slice(b"123456789");
    let full = compute_header_digest(&bhs[..9], &[]);
    assert_eq!(full, 0xE306_9283);
}

#[test]
fn truncated_trailer_is_rejected() -> Result<()> {
    let (bhs, body) = sample_nop_in(b"0123456789abcdef", DigestFlags::NONE)?;
    let short = &body[..body.len() - 4];
    assert!(verify_wire_trailer(&bhs, short, DigestFlags::NONE).is_err());
    Ok(())
}

#[test]
fn typed_sum_dispatches_on_the_opcode_byte() -> Result<()> {
    let builder = LoginRequestBuilder::new(ISID, 0)
        .csg(Stage::Operational)
        .nsg(Stage::FullFeature)
        .cmd_sn(3);
    let mut bhs = [0u8; BHS_LEN];
    builder.header.to_bhs_bytes(&mut bhs)?;

    match Pdu::from_bhs_bytes(&mut bhs) {
        Ok(Pdu::LoginRequest(req)) => {
            assert_eq!(req.cmd_sn.get(), 3);
        },
        other => panic!("expected LoginRequest view, got {other:?}"),
    }

    let mut junk = [0u8; BHS_LEN];
    junk[0] = 0x3e; // reserved opcode
    assert!(matches!(
        Pdu::from_bhs_bytes(&mut junk),
        Err(CodecError::UnknownOpcode(0x3e))
    ));
    Ok(())
}

#[test]
fn codec_errors_map_to_reject_reasons() {
    assert_eq!(
        CodecError::HeaderDigestMismatch { got: 0, want: 1 }.reject_reason(),
        RejectReason::HeaderDigestError
    );
    assert_eq!(
        CodecError::DataDigestMismatch { got: 0, want: 1 }.reject_reason(),
        RejectReason::DataDigestError
    );
    assert_eq!(
        CodecError::UnknownOpcode(0x3e).reject_reason(),
        RejectReason::CommandNotSupported
    );
    assert_eq!(
        CodecError::InvalidField("BHS").reject_reason(),
        RejectReason::InvalidPduField
    );
}
