// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Generic PDU framing: one 48-byte BHS plus the wire trailer
//! (AHS + pad + \[HeaderDigest\] + Data + pad + \[DataDigest\]).
//!
//! The same container is used on both directions: inbound frames are
//! checked against the negotiated digests as they are adopted, outbound
//! frames compute their digests in [`PduFrame::build`].

use std::{fmt, marker::PhantomData};

use anyhow::{Result, anyhow, bail};
use bytes::BytesMut;
use crc32c::crc32c_append;

use crate::{
    errors::CodecError,
    models::common::{BHS_LEN, BasicHeaderSegment, PduFlags, ZeroCopyBhs},
};

/// Which digests are active on a connection.  Both are off until the
/// login phase completes, whatever was negotiated.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DigestFlags {
    pub header: bool,
    pub data: bool,
}

impl DigestFlags {
    pub const NONE: DigestFlags = DigestFlags { header: false, data: false };

    pub fn new(header: bool, data: bool) -> Self {
        Self { header, data }
    }
}

#[inline]
pub fn pad_len(n: usize) -> usize {
    (4 - (n % 4)) % 4
}

#[inline]
fn crc32c_with_padding(parts: &[&[u8]], pad: usize) -> u32 {
    let mut acc = 0u32;
    for p in parts {
        if !p.is_empty() {
            acc = crc32c_append(acc, p);
        }
    }
    if pad != 0 {
        let zeros = [0u8; 3];
        acc = crc32c_append(acc, &zeros[..pad]);
    }
    acc
}

/// CRC32C over BHS + AHS (+ AHS padding), per RFC 3720 § 10.2.3.
#[inline]
pub fn compute_header_digest(bhs: &[u8], ahs: &[u8]) -> u32 {
    crc32c_with_padding(&[bhs, ahs], pad_len(ahs.len()))
}

/// CRC32C over the data segment (+ padding).
#[inline]
pub fn compute_data_digest(data: &[u8]) -> u32 {
    crc32c_with_padding(&[data], pad_len(data.len()))
}

/// Verifies an inbound wire trailer without committing to a PDU type:
/// AHS and data lengths sit at fixed BHS offsets, so digest checking
/// only needs the raw header.  Returns the data segment's range within
/// `trailer`.
///
/// Login-phase PDUs are exempt from digests by the phase rule (the
/// caller passes `DigestFlags::NONE` until full-feature), so the
/// per-type digest overrides never disagree with this path.
pub fn verify_wire_trailer(
    bhs: &[u8; BHS_LEN],
    trailer: &[u8],
    digests: DigestFlags,
) -> Result<std::ops::Range<usize>, CodecError> {
    let (ahs_len, data_len) = crate::models::common::raw_segment_lengths(bhs);

    let hd_len = 4 * digests.header as usize;
    let dd_len = 4 * (digests.data && data_len > 0) as usize;
    let ahs_pad = pad_len(ahs_len);
    let data_pad = pad_len(data_len);

    let need = ahs_len + ahs_pad + hd_len + data_len + data_pad + dd_len;
    if trailer.len() < need {
        return Err(CodecError::InvalidField("DataSegmentLength"));
    }

    let mut off = ahs_len + ahs_pad;

    if hd_len != 0 {
        let got = u32::from_be_bytes(
            trailer[off..off + 4]
                .try_into()
                .map_err(|_| CodecError::InvalidField("HeaderDigest"))?,
        );
        off += 4;
        let want = compute_header_digest(bhs, &trailer[..ahs_len]);
        if got != want {
            return Err(CodecError::HeaderDigestMismatch { got, want });
        }
    }

    let data_start = off;
    off += data_len + data_pad;

    if dd_len != 0 {
        let got = u32::from_be_bytes(
            trailer[off..off + 4]
                .try_into()
                .map_err(|_| CodecError::InvalidField("DataDigest"))?,
        );
        let want =
            compute_data_digest(&trailer[data_start..data_start + data_len]);
        if got != want {
            return Err(CodecError::DataDigestMismatch { got, want });
        }
    }

    Ok(data_start..data_start + data_len)
}

/// One framed PDU, typed by its BHS view `T`.
#[derive(PartialEq)]
pub struct PduFrame<T> {
    pub bhs: [u8; BHS_LEN],
    payload: BytesMut,

    digests: DigestFlags,
    /// True when `payload` is a raw wire trailer (AHS/pad/digests
    /// included); false when it holds bare outbound data.
    framed: bool,
    pub header_digest: Option<u32>,
    pub data_digest: Option<u32>,

    _marker: PhantomData<T>,
}

impl<T> PduFrame<T>
where T: BasicHeaderSegment + ZeroCopyBhs
{
    /// Wraps a freshly built BHS for an outbound PDU.
    pub fn new_reply(bhs: [u8; BHS_LEN], digests: DigestFlags) -> Self {
        Self {
            bhs,
            payload: BytesMut::new(),
            digests,
            framed: false,
            header_digest: None,
            data_digest: None,
            _marker: PhantomData,
        }
    }

    /// Adopts an inbound `(BHS, trailer)` pair as framed off the socket
    /// and verifies the digests that were active when it was read.
    ///
    /// The trailer layout is
    /// `AHS + pad + [HeaderDigest] + Data + pad + [DataDigest]`.
    pub fn from_wire(
        bhs: [u8; BHS_LEN],
        trailer: BytesMut,
        digests: DigestFlags,
    ) -> Result<Self, CodecError> {
        let mut frame = Self {
            bhs,
            payload: trailer,
            digests,
            framed: true,
            header_digest: None,
            data_digest: None,
            _marker: PhantomData,
        };

        let (ahs_len, data_len) = {
            let h = frame
                .header_view()
                .map_err(|_| CodecError::InvalidField("BHS"))?;
            (h.ahs_length_bytes(), h.data_length_bytes())
        };

        let hd_len = 4 * digests.header as usize;
        let dd_len = 4 * (digests.data && data_len > 0) as usize;

        let ahs_pad = pad_len(ahs_len);
        let data_pad = pad_len(data_len);

        let need = ahs_len + ahs_pad + hd_len + data_len + data_pad + dd_len;
        if frame.payload.len() < need {
            return Err(CodecError::InvalidField("DataSegmentLength"));
        }
        frame.payload.truncate(need);

        let mut off = ahs_len + ahs_pad;

        if hd_len != 0 {
            let got = u32::from_be_bytes(
                frame.payload[off..off + 4]
                    .try_into()
                    .map_err(|_| CodecError::InvalidField("HeaderDigest"))?,
            );
            off += 4;
            let want = compute_header_digest(
                &frame.bhs,
                &frame.payload[..ahs_len],
            );
            if got != want {
                return Err(CodecError::HeaderDigestMismatch { got, want });
            }
            frame.header_digest = Some(got);
        }

        let data_start = off;
        off += data_len + data_pad;

        if dd_len != 0 {
            let got = u32::from_be_bytes(
                frame.payload[off..off + 4]
                    .try_into()
                    .map_err(|_| CodecError::InvalidField("DataDigest"))?,
            );
            let want = compute_data_digest(
                &frame.payload[data_start..data_start + data_len],
            );
            if got != want {
                return Err(CodecError::DataDigestMismatch { got, want });
            }
            frame.data_digest = Some(got);
        }

        Ok(frame)
    }

    #[inline]
    pub fn header_view(&self) -> Result<&T> {
        T::ref_from_bytes(self.bhs.as_slice())
            .map_err(|e| anyhow!("{}", e.to_string()))
    }

    #[inline]
    pub fn header_view_mut(&mut self) -> Result<&mut T> {
        T::mut_from_bytes(self.bhs.as_mut_slice())
            .map_err(|e| anyhow!("{}", e.to_string()))
    }

    pub fn additional_header(&self) -> Result<&[u8]> {
        let ahs = self.header_view()?.ahs_length_bytes();
        Ok(&self.payload[..ahs])
    }

    /// The data segment, without AHS, padding or digests.
    pub fn data(&self) -> Result<&[u8]> {
        if !self.framed {
            return Ok(&self.payload);
        }
        let header = self.header_view()?;
        let ahs = header.ahs_length_bytes();
        let hd = header.header_digest_len(self.digests.header);
        let data_len = header.data_length_bytes();
        let start = ahs + pad_len(ahs) + hd;
        Ok(&self.payload[start..start + data_len])
    }

    /// Appends raw bytes to the data segment of an outbound PDU and
    /// updates `DataSegmentLength`.  Only valid on frames created with
    /// [`PduFrame::new_reply`] (the trailer holds bare data there).
    pub fn append_data(&mut self, more: &[u8]) {
        self.payload.extend_from_slice(more);
        let len = self.payload.len() as u32;
        if let Ok(h) = self.header_view_mut() {
            h.set_data_length_bytes(len);
        }
    }

    /// Finishes an outbound PDU: computes digests, inserts padding, and
    /// returns the `(header, body)` pair ready for the socket.
    pub fn build(&mut self) -> Result<([u8; BHS_LEN], Vec<u8>)> {
        if self.framed {
            bail!("cannot rebuild an inbound frame");
        }
        let (hd_len, dd_len, data_len) = {
            let digests = self.digests;
            let header = self.header_view()?;
            if header.ahs_length_bytes() != 0 {
                bail!("this target never emits AHS");
            }
            (
                header.header_digest_len(digests.header),
                header.data_digest_len(digests.data),
                header.data_length_bytes(),
            )
        };

        if data_len != self.payload.len() {
            bail!(
                "DataSegmentLength {} disagrees with payload {}",
                data_len,
                self.payload.len()
            );
        }

        let data_pad = pad_len(data_len);
        let mut body = Vec::with_capacity(hd_len + data_len + data_pad + dd_len);

        self.header_digest = (hd_len != 0)
            .then(|| compute_header_digest(&self.bhs, &[]));
        self.data_digest = (dd_len != 0)
            .then(|| compute_data_digest(&self.payload));

        if let Some(hd) = self.header_digest {
            body.extend_from_slice(&hd.to_be_bytes());
        }

        body.extend_from_slice(&self.payload);
        body.extend(std::iter::repeat_n(0u8, data_pad));

        if let Some(dd) = self.data_digest {
            body.extend_from_slice(&dd.to_be_bytes());
        }

        Ok((self.bhs, body))
    }
}

struct HexPreview<'a>(&'a [u8]);

impl fmt::Debug for HexPreview<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const MAX: usize = 64;
        let slice = if self.0.len() > MAX { &self.0[..MAX] } else { self.0 };
        write!(f, "\"")?;
        for (i, b) in slice.iter().enumerate() {
            if i != 0 {
                write!(f, " ")?;
            }
            write!(f, "{b:02x}")?;
        }
        if self.0.len() > MAX {
            write!(f, " ... (+{} bytes)", self.0.len() - MAX)?;
        }
        write!(f, "\"")
    }
}

impl<T> fmt::Debug for PduFrame<T>
where T: BasicHeaderSegment + PduFlags + ZeroCopyBhs + fmt::Debug
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ds = f.debug_struct("PduFrame");

        match self.header_view() {
            Ok(h) => ds.field("header", &h),
            Err(_) => ds.field("header", &"<unparsable>"),
        };

        match self.data() {
            Ok(data) if !data.is_empty() => {
                ds.field("data_len", &data.len());
                ds.field("data_preview", &HexPreview(data));
            },
            Ok(_) => {
                ds.field("data", &"[]");
            },
            Err(_) => {
                ds.field("data", &"<unparsable>");
            },
        }

        if let Some(hd) = self.header_digest {
            ds.field("header_digest", &format_args!("{hd:#010x}"));
        }
        if let Some(dd) = self.data_digest {
            ds.field("data_digest", &format_args!("{dd:#010x}"));
        }

        ds.finish()
    }
}
