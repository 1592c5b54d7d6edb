// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::Result;
use enum_dispatch::enum_dispatch;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::models::opcode::BhsOpcode;

/// Every Basic Header Segment is exactly this long.
pub const BHS_LEN: usize = 48;

/// Marker for BHS structs that are safe to reinterpret from/to raw bytes.
pub trait ZeroCopyBhs: KnownLayout + Immutable + IntoBytes + FromBytes {}

/// Fragmentation flags shared by all PDUs (RFC 7143 "F"/"C" bits).
///
/// Most PDUs travel in one frame, but Text and Login exchanges may split
/// their data segment across several PDUs; the receiver relies only on
/// the *Final* and *Continue* bits in byte 1 of the BHS.  Implementing
/// `PduFlags` lets the generic framing layer toggle and query those bits
/// without knowing the concrete PDU type.
#[enum_dispatch]
pub trait PduFlags: Sized {
    /// Current state of the **Final (F)** bit.
    fn final_bit(&self) -> bool;

    /// Force **F = 1** (and, where the PDU has it, clear **C**).
    fn set_final_bit(&mut self);

    /// Current state of the **Continue (C)** bit.
    fn continue_bit(&self) -> bool;

    /// Force **C = 1** (and clear **F**).
    fn set_continue_bit(&mut self);
}

/// Common functionality of any iSCSI **Basic Header Segment**.
///
/// A BHS is always 48 bytes; a PDU then may carry AHS sections, a
/// variable-length data segment, and optional digests.  This trait
/// exposes the length bookkeeping the framing layer needs: AHS and data
/// segment lengths plus the digest sizes that apply to this PDU type.
#[enum_dispatch]
pub trait BasicHeaderSegment: Sized + PduFlags {
    fn to_bhs_bytes(&self, buf: &mut [u8]) -> Result<()>;

    /// First BHS octet, decoded.
    fn opcode(&self) -> Result<BhsOpcode>;

    /// Initiator Task Tag of this PDU.
    fn initiator_task_tag(&self) -> u32;

    /// AHS length in bytes (always a multiple of 4).
    fn ahs_length_bytes(&self) -> usize;

    fn set_ahs_length_bytes(&mut self, len: u8);

    /// Number of actual payload bytes in the data segment.
    fn data_length_bytes(&self) -> usize;

    fn set_data_length_bytes(&mut self, len: u32);

    /// Wire length of BHS + AHS + data segment including padding,
    /// excluding digests.
    #[inline]
    fn total_length_bytes(&self) -> usize {
        let pad_ahs = (4 - (self.ahs_length_bytes() % 4)) % 4;
        let pad_data = (4 - (self.data_length_bytes() % 4)) % 4;

        BHS_LEN
            + self.ahs_length_bytes()
            + pad_ahs
            + self.data_length_bytes()
            + pad_data
    }

    /// Header digest length for this PDU under the given setting.
    /// Login-phase PDUs override this to 0: digests only take effect
    /// once the connection reaches full-feature phase.
    #[inline]
    fn header_digest_len(&self, enabled: bool) -> usize {
        4 * enabled as usize
    }

    /// Data digest length for this PDU under the given setting; zero
    /// when the data segment is empty.
    #[inline]
    fn data_digest_len(&self, enabled: bool) -> usize {
        4 * (self.data_length_bytes() > 0) as usize * enabled as usize
    }
}

// Forward PduFlags to &mut T
impl<T: PduFlags> PduFlags for &mut T {
    #[inline]
    fn final_bit(&self) -> bool {
        (**self).final_bit()
    }

    #[inline]
    fn set_final_bit(&mut self) {
        (**self).set_final_bit()
    }

    #[inline]
    fn continue_bit(&self) -> bool {
        (**self).continue_bit()
    }

    #[inline]
    fn set_continue_bit(&mut self) {
        (**self).set_continue_bit()
    }
}

// Forward BasicHeaderSegment to &mut T
impl<T: BasicHeaderSegment> BasicHeaderSegment for &mut T {
    #[inline]
    fn to_bhs_bytes(&self, buf: &mut [u8]) -> Result<()> {
        (**self).to_bhs_bytes(buf)
    }

    #[inline]
    fn opcode(&self) -> Result<BhsOpcode> {
        (**self).opcode()
    }

    #[inline]
    fn initiator_task_tag(&self) -> u32 {
        (**self).initiator_task_tag()
    }

    #[inline]
    fn ahs_length_bytes(&self) -> usize {
        (**self).ahs_length_bytes()
    }

    #[inline]
    fn set_ahs_length_bytes(&mut self, len: u8) {
        (**self).set_ahs_length_bytes(len)
    }

    #[inline]
    fn data_length_bytes(&self) -> usize {
        (**self).data_length_bytes()
    }

    #[inline]
    fn set_data_length_bytes(&mut self, len: u32) {
        (**self).set_data_length_bytes(len)
    }

    #[inline]
    fn total_length_bytes(&self) -> usize {
        (**self).total_length_bytes()
    }

    #[inline]
    fn header_digest_len(&self, en: bool) -> usize {
        (**self).header_digest_len(en)
    }

    #[inline]
    fn data_digest_len(&self, en: bool) -> usize {
        (**self).data_digest_len(en)
    }
}

/// Reads the AHS length (byte 4) and DataSegmentLength (bytes 5..8) out
/// of an undecoded BHS.  Those offsets are common to every opcode, which
/// lets the connection frame a PDU before knowing its type.
#[inline]
pub fn raw_segment_lengths(bhs: &[u8; BHS_LEN]) -> (usize, usize) {
    let ahs = (bhs[4] as usize) * 4;
    let data = u32::from_be_bytes([0, bhs[5], bhs[6], bhs[7]]) as usize;
    (ahs, data)
}

/// 24-bit big-endian DataSegmentLength helpers shared by the BHS impls.
#[inline]
pub fn decode_dsl(dsl: &[u8; 3]) -> usize {
    u32::from_be_bytes([0, dsl[0], dsl[1], dsl[2]]) as usize
}

#[inline]
pub fn encode_dsl(len: u32) -> [u8; 3] {
    let be = len.to_be_bytes();
    [be[1], be[2], be[3]]
}
