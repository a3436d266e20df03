//! Segments: the unit of encoding for "which records belong to this set".
//!
//! A record number splits into a segment number and an offset within the
//! segment (see [`SegmentSize::split`]). A [`Segment`] holds the offsets
//! present in one segment using one of three encodings:
//!
//! - [`IntSegment`]: exactly one record, no allocation.
//! - [`ListSegment`]: ascending offsets, used while the count is at most the
//!   upper conversion limit.
//! - [`BitarraySegment`]: a bitmap of the whole segment, used above the limit
//!   and as the common form for boolean algebra.
//!
//! Representation changes only through [`Segment::promote`] and
//! [`Segment::normalize`]. Boolean operators always promote both operands
//! and return a Bitarray; callers normalize the result if they want a
//! cheaper encoding.
//!
//! # Example
//!
//! ```
//! use segbase::config::SegmentSize;
//! use segbase::segment::{ListSegment, Segment};
//!
//! let size = SegmentSize::default();
//! let a = Segment::List(ListSegment::from_offsets(0, None, vec![1, 5, 9], size));
//! let b = Segment::List(ListSegment::from_offsets(0, None, vec![5, 7], size));
//!
//! let both = a.and(&b).unwrap().normalize(true);
//! assert_eq!(both.record_numbers().collect::<Vec<_>>(), vec![5]);
//! ```

use std::borrow::Cow;
use std::sync::Arc;

use bit_vec::BitVec;

use crate::config::SegmentSize;
use crate::error::{RecordsetError, Result, SegbaseError};

pub mod bitarray;
pub mod int;
pub mod list;

pub use bitarray::BitarraySegment;
pub use int::IntSegment;
pub use list::ListSegment;

/// Opaque key associated with a segment, usually the index value it was
/// read from.
pub type IndexKey = Arc<[u8]>;

/// A cursor result: the segment's key and a record number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorEntry {
    pub key: Option<IndexKey>,
    pub record_number: u64,
}

/// The encoding a segment currently uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SegmentKind {
    Int,
    List,
    Bitarray,
}

/// Operations shared by the three encodings, in terms of offsets.
///
/// Cursor methods move the encoding's own position and return the offset
/// they land on, or `None` at either end (leaving the position unchanged).
/// With no position yet, `next` behaves as `first` and `prev` as `last`.
pub trait SegmentOps {
    fn segment_number(&self) -> u32;
    fn key(&self) -> Option<&IndexKey>;
    fn size(&self) -> SegmentSize;
    fn count_records(&self) -> usize;
    fn contains(&self, offset: u16) -> bool;
    fn first(&mut self) -> Option<u16>;
    fn last(&mut self) -> Option<u16>;
    fn next(&mut self) -> Option<u16>;
    fn prev(&mut self) -> Option<u16>;
    fn current(&self) -> Option<u16>;
    fn setat(&mut self, offset: u16) -> Option<u16>;
    /// Forget the cursor position.
    fn reset(&mut self);
    /// Number of offsets present that are strictly less than `offset`.
    fn rank(&self, offset: u16) -> usize;
    /// The offset at 0-based `position` in ascending order.
    fn select(&self, position: usize) -> Option<u16>;
    fn offsets(&self) -> Box<dyn Iterator<Item = u16> + '_>;
    fn to_bytes(&self) -> Vec<u8>;
    fn promote(&self) -> BitarraySegment;
}

macro_rules! dispatch {
    ($segment:expr, $inner:ident => $body:expr) => {
        match $segment {
            Segment::Int($inner) => $body,
            Segment::List($inner) => $body,
            Segment::Bitarray($inner) => $body,
        }
    };
}

/// A set of records within one segment.
#[derive(Debug, Clone)]
pub enum Segment {
    Int(IntSegment),
    List(ListSegment),
    Bitarray(BitarraySegment),
}

impl Segment {
    /// A Bitarray segment with no records, the form `place` creates.
    pub fn empty(segment_number: u32, key: Option<IndexKey>, size: SegmentSize) -> Self {
        Segment::Bitarray(BitarraySegment::empty(segment_number, key, size))
    }

    /// Decode a segment payload in the given encoding.
    pub fn decode(
        kind: SegmentKind,
        segment_number: u32,
        key: Option<IndexKey>,
        bytes: &[u8],
        size: SegmentSize,
    ) -> Result<Self> {
        Ok(match kind {
            SegmentKind::Int => Segment::Int(IntSegment::from_bytes(segment_number, key, bytes, size)?),
            SegmentKind::List => {
                Segment::List(ListSegment::from_bytes(segment_number, key, bytes, size)?)
            }
            SegmentKind::Bitarray => {
                Segment::Bitarray(BitarraySegment::from_bytes(segment_number, key, bytes, size)?)
            }
        })
    }

    pub fn kind(&self) -> SegmentKind {
        match self {
            Segment::Int(_) => SegmentKind::Int,
            Segment::List(_) => SegmentKind::List,
            Segment::Bitarray(_) => SegmentKind::Bitarray,
        }
    }

    pub fn segment_number(&self) -> u32 {
        dispatch!(self, inner => inner.segment_number())
    }

    pub fn key(&self) -> Option<&IndexKey> {
        dispatch!(self, inner => inner.key())
    }

    pub fn size(&self) -> SegmentSize {
        dispatch!(self, inner => inner.size())
    }

    /// Replace the key reported by cursor results.
    pub fn with_key(mut self, key: Option<IndexKey>) -> Self {
        dispatch!(&mut self, inner => inner.set_key(key));
        self
    }

    pub fn count_records(&self) -> usize {
        dispatch!(self, inner => inner.count_records())
    }

    pub fn is_empty(&self) -> bool {
        self.count_records() == 0
    }

    /// Whether `record_number` is in this segment's set.
    pub fn contains(&self, record_number: u64) -> bool {
        match self.local_offset(record_number) {
            Some(offset) => dispatch!(self, inner => inner.contains(offset)),
            None => false,
        }
    }

    pub fn first(&mut self) -> Option<CursorEntry> {
        let offset = dispatch!(self, inner => inner.first())?;
        Some(self.entry(offset))
    }

    pub fn last(&mut self) -> Option<CursorEntry> {
        let offset = dispatch!(self, inner => inner.last())?;
        Some(self.entry(offset))
    }

    pub fn next(&mut self) -> Option<CursorEntry> {
        let offset = dispatch!(self, inner => inner.next())?;
        Some(self.entry(offset))
    }

    pub fn prev(&mut self) -> Option<CursorEntry> {
        let offset = dispatch!(self, inner => inner.prev())?;
        Some(self.entry(offset))
    }

    pub fn current(&self) -> Option<CursorEntry> {
        let offset = dispatch!(self, inner => inner.current())?;
        Some(self.entry(offset))
    }

    /// Position on `record_number` if it is present.
    pub fn setat(&mut self, record_number: u64) -> Option<CursorEntry> {
        let offset = self.local_offset(record_number)?;
        let offset = dispatch!(self, inner => inner.setat(offset))?;
        Some(self.entry(offset))
    }

    pub fn reset(&mut self) {
        dispatch!(self, inner => inner.reset())
    }

    /// Number of records in this segment strictly below `record_number`.
    pub fn get_position_of_record_number(&self, record_number: u64) -> usize {
        let (segment_number, offset) = self.size().split(record_number);
        let own = self.segment_number();
        if segment_number < own {
            0
        } else if segment_number > own {
            self.count_records()
        } else {
            dispatch!(self, inner => inner.rank(offset))
        }
    }

    /// The record at 0-based `position`, counted from the lowest record when
    /// `forward` and from the highest otherwise.
    pub fn get_record_number_at_position(&self, position: usize, forward: bool) -> Option<u64> {
        let position = if forward {
            position
        } else {
            self.count_records().checked_sub(position + 1)?
        };
        let offset = dispatch!(self, inner => inner.select(position))?;
        Some(self.size().join(self.segment_number(), offset))
    }

    /// Ascending record numbers.
    pub fn record_numbers(&self) -> impl Iterator<Item = u64> + '_ {
        let size = self.size();
        let segment_number = self.segment_number();
        dispatch!(self, inner => inner.offsets()).map(move |offset| size.join(segment_number, offset))
    }

    /// Payload bytes in the current encoding.
    pub fn to_bytes(&self) -> Vec<u8> {
        dispatch!(self, inner => inner.to_bytes())
    }

    /// The Bitarray form, keeping the cursor position.
    pub fn promote(&self) -> Segment {
        Segment::Bitarray(self.promote_bitarray())
    }

    fn promote_bitarray(&self) -> BitarraySegment {
        let mut bits = dispatch!(self, inner => inner.promote());
        if let Some(offset) = dispatch!(self, inner => inner.current()) {
            bits.setat(offset);
        }
        bits
    }

    /// Promote in place and return the bitmap for mutation.
    pub fn bitarray_mut(&mut self) -> &mut BitarraySegment {
        if !matches!(self, Segment::Bitarray(_)) {
            *self = self.promote();
        }
        match self {
            Segment::Bitarray(bits) => bits,
            Segment::Int(_) | Segment::List(_) => unreachable!("segment promoted above"),
        }
    }

    /// Choose the cheapest encoding for the current count.
    ///
    /// A count above the upper limit always gives a Bitarray. Otherwise the
    /// governing limit is the upper one when `use_upper_limit` is set and the
    /// lower one when not: a count above it keeps the current encoding, a
    /// count of one becomes Int, anything else becomes List. Leaving a
    /// Bitarray between the limits alone keeps insert/delete cycles near the
    /// threshold from flipping representation.
    pub fn normalize(self, use_upper_limit: bool) -> Segment {
        let size = self.size();
        let count = self.count_records();
        let upper = size.upper_conversion_limit as usize;
        let limit = if use_upper_limit {
            upper
        } else {
            size.lower_conversion_limit as usize
        };
        let current = dispatch!(&self, inner => inner.current());
        let mut normalized = match self {
            Segment::Int(_) => return self,
            Segment::List(list) if count > upper => Segment::Bitarray(list.promote()),
            Segment::List(list) if count > limit || count != 1 => return Segment::List(list),
            Segment::Bitarray(bits) if count > limit => return Segment::Bitarray(bits),
            other => {
                let segment_number = other.segment_number();
                let key = other.key().cloned();
                let offsets: Vec<u16> = dispatch!(&other, inner => inner.offsets().collect());
                if count == 1 {
                    Segment::Int(IntSegment::new(segment_number, key, offsets[0], size))
                } else {
                    Segment::List(ListSegment::from_offsets(segment_number, key, offsets, size))
                }
            }
        };
        if let Some(offset) = current {
            dispatch!(&mut normalized, inner => inner.setat(offset));
        }
        normalized
    }

    /// Union; always returns a Bitarray.
    pub fn or(&self, other: &Segment) -> Result<Segment> {
        self.combine(other, "or", |left, right| left.or(right))
    }

    /// Intersection; always returns a Bitarray.
    pub fn and(&self, other: &Segment) -> Result<Segment> {
        self.combine(other, "and", |left, right| left.and(right))
    }

    /// Symmetric difference; always returns a Bitarray.
    pub fn xor(&self, other: &Segment) -> Result<Segment> {
        self.combine(other, "xor", |left, right| left.xor(right))
    }

    fn combine(
        &self,
        other: &Segment,
        operation: &'static str,
        op: impl Fn(&mut BitVec, &BitVec) -> bool,
    ) -> Result<Segment> {
        if self.segment_number() != other.segment_number() {
            return Err(RecordsetError::SegmentMismatch {
                operation,
                left: self.segment_number(),
                right: other.segment_number(),
            }
            .into());
        }
        if self.size().segment_width() != other.size().segment_width() {
            return Err(SegbaseError::invalid_operation(format!(
                "{operation}: segment widths differ"
            )));
        }
        let mut left = dispatch!(self, inner => inner.promote());
        let right: Cow<'_, BitarraySegment> = match other {
            Segment::Bitarray(bits) => Cow::Borrowed(bits),
            _ => Cow::Owned(other.promote_bitarray()),
        };
        op(left.bits_mut(), right.bits());
        Ok(Segment::Bitarray(left))
    }

    fn local_offset(&self, record_number: u64) -> Option<u16> {
        let (segment_number, offset) = self.size().split(record_number);
        (segment_number == self.segment_number()).then_some(offset)
    }

    fn entry(&self, offset: u16) -> CursorEntry {
        CursorEntry {
            key: self.key().cloned(),
            record_number: self.size().join(self.segment_number(), offset),
        }
    }
}

impl From<IntSegment> for Segment {
    fn from(segment: IntSegment) -> Self {
        Segment::Int(segment)
    }
}

impl From<ListSegment> for Segment {
    fn from(segment: ListSegment) -> Self {
        Segment::List(segment)
    }
}

impl From<BitarraySegment> for Segment {
    fn from(segment: BitarraySegment) -> Self {
        Segment::Bitarray(segment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn size() -> SegmentSize {
        SegmentSize::default().with_upper_conversion_limit(4)
    }

    fn list(segment_number: u32, offsets: &[u16]) -> Segment {
        Segment::List(ListSegment::from_offsets(
            segment_number,
            None,
            offsets.to_vec(),
            size(),
        ))
    }

    fn bits(segment_number: u32, offsets: &[u16]) -> Segment {
        let mut segment = Segment::empty(segment_number, None, size());
        for &offset in offsets {
            segment.bitarray_mut().set(offset);
        }
        segment
    }

    fn members(segment: &Segment) -> Vec<u64> {
        segment.record_numbers().collect()
    }

    #[test]
    fn test_cursor_entries_carry_key_and_record_number() {
        let key: IndexKey = Arc::from(&b"white"[..]);
        let mut segment = list(2, &[3, 4]).with_key(Some(key.clone()));

        let entry = segment.first().unwrap();
        assert_eq!(entry.key, Some(key));
        assert_eq!(entry.record_number, 2 * 8192 + 3);
        assert_eq!(segment.next().unwrap().record_number, 2 * 8192 + 4);
        assert!(segment.next().is_none());

        assert!(segment.setat(3).is_none());
        assert_eq!(segment.setat(2 * 8192 + 3).unwrap().record_number, 2 * 8192 + 3);
    }

    #[test]
    fn test_normalize_thresholds() {
        let size = SegmentSize::default()
            .with_upper_conversion_limit(6)
            .with_lower_conversion_limit(3);
        let make = |offsets: &[u16]| {
            let mut segment = Segment::empty(0, None, size);
            for &offset in offsets {
                segment.bitarray_mut().set(offset);
            }
            segment
        };

        assert_eq!(make(&[1]).normalize(true).kind(), SegmentKind::Int);
        assert_eq!(make(&[1, 2]).normalize(true).kind(), SegmentKind::List);
        assert_eq!(make(&[1, 2, 3, 4, 5, 6]).normalize(true).kind(), SegmentKind::List);
        assert_eq!(make(&[1, 2, 3, 4, 5, 6, 7]).normalize(true).kind(), SegmentKind::Bitarray);

        // Between the limits a Bitarray is only demoted against the upper limit.
        assert_eq!(make(&[1, 2, 3, 4]).normalize(false).kind(), SegmentKind::Bitarray);
        assert_eq!(make(&[1, 2, 3]).normalize(false).kind(), SegmentKind::List);

        let long_list = Segment::List(ListSegment::from_offsets(0, None, (0..7).collect(), size));
        assert_eq!(long_list.normalize(false).kind(), SegmentKind::Bitarray);
        let single = Segment::List(ListSegment::from_offsets(0, None, vec![9], size));
        assert_eq!(single.normalize(false).kind(), SegmentKind::Int);
        let empty = make(&[]).normalize(true);
        assert_eq!(empty.kind(), SegmentKind::List);
        assert!(empty.is_empty());
    }

    #[test]
    fn test_normalize_is_idempotent() {
        for offsets in [&[][..], &[7][..], &[1, 2, 3][..], &[1, 2, 3, 4, 5, 6][..]] {
            for use_upper_limit in [true, false] {
                let once = bits(0, offsets).normalize(use_upper_limit);
                let kind = once.kind();
                let membership = members(&once);
                let twice = once.normalize(use_upper_limit);
                assert_eq!(twice.kind(), kind);
                assert_eq!(members(&twice), membership);
            }
        }
    }

    #[test]
    fn test_promote_then_normalize_keeps_membership() {
        let int = Segment::Int(IntSegment::new(0, None, 12, size()));
        let list = list(0, &[1, 5, 9]);
        let bitarray = bits(0, &[0, 2, 4, 6, 8, 10]);

        for segment in [int, list, bitarray] {
            let membership = members(&segment);
            let round = segment.promote().normalize(true);
            assert_eq!(members(&round), membership);
        }
    }

    #[test]
    fn test_promote_keeps_position() {
        let mut segment = list(0, &[1, 5, 9]);
        segment.setat(5);

        let mut promoted = segment.promote();
        assert_eq!(promoted.current().unwrap().record_number, 5);
        assert_eq!(promoted.next().unwrap().record_number, 9);

        let normalized = promoted.normalize(true);
        assert_eq!(normalized.current().unwrap().record_number, 9);
    }

    #[test]
    fn test_algebra_membership() {
        let a = list(1, &[1, 2, 3]);
        let b = bits(1, &[2, 3, 4, 5, 6]);
        let base = 8192;

        let union = a.or(&b).unwrap();
        assert_eq!(union.kind(), SegmentKind::Bitarray);
        assert_eq!(members(&union), (1..=6).map(|o| base + o).collect::<Vec<_>>());

        let both = a.and(&b).unwrap();
        assert_eq!(both.kind(), SegmentKind::Bitarray);
        assert_eq!(members(&both), vec![base + 2, base + 3]);

        let either = a.xor(&b).unwrap();
        assert_eq!(members(&either), vec![base + 1, base + 4, base + 5, base + 6]);

        let int = Segment::Int(IntSegment::new(1, None, 4, size()));
        assert_eq!(members(&int.or(&a).unwrap()), vec![base + 1, base + 2, base + 3, base + 4]);

        // Operands are untouched.
        assert_eq!(a.kind(), SegmentKind::List);
        assert_eq!(members(&a), vec![base + 1, base + 2, base + 3]);
    }

    #[test]
    fn test_algebra_rejects_segment_mismatch() {
        let error = list(1, &[1]).or(&list(2, &[1])).unwrap_err();
        assert_eq!(
            error.as_recordset_error(),
            Some(&RecordsetError::SegmentMismatch {
                operation: "or",
                left: 1,
                right: 2
            })
        );
    }

    #[test]
    fn test_position_and_record_at_position_are_inverse() {
        let segment = list(3, &[4, 10, 200]);
        let base = 3 * 8192;

        assert_eq!(segment.get_position_of_record_number(base + 10), 1);
        assert_eq!(segment.get_position_of_record_number(0), 0);
        assert_eq!(segment.get_position_of_record_number(base + 8192), 3);

        for record_number in members(&segment) {
            let position = segment.get_position_of_record_number(record_number);
            assert_eq!(
                segment.get_record_number_at_position(position, true),
                Some(record_number)
            );
            let reverse = segment.count_records() - 1 - position;
            assert_eq!(
                segment.get_record_number_at_position(reverse, false),
                Some(record_number)
            );
        }
        assert_eq!(segment.get_record_number_at_position(3, true), None);
        assert_eq!(segment.get_record_number_at_position(3, false), None);
    }

    #[test]
    fn test_decode_each_kind() {
        let size = size();
        let int = Segment::decode(SegmentKind::Int, 0, None, &[0, 5], size).unwrap();
        assert_eq!(members(&int), vec![5]);

        let list = Segment::decode(SegmentKind::List, 0, None, &[0, 5, 0, 6], size).unwrap();
        assert_eq!(members(&list), vec![5, 6]);

        let bytes = bits(0, &[7]).to_bytes();
        let bitarray = Segment::decode(SegmentKind::Bitarray, 0, None, &bytes, size).unwrap();
        assert_eq!(members(&bitarray), vec![7]);
    }
}
