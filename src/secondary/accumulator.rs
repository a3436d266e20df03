//! Per-key staging values for deferred index updates.

use bit_vec::BitVec;

use crate::config::SegmentSize;
use crate::segment::{BitarraySegment, IndexKey, IntSegment, ListSegment, Segment, SegmentKind};

/// Offsets collected for one index key within the segment being loaded.
///
/// The representation only grows: `Int` on the first hit, `List` from the
/// second, `Bitarray` once the count passes the upper conversion limit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Accumulator {
    Int(u16),
    List(Vec<u16>),
    Bitarray { bits: BitVec, count: usize },
}

impl Accumulator {
    pub fn new(offset: u16) -> Self {
        Accumulator::Int(offset)
    }

    pub fn kind(&self) -> SegmentKind {
        match self {
            Accumulator::Int(_) => SegmentKind::Int,
            Accumulator::List(_) => SegmentKind::List,
            Accumulator::Bitarray { .. } => SegmentKind::Bitarray,
        }
    }

    pub fn count(&self) -> usize {
        match self {
            Accumulator::Int(_) => 1,
            Accumulator::List(offsets) => offsets.len(),
            Accumulator::Bitarray { count, .. } => *count,
        }
    }

    /// Add a hit. Returns false if `offset` was already present.
    pub fn add(&mut self, offset: u16, size: SegmentSize) -> bool {
        match self {
            Accumulator::Int(existing) => {
                if *existing == offset {
                    return false;
                }
                let mut offsets = vec![*existing, offset];
                offsets.sort_unstable();
                *self = Accumulator::List(offsets);
            }
            Accumulator::List(offsets) => {
                let Err(index) = offsets.binary_search(&offset) else {
                    return false;
                };
                offsets.insert(index, offset);
            }
            Accumulator::Bitarray { bits, count } => {
                let index = usize::from(offset);
                if bits.get(index).unwrap_or(true) {
                    return false;
                }
                bits.set(index, true);
                *count += 1;
                return true;
            }
        }
        self.promote_if_over(size);
        true
    }

    fn promote_if_over(&mut self, size: SegmentSize) {
        let Accumulator::List(offsets) = self else {
            return;
        };
        if offsets.len() <= size.upper_conversion_limit as usize {
            return;
        }
        let mut bits = BitVec::from_elem(size.segment_width() as usize, false);
        for offset in offsets.iter() {
            bits.set(usize::from(*offset), true);
        }
        let count = offsets.len();
        *self = Accumulator::Bitarray { bits, count };
    }

    /// The segment this accumulator stands for.
    pub fn into_segment(self, segment_number: u32, key: Option<IndexKey>, size: SegmentSize) -> Segment {
        match self {
            Accumulator::Int(offset) => {
                Segment::Int(IntSegment::new(segment_number, key, offset, size))
            }
            Accumulator::List(offsets) => {
                Segment::List(ListSegment::from_offsets(segment_number, key, offsets, size))
            }
            Accumulator::Bitarray { bits, .. } => {
                let mut segment = BitarraySegment::empty(segment_number, key, size);
                *segment.bits_mut() = bits;
                Segment::Bitarray(segment)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn size() -> SegmentSize {
        SegmentSize::default().with_upper_conversion_limit(4)
    }

    #[test]
    fn test_escalation_never_regresses() {
        let size = size();
        let mut accumulator = Accumulator::new(10);
        assert_eq!(accumulator.kind(), SegmentKind::Int);

        for (hit, offset) in [3u16, 7, 1].into_iter().enumerate() {
            assert!(accumulator.add(offset, size));
            assert_eq!(accumulator.kind(), SegmentKind::List, "hit {}", hit + 2);
        }
        assert_eq!(accumulator.count(), 4);

        assert!(accumulator.add(5, size));
        assert_eq!(accumulator.kind(), SegmentKind::Bitarray);
        assert_eq!(accumulator.count(), 5);
        assert!(accumulator.add(6, size));
        assert_eq!(accumulator.kind(), SegmentKind::Bitarray);

        let size = SegmentSize::default().with_upper_conversion_limit(1);
        let mut accumulator = Accumulator::new(3);
        assert!(accumulator.add(5, size));
        assert_eq!(accumulator.kind(), SegmentKind::Bitarray);
        assert_eq!(accumulator.count(), 2);
        assert_eq!(
            accumulator.into_segment(0, None, size).record_numbers().collect::<Vec<_>>(),
            vec![3, 5]
        );
    }

    #[test]
    fn test_duplicate_hits_are_ignored() {
        let size = size();
        let mut accumulator = Accumulator::new(2);
        assert!(!accumulator.add(2, size));
        assert_eq!(accumulator.kind(), SegmentKind::Int);
        accumulator.add(9, size);
        assert!(!accumulator.add(9, size));
        assert_eq!(accumulator, Accumulator::List(vec![2, 9]));
    }

    #[test]
    fn test_into_segment() {
        let size = size();
        let mut accumulator = Accumulator::new(8);
        for offset in [1, 2, 3, 4] {
            accumulator.add(offset, size);
        }
        let segment = accumulator.into_segment(2, None, size);
        assert_eq!(segment.kind(), SegmentKind::Bitarray);
        assert_eq!(
            segment.record_numbers().collect::<Vec<_>>(),
            vec![16385, 16386, 16387, 16388, 16392]
        );

        let segment = Accumulator::List(vec![4, 6]).into_segment(0, None, size);
        assert_eq!(segment.kind(), SegmentKind::List);
        assert_eq!(Accumulator::new(3).into_segment(0, None, size).count_records(), 1);
    }
}
