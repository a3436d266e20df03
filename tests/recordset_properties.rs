use std::collections::BTreeSet;

use proptest::prelude::*;

use segbase::config::SegmentSize;
use segbase::recordset::registry::DatabaseId;
use segbase::recordset::{Recordset, RecordsetRegistry};
use segbase::secondary::Accumulator;
use segbase::segment::{IntSegment, ListSegment, Segment, SegmentKind};

fn size() -> SegmentSize {
    SegmentSize::with_segment_size_bytes(16).with_upper_conversion_limit(6)
}

fn width() -> u16 {
    size().segment_width() as u16
}

fn new_recordset() -> Recordset {
    Recordset::new(&RecordsetRegistry::new(DatabaseId::allocate()), size())
}

/// A segment over `offsets` in the encoding picked by `kind`.
fn build_segment(kind: u8, offsets: &BTreeSet<u16>) -> Segment {
    let size = size();
    match (kind % 3, offsets.len()) {
        (0, 1) => Segment::Int(IntSegment::new(0, None, offsets.iter().copied().sum(), size)),
        (0 | 1, _) => Segment::List(ListSegment::from_offsets(
            0,
            None,
            offsets.iter().copied().collect(),
            size,
        )),
        _ => {
            let mut segment = Segment::empty(0, None, size);
            let bits = segment.bitarray_mut();
            for offset in offsets {
                bits.set(*offset);
            }
            segment
        }
    }
}

fn offsets() -> impl Strategy<Value = BTreeSet<u16>> {
    prop::collection::btree_set(0..width(), 1..40)
}

fn membership(segment: &Segment) -> Vec<u64> {
    segment.record_numbers().collect()
}

proptest! {
    #[test]
    fn prop_traversal_visits_placed_records_in_order(
        records in prop::collection::btree_set(0u64..2_000, 0..200)
    ) {
        let mut recordset = new_recordset();
        for record_number in &records {
            recordset.place(*record_number).unwrap();
        }

        let mut forward = Vec::new();
        let mut entry = recordset.first();
        while let Some(found) = entry {
            forward.push(found.record_number);
            entry = recordset.next();
        }
        prop_assert_eq!(&forward, &records.iter().copied().collect::<Vec<_>>());

        let mut backward = Vec::new();
        let mut entry = recordset.last();
        while let Some(found) = entry {
            backward.push(found.record_number);
            entry = recordset.prev();
        }
        prop_assert_eq!(backward, records.iter().rev().copied().collect::<Vec<_>>());
    }

    #[test]
    fn prop_count_tracks_place_and_remove(
        operations in prop::collection::vec((any::<bool>(), 0u64..500), 0..300)
    ) {
        let mut recordset = new_recordset();
        let mut model = BTreeSet::new();
        for (place, record_number) in operations {
            if place {
                recordset.place(record_number).unwrap();
                model.insert(record_number);
            } else {
                recordset.remove(record_number).unwrap();
                model.remove(&record_number);
            }
        }
        prop_assert_eq!(recordset.count_records(), model.len());
        prop_assert!(recordset.record_numbers().eq(model.iter().copied()));
    }

    #[test]
    fn prop_normalize_is_idempotent(kind in any::<u8>(), offsets in offsets(), upper in any::<bool>()) {
        let once = build_segment(kind, &offsets).normalize(upper);
        let twice = once.clone().normalize(upper);
        prop_assert_eq!(once.kind(), twice.kind());
        prop_assert_eq!(membership(&once), membership(&twice));
    }

    #[test]
    fn prop_promote_then_normalize_keeps_membership(kind in any::<u8>(), offsets in offsets()) {
        let segment = build_segment(kind, &offsets);
        let promoted = segment.promote();
        prop_assert_eq!(promoted.kind(), SegmentKind::Bitarray);
        prop_assert_eq!(membership(&promoted.normalize(true)), membership(&segment));
    }

    #[test]
    fn prop_algebra_respects_membership(
        left_kind in any::<u8>(),
        right_kind in any::<u8>(),
        left in offsets(),
        right in offsets(),
    ) {
        let a = build_segment(left_kind, &left);
        let b = build_segment(right_kind, &right);
        let or = a.or(&b).unwrap();
        let and = a.and(&b).unwrap();
        let xor = a.xor(&b).unwrap();
        for offset in 0..width() {
            let record_number = u64::from(offset);
            let in_a = left.contains(&offset);
            let in_b = right.contains(&offset);
            prop_assert_eq!(or.contains(record_number), in_a || in_b);
            prop_assert_eq!(and.contains(record_number), in_a && in_b);
            prop_assert_eq!(xor.contains(record_number), in_a ^ in_b);
        }
    }

    #[test]
    fn prop_rank_and_select_are_inverses(
        records in prop::collection::btree_set(0u64..2_000, 1..150)
    ) {
        let mut recordset = new_recordset();
        for record_number in &records {
            recordset.place(*record_number).unwrap();
        }
        recordset.normalize(true);
        let total = records.len() as i64;
        for (position, record_number) in records.iter().enumerate() {
            let position = position as i64;
            prop_assert_eq!(recordset.get_position_of_record_number(*record_number) as i64, position);
            prop_assert_eq!(recordset.get_record_number_at_position(position), Some(*record_number));
            prop_assert_eq!(
                recordset.get_record_number_at_position(position - total),
                Some(*record_number)
            );
        }
        prop_assert_eq!(recordset.get_record_number_at_position(total), None);
    }

    #[test]
    fn prop_accumulator_escalates_without_regressing(offsets in offsets()) {
        let size = size();
        let upper = size.upper_conversion_limit as usize;
        let mut iter = offsets.iter().copied();
        let first = iter.next().unwrap();
        let mut accumulator = Accumulator::new(first);
        prop_assert_eq!(accumulator.kind(), SegmentKind::Int);
        for (hits, offset) in (2..).zip(iter) {
            prop_assert!(accumulator.add(offset, size));
            let expected = if hits <= upper { SegmentKind::List } else { SegmentKind::Bitarray };
            prop_assert_eq!(accumulator.kind(), expected);
            prop_assert_eq!(accumulator.count(), hits);
        }
        let segment = accumulator.into_segment(0, None, size);
        prop_assert_eq!(membership(&segment), offsets.iter().map(|o| u64::from(*o)).collect::<Vec<_>>());
    }
}
