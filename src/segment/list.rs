//! Sorted offset-list segment.

use byteorder::{BigEndian, ByteOrder};

use crate::config::SegmentSize;
use crate::error::{Result, SegbaseError};
use crate::segment::bitarray::BitarraySegment;
use crate::segment::{IndexKey, SegmentOps};

/// A segment holding an ascending, duplicate-free list of offsets.
///
/// Used while the record count is at most the upper conversion limit.
#[derive(Debug)]
pub struct ListSegment {
    segment_number: u32,
    key: Option<IndexKey>,
    size: SegmentSize,
    offsets: Vec<u16>,
    position: Option<usize>,
}

impl ListSegment {
    /// Create an empty list segment.
    pub fn empty(segment_number: u32, key: Option<IndexKey>, size: SegmentSize) -> Self {
        ListSegment {
            segment_number,
            key,
            size,
            offsets: Vec::new(),
            position: None,
        }
    }

    /// Create a list segment from offsets in any order.
    pub fn from_offsets(
        segment_number: u32,
        key: Option<IndexKey>,
        mut offsets: Vec<u16>,
        size: SegmentSize,
    ) -> Self {
        offsets.sort_unstable();
        offsets.dedup();
        ListSegment {
            offsets,
            ..Self::empty(segment_number, key, size)
        }
    }

    /// Decode concatenated 2-byte big-endian offsets.
    pub fn from_bytes(
        segment_number: u32,
        key: Option<IndexKey>,
        bytes: &[u8],
        size: SegmentSize,
    ) -> Result<Self> {
        if bytes.len() % 2 != 0 {
            return Err(SegbaseError::corrupt(format!(
                "list segment {segment_number} has odd length {}",
                bytes.len()
            )));
        }
        let offsets: Vec<u16> = bytes.chunks_exact(2).map(BigEndian::read_u16).collect();
        if offsets.windows(2).any(|pair| pair[0] >= pair[1]) {
            return Err(SegbaseError::corrupt(format!(
                "list segment {segment_number} is not strictly ascending"
            )));
        }
        if let Some(&last) = offsets.last() {
            if u32::from(last) >= size.segment_width() {
                return Err(SegbaseError::corrupt(format!(
                    "offset {last} outside segment width {}",
                    size.segment_width()
                )));
            }
        }
        Ok(ListSegment {
            offsets,
            ..Self::empty(segment_number, key, size)
        })
    }

    /// Ascending offsets.
    pub fn as_slice(&self) -> &[u16] {
        &self.offsets
    }

    /// Add an offset, keeping order. Returns false if already present.
    pub fn insert(&mut self, offset: u16) -> bool {
        match self.offsets.binary_search(&offset) {
            Ok(_) => false,
            Err(index) => {
                self.offsets.insert(index, offset);
                if let Some(position) = self.position.as_mut() {
                    if index <= *position {
                        *position += 1;
                    }
                }
                true
            }
        }
    }

    /// Remove an offset. Returns false if absent.
    pub fn remove(&mut self, offset: u16) -> bool {
        match self.offsets.binary_search(&offset) {
            Ok(index) => {
                self.offsets.remove(index);
                self.position = match self.position {
                    Some(position) if index < position => Some(position - 1),
                    Some(position) if index == position => None,
                    other => other,
                };
                true
            }
            Err(_) => false,
        }
    }

    pub(crate) fn set_key(&mut self, key: Option<IndexKey>) {
        self.key = key;
    }

    fn move_to(&mut self, index: usize) -> Option<u16> {
        let offset = *self.offsets.get(index)?;
        self.position = Some(index);
        Some(offset)
    }
}

impl Clone for ListSegment {
    fn clone(&self) -> Self {
        ListSegment {
            offsets: self.offsets.clone(),
            ..Self::empty(self.segment_number, self.key.clone(), self.size)
        }
    }
}

impl SegmentOps for ListSegment {
    fn segment_number(&self) -> u32 {
        self.segment_number
    }

    fn key(&self) -> Option<&IndexKey> {
        self.key.as_ref()
    }

    fn size(&self) -> SegmentSize {
        self.size
    }

    fn count_records(&self) -> usize {
        self.offsets.len()
    }

    fn contains(&self, offset: u16) -> bool {
        self.offsets.binary_search(&offset).is_ok()
    }

    fn first(&mut self) -> Option<u16> {
        self.move_to(0)
    }

    fn last(&mut self) -> Option<u16> {
        let index = self.offsets.len().checked_sub(1)?;
        self.move_to(index)
    }

    fn next(&mut self) -> Option<u16> {
        match self.position {
            None => self.first(),
            Some(position) => self.move_to(position + 1),
        }
    }

    fn prev(&mut self) -> Option<u16> {
        match self.position {
            None => self.last(),
            Some(position) => self.move_to(position.checked_sub(1)?),
        }
    }

    fn current(&self) -> Option<u16> {
        self.position.and_then(|index| self.offsets.get(index).copied())
    }

    fn setat(&mut self, offset: u16) -> Option<u16> {
        let index = self.offsets.binary_search(&offset).ok()?;
        self.move_to(index)
    }

    fn reset(&mut self) {
        self.position = None;
    }

    fn rank(&self, offset: u16) -> usize {
        self.offsets.partition_point(|&existing| existing < offset)
    }

    fn select(&self, position: usize) -> Option<u16> {
        self.offsets.get(position).copied()
    }

    fn offsets(&self) -> Box<dyn Iterator<Item = u16> + '_> {
        Box::new(self.offsets.iter().copied())
    }

    fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![0u8; self.offsets.len() * 2];
        BigEndian::write_u16_into(&self.offsets, &mut bytes);
        bytes
    }

    fn promote(&self) -> BitarraySegment {
        let mut bits = BitarraySegment::empty(self.segment_number, self.key.clone(), self.size);
        for &offset in &self.offsets {
            bits.set(offset);
        }
        bits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(offsets: &[u16]) -> ListSegment {
        ListSegment::from_offsets(0, None, offsets.to_vec(), SegmentSize::default())
    }

    #[test]
    fn test_insert_keeps_order() {
        let mut segment = list(&[]);

        assert!(segment.insert(30));
        assert!(segment.insert(10));
        assert!(segment.insert(20));
        assert!(!segment.insert(20));

        assert_eq!(segment.as_slice(), &[10, 20, 30]);
        assert!(segment.remove(20));
        assert!(!segment.remove(20));
        assert_eq!(segment.as_slice(), &[10, 30]);
    }

    #[test]
    fn test_list_cursor() {
        let mut segment = list(&[5, 7, 9]);

        assert_eq!(segment.next(), Some(5));
        assert_eq!(segment.next(), Some(7));
        assert_eq!(segment.next(), Some(9));
        assert_eq!(segment.next(), None);
        assert_eq!(segment.current(), Some(9));
        assert_eq!(segment.prev(), Some(7));
        assert_eq!(segment.prev(), Some(5));
        assert_eq!(segment.prev(), None);
        assert_eq!(segment.current(), Some(5));

        assert_eq!(segment.setat(8), None);
        assert_eq!(segment.setat(9), Some(9));
        assert_eq!(segment.last(), Some(9));

        let mut empty = list(&[]);
        assert_eq!(empty.first(), None);
        assert_eq!(empty.last(), None);
        assert_eq!(empty.next(), None);
    }

    #[test]
    fn test_cursor_survives_insert() {
        let mut segment = list(&[10, 20]);
        segment.setat(20);

        segment.insert(15);
        assert_eq!(segment.current(), Some(20));

        segment.remove(10);
        assert_eq!(segment.current(), Some(20));
        assert_eq!(segment.prev(), Some(15));
    }

    #[test]
    fn test_list_rank_select() {
        let segment = list(&[3, 8, 21]);

        assert_eq!(segment.rank(3), 0);
        assert_eq!(segment.rank(8), 1);
        assert_eq!(segment.rank(9), 2);
        assert_eq!(segment.rank(21), 2);
        assert_eq!(segment.select(2), Some(21));
        assert_eq!(segment.select(3), None);
    }

    #[test]
    fn test_list_bytes() {
        let size = SegmentSize::default();
        let segment = list(&[1, 256, 8191]);
        let bytes = segment.to_bytes();
        assert_eq!(bytes, vec![0, 1, 1, 0, 0x1f, 0xff]);

        let decoded = ListSegment::from_bytes(0, None, &bytes, size).unwrap();
        assert_eq!(decoded.as_slice(), segment.as_slice());

        assert!(ListSegment::from_bytes(0, None, &[0, 1, 0], size).is_err());
        assert!(ListSegment::from_bytes(0, None, &[0, 2, 0, 1], size).is_err());
        assert!(ListSegment::from_bytes(0, None, &[0x20, 0], size).is_err());
    }
}
