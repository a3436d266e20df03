//! Single-record segment.

use byteorder::{BigEndian, ByteOrder};

use crate::config::SegmentSize;
use crate::error::{Result, SegbaseError};
use crate::segment::bitarray::BitarraySegment;
use crate::segment::{IndexKey, SegmentOps};

/// A segment holding exactly one record, stored as its offset.
#[derive(Debug)]
pub struct IntSegment {
    segment_number: u32,
    key: Option<IndexKey>,
    size: SegmentSize,
    offset: u16,
    positioned: bool,
}

impl IntSegment {
    /// Create a segment holding the record at `offset`.
    pub fn new(segment_number: u32, key: Option<IndexKey>, offset: u16, size: SegmentSize) -> Self {
        IntSegment {
            segment_number,
            key,
            size,
            offset,
            positioned: false,
        }
    }

    /// Decode the 2-byte big-endian offset form.
    pub fn from_bytes(
        segment_number: u32,
        key: Option<IndexKey>,
        bytes: &[u8],
        size: SegmentSize,
    ) -> Result<Self> {
        if bytes.len() != 2 {
            return Err(SegbaseError::corrupt(format!(
                "single record segment {segment_number} has {} bytes",
                bytes.len()
            )));
        }
        let offset = BigEndian::read_u16(bytes);
        if u32::from(offset) >= size.segment_width() {
            return Err(SegbaseError::corrupt(format!(
                "offset {offset} outside segment width {}",
                size.segment_width()
            )));
        }
        Ok(Self::new(segment_number, key, offset, size))
    }

    /// The record's offset within the segment.
    pub fn offset(&self) -> u16 {
        self.offset
    }

    pub(crate) fn set_key(&mut self, key: Option<IndexKey>) {
        self.key = key;
    }
}

impl Clone for IntSegment {
    fn clone(&self) -> Self {
        Self::new(self.segment_number, self.key.clone(), self.offset, self.size)
    }
}

impl SegmentOps for IntSegment {
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
        1
    }

    fn contains(&self, offset: u16) -> bool {
        self.offset == offset
    }

    fn first(&mut self) -> Option<u16> {
        self.positioned = true;
        Some(self.offset)
    }

    fn last(&mut self) -> Option<u16> {
        self.first()
    }

    fn next(&mut self) -> Option<u16> {
        if self.positioned { None } else { self.first() }
    }

    fn prev(&mut self) -> Option<u16> {
        self.next()
    }

    fn current(&self) -> Option<u16> {
        self.positioned.then_some(self.offset)
    }

    fn setat(&mut self, offset: u16) -> Option<u16> {
        if offset == self.offset {
            self.first()
        } else {
            None
        }
    }

    fn reset(&mut self) {
        self.positioned = false;
    }

    fn rank(&self, offset: u16) -> usize {
        usize::from(self.offset < offset)
    }

    fn select(&self, position: usize) -> Option<u16> {
        (position == 0).then_some(self.offset)
    }

    fn offsets(&self) -> Box<dyn Iterator<Item = u16> + '_> {
        Box::new(std::iter::once(self.offset))
    }

    fn to_bytes(&self) -> Vec<u8> {
        self.offset.to_be_bytes().to_vec()
    }

    fn promote(&self) -> BitarraySegment {
        let mut bits = BitarraySegment::empty(self.segment_number, self.key.clone(), self.size);
        bits.set(self.offset);
        bits
    }
}
