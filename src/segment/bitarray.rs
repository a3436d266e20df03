//! Fixed-width bitmap segment.

use bit_vec::BitVec;

use crate::config::SegmentSize;
use crate::error::{Result, SegbaseError};
use crate::segment::{IndexKey, SegmentOps};

const BLOCK_BITS: usize = 32;

/// A segment holding a bitmap of `segment_width` bits.
///
/// Serialized most significant bit first, so bit 0 is the high bit of the
/// first byte.
#[derive(Debug)]
pub struct BitarraySegment {
    segment_number: u32,
    key: Option<IndexKey>,
    size: SegmentSize,
    bits: BitVec,
    position: Option<u16>,
}

impl BitarraySegment {
    /// Create a segment with no bits set.
    pub fn empty(segment_number: u32, key: Option<IndexKey>, size: SegmentSize) -> Self {
        BitarraySegment {
            segment_number,
            key,
            size,
            bits: BitVec::from_elem(size.segment_width() as usize, false),
            position: None,
        }
    }

    /// Decode the packed bitmap form.
    pub fn from_bytes(
        segment_number: u32,
        key: Option<IndexKey>,
        bytes: &[u8],
        size: SegmentSize,
    ) -> Result<Self> {
        if bytes.len() != size.empty_bitarray_bytes() {
            return Err(SegbaseError::corrupt(format!(
                "bitmap segment {segment_number} has {} bytes, expected {}",
                bytes.len(),
                size.empty_bitarray_bytes()
            )));
        }
        Ok(BitarraySegment {
            bits: BitVec::from_bytes(bytes),
            ..Self::empty(segment_number, key, size)
        })
    }

    /// Set the bit for `offset`. Returns false if it was already set.
    pub fn set(&mut self, offset: u16) -> bool {
        let index = usize::from(offset);
        let was_set = self.bits.get(index).unwrap_or(true);
        if !was_set {
            self.bits.set(index, true);
        }
        !was_set
    }

    /// Clear the bit for `offset`. Returns false if it was not set.
    pub fn clear(&mut self, offset: u16) -> bool {
        let index = usize::from(offset);
        let was_set = self.bits.get(index).unwrap_or(false);
        if was_set {
            self.bits.set(index, false);
        }
        was_set
    }

    /// The underlying bitmap.
    pub fn bits(&self) -> &BitVec {
        &self.bits
    }

    pub(crate) fn bits_mut(&mut self) -> &mut BitVec {
        &mut self.bits
    }

    pub(crate) fn set_key(&mut self, key: Option<IndexKey>) {
        self.key = key;
    }

    /// First set bit at or after `start`.
    fn next_set(&self, start: usize) -> Option<usize> {
        let blocks = self.bits.storage();
        let mut index = start / BLOCK_BITS;
        let mut word = *blocks.get(index)? & (u32::MAX << (start % BLOCK_BITS));
        loop {
            if word != 0 {
                let bit = index * BLOCK_BITS + word.trailing_zeros() as usize;
                return (bit < self.bits.len()).then_some(bit);
            }
            index += 1;
            word = *blocks.get(index)?;
        }
    }

    /// Last set bit at or before `end`.
    fn prev_set(&self, end: usize) -> Option<usize> {
        let blocks = self.bits.storage();
        let end = end.min(self.bits.len().checked_sub(1)?);
        let mut index = end / BLOCK_BITS;
        let mut word = *blocks.get(index)? & (u32::MAX >> (BLOCK_BITS - 1 - end % BLOCK_BITS));
        loop {
            if word != 0 {
                return Some(index * BLOCK_BITS + (BLOCK_BITS - 1) - word.leading_zeros() as usize);
            }
            index = index.checked_sub(1)?;
            word = blocks[index];
        }
    }

    fn move_to(&mut self, bit: Option<usize>) -> Option<u16> {
        let offset = bit? as u16;
        self.position = Some(offset);
        Some(offset)
    }
}

impl Clone for BitarraySegment {
    fn clone(&self) -> Self {
        BitarraySegment {
            bits: self.bits.clone(),
            ..Self::empty(self.segment_number, self.key.clone(), self.size)
        }
    }
}

impl SegmentOps for BitarraySegment {
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
        self.bits
            .storage()
            .iter()
            .map(|block| block.count_ones() as usize)
            .sum()
    }

    fn contains(&self, offset: u16) -> bool {
        self.bits.get(usize::from(offset)).unwrap_or(false)
    }

    fn first(&mut self) -> Option<u16> {
        let bit = self.next_set(0);
        self.move_to(bit)
    }

    fn last(&mut self) -> Option<u16> {
        let bit = self.prev_set(usize::MAX);
        self.move_to(bit)
    }

    fn next(&mut self) -> Option<u16> {
        match self.position {
            None => self.first(),
            Some(position) => {
                let bit = self.next_set(usize::from(position) + 1);
                self.move_to(bit)
            }
        }
    }

    fn prev(&mut self) -> Option<u16> {
        match self.position {
            None => self.last(),
            Some(0) => None,
            Some(position) => {
                let bit = self.prev_set(usize::from(position) - 1);
                self.move_to(bit)
            }
        }
    }

    fn current(&self) -> Option<u16> {
        self.position.filter(|&offset| self.contains(offset))
    }

    fn setat(&mut self, offset: u16) -> Option<u16> {
        if self.contains(offset) {
            self.move_to(Some(usize::from(offset)))
        } else {
            None
        }
    }

    fn reset(&mut self) {
        self.position = None;
    }

    fn rank(&self, offset: u16) -> usize {
        let offset = usize::from(offset).min(self.bits.len());
        let blocks = self.bits.storage();
        let full = offset / BLOCK_BITS;
        let mut rank: usize = blocks[..full]
            .iter()
            .map(|block| block.count_ones() as usize)
            .sum();
        let partial = offset % BLOCK_BITS;
        if partial > 0 {
            if let Some(block) = blocks.get(full) {
                rank += (block & ((1u32 << partial) - 1)).count_ones() as usize;
            }
        }
        rank
    }

    fn select(&self, position: usize) -> Option<u16> {
        let mut remaining = position;
        for (index, &block) in self.bits.storage().iter().enumerate() {
            let ones = block.count_ones() as usize;
            if remaining < ones {
                let mut word = block;
                for _ in 0..remaining {
                    word &= word - 1;
                }
                return Some((index * BLOCK_BITS + word.trailing_zeros() as usize) as u16);
            }
            remaining -= ones;
        }
        None
    }

    fn offsets(&self) -> Box<dyn Iterator<Item = u16> + '_> {
        let mut next = self.next_set(0);
        Box::new(std::iter::from_fn(move || {
            let bit = next?;
            next = self.next_set(bit + 1);
            Some(bit as u16)
        }))
    }

    fn to_bytes(&self) -> Vec<u8> {
        self.bits.to_bytes()
    }

    fn promote(&self) -> BitarraySegment {
        self.clone()
    }
}
