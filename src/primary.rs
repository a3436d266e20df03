//! Primary file: record store and per-segment existence bitmaps.
//!
//! Existence bitmaps live in a page store under `segment_number + 1`. In
//! normal mode every put or delete rewrites the segment's bitmap at once.
//! In deferred mode bits accumulate in an in-memory cache, hydrated from
//! the stored bitmap the first time a segment is touched, and are written
//! back by [`Primary::write_existence_bit_map`] at each update point.

use std::collections::BTreeMap;

use ahash::AHashMap;
use bit_vec::BitVec;
use log::debug;

use crate::config::SegmentSize;
use crate::error::{Result, SegbaseError};
use crate::page::{MemoryPageStore, PageId, PageStore};
use crate::recordset::Recordset;
use crate::segment::{BitarraySegment, Segment};
use crate::storage::Storage;
use crate::storage::structured::{StructReader, StructWriter};

const RECORDS_MAGIC: &[u8; 4] = b"SBRC";

/// Where a deferred load stands relative to segment boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkState {
    /// Segment holding the highest record when the load started, or the
    /// segment whose first chunk has been flushed.
    pub high_segment: Option<u32>,
    /// The next flush starts a new deferred store.
    pub first_chunk: bool,
}

/// The record store of a database.
#[derive(Debug)]
pub struct Primary {
    size: SegmentSize,
    records: BTreeMap<u64, Vec<u8>>,
    existence: MemoryPageStore,
    existence_bit_maps: AHashMap<u32, BitVec>,
    chunk_state: Option<ChunkState>,
}

fn existence_page(segment_number: u32) -> Result<PageId> {
    segment_number
        .checked_add(1)
        .ok_or_else(|| SegbaseError::index(format!("segment {segment_number} has no page id")))
}

impl Primary {
    pub fn new(size: SegmentSize) -> Self {
        Primary {
            size,
            records: BTreeMap::new(),
            existence: MemoryPageStore::new(),
            existence_bit_maps: AHashMap::new(),
            chunk_state: None,
        }
    }

    pub fn segment_size(&self) -> SegmentSize {
        self.size
    }

    pub fn record(&self, record_number: u64) -> Option<&[u8]> {
        self.records.get(&record_number).map(Vec::as_slice)
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    /// Records in record-number order.
    pub fn records(&self) -> impl Iterator<Item = (u64, &[u8])> + '_ {
        self.records.iter().map(|(rn, value)| (*rn, value.as_slice()))
    }

    /// The record with the highest record number.
    pub fn get_high_record(&self) -> Option<(u64, &[u8])> {
        self.records
            .iter()
            .next_back()
            .map(|(rn, value)| (*rn, value.as_slice()))
    }

    /// The record number the next appended record gets.
    pub fn next_record_number(&self) -> Result<u64> {
        let next = match self.get_high_record() {
            Some((high, _)) => high + 1,
            None => 0,
        };
        if next > self.size.max_record_number() {
            return Err(SegbaseError::index("record numbers exhausted"));
        }
        Ok(next)
    }

    /// Store a record, returning the value it replaces.
    pub fn put_record(&mut self, record_number: u64, value: Vec<u8>) -> Option<Vec<u8>> {
        self.records.insert(record_number, value)
    }

    pub fn delete_record(&mut self, record_number: u64) -> Option<Vec<u8>> {
        self.records.remove(&record_number)
    }

    /// Number of segments with a stored existence bitmap.
    pub fn existence_segment_count(&self) -> usize {
        self.existence.len()
    }

    fn stored_bitmap(&self, segment_number: u32) -> Result<Option<BitarraySegment>> {
        let page_id = existence_page(segment_number)?;
        self.existence
            .get(page_id)
            .map(|bytes| BitarraySegment::from_bytes(segment_number, None, bytes, self.size))
            .transpose()
    }

    /// Set the existence bit for `offset` and write the bitmap back.
    pub fn segment_put(&mut self, segment_number: u32, offset: u16) -> Result<()> {
        let mut bitmap = self
            .stored_bitmap(segment_number)?
            .unwrap_or_else(|| BitarraySegment::empty(segment_number, None, self.size));
        bitmap.set(offset);
        self.existence
            .put(existence_page(segment_number)?, Segment::from(bitmap).to_bytes())
    }

    /// Clear the existence bit for `offset` and write the bitmap back.
    ///
    /// A bitmap left with no bits set is dropped.
    pub fn segment_delete(&mut self, segment_number: u32, offset: u16) -> Result<()> {
        let mut bitmap = self.stored_bitmap(segment_number)?.ok_or_else(|| {
            SegbaseError::index(format!(
                "existence bit map for segment {segment_number} does not exist"
            ))
        })?;
        bitmap.clear(offset);
        let page_id = existence_page(segment_number)?;
        let segment = Segment::from(bitmap);
        if segment.is_empty() {
            self.existence.delete(page_id)
        } else {
            self.existence.put(page_id, segment.to_bytes())
        }
    }

    /// Whether the stored existence bitmap has the bit for a record.
    pub fn exists(&self, record_number: u64) -> bool {
        let (segment_number, offset) = self.size.split(record_number);
        match self.stored_bitmap(segment_number) {
            Ok(Some(bitmap)) => bitmap.bits().get(usize::from(offset)).unwrap_or(false),
            _ => false,
        }
    }

    /// Add every record with an existence bit to `recordset`.
    pub fn populate_recordset_all(&self, recordset: &mut Recordset) -> Result<()> {
        for (page_id, bytes) in self.existence.iter() {
            let segment = Segment::from(BitarraySegment::from_bytes(
                page_id - 1,
                None,
                bytes,
                self.size,
            )?);
            if !segment.is_empty() {
                recordset.insert_segment(segment)?;
            }
        }
        Ok(())
    }

    /// Current deferred-update chunk state, if deferred updates are on.
    pub fn chunk_state(&self) -> Option<ChunkState> {
        self.chunk_state
    }

    /// Start deferred updates, deriving the chunk state from the highest
    /// existing record.
    pub fn set_defer_update(&mut self, deferred_update_points: &[u16]) {
        let low_point = deferred_update_points.iter().min().copied().unwrap_or(u16::MAX);
        let state = match self.get_high_record() {
            Some((high, _)) => {
                let (segment_number, offset) = self.size.split(high);
                ChunkState {
                    high_segment: Some(segment_number),
                    first_chunk: offset < low_point,
                }
            }
            None => ChunkState {
                high_segment: None,
                first_chunk: true,
            },
        };
        debug!("primary deferred updates on: {state:?}");
        self.chunk_state = Some(state);
    }

    /// Record that a deferred update point was reached.
    ///
    /// Reaching the last point of a segment makes the next flush start a
    /// new deferred store; reaching the first point marks the segment as
    /// the one later chunks merge into.
    pub fn note_update_point(&mut self, segment_number: u32, offset: u16, points: &[u16]) {
        let Some(state) = self.chunk_state.as_mut() else {
            return;
        };
        if Some(&offset) == points.iter().max() {
            state.first_chunk = true;
        } else if Some(&offset) == points.iter().min() {
            state.first_chunk = false;
            state.high_segment = Some(segment_number);
        }
    }

    /// Stop deferred updates. Returns the number of cached bitmaps that were
    /// never written.
    pub fn unset_defer_update(&mut self) -> usize {
        self.chunk_state = None;
        let unwritten = self.existence_bit_maps.len();
        self.existence_bit_maps.clear();
        unwritten
    }

    /// Set an existence bit in the deferred cache.
    pub fn defer_put(&mut self, segment_number: u32, offset: u16) -> Result<()> {
        if !self.existence_bit_maps.contains_key(&segment_number) {
            let bits = match self.stored_bitmap(segment_number)? {
                Some(bitmap) => bitmap.bits().clone(),
                None => BitVec::from_elem(self.size.segment_width() as usize, false),
            };
            self.existence_bit_maps.insert(segment_number, bits);
        }
        if let Some(bits) = self.existence_bit_maps.get_mut(&segment_number) {
            bits.set(usize::from(offset), true);
        }
        Ok(())
    }

    /// Number of segments with cached, unwritten existence bits.
    pub fn pending_bit_maps(&self) -> usize {
        self.existence_bit_maps.len()
    }

    /// Write the cached existence bitmap for a segment and evict it.
    pub fn write_existence_bit_map(&mut self, segment_number: u32) -> Result<()> {
        if let Some(bits) = self.existence_bit_maps.remove(&segment_number) {
            self.existence
                .put(existence_page(segment_number)?, bits.to_bytes())?;
        }
        Ok(())
    }

    /// Persist records and existence bitmaps.
    pub fn save(&self, storage: &dyn Storage, records_name: &str, existence_name: &str) -> Result<()> {
        let mut writer = StructWriter::new(storage.create_output(records_name)?, RECORDS_MAGIC)?;
        writer.write_u64(self.records.len() as u64)?;
        for (record_number, value) in &self.records {
            writer.write_u64(*record_number)?;
            writer.write_bytes(value)?;
        }
        writer.close()?;
        self.existence.save(storage, existence_name)?;
        debug!(
            "saved {} records and {} existence bitmaps",
            self.records.len(),
            self.existence.len()
        );
        Ok(())
    }

    /// Load a primary saved with [`Primary::save`].
    pub fn load(
        storage: &dyn Storage,
        records_name: &str,
        existence_name: &str,
        size: SegmentSize,
    ) -> Result<Self> {
        let mut reader = StructReader::new(storage.open_input(records_name)?, RECORDS_MAGIC)?;
        let count = reader.read_u64()?;
        let mut records = BTreeMap::new();
        for _ in 0..count {
            let record_number = reader.read_u64()?;
            records.insert(record_number, reader.read_bytes()?);
        }
        reader.verify_checksum()?;
        reader.close()?;
        Ok(Primary {
            records,
            existence: MemoryPageStore::load(storage, existence_name)?,
            ..Primary::new(size)
        })
    }
}
