//! Secondary indexes.
//!
//! A [`Secondary`] maps index keys to posting references, one per segment,
//! over a shared [`PageArena`]. Normal updates go straight into the index
//! table through [`Secondary::segment_put`] and [`Secondary::segment_delete`].
//! Bulk loads stage hits in per-key accumulators instead; see the
//! `deferred` module for that pipeline.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::SegmentSize;
use crate::error::Result;
use crate::index::{IndexTable, Postings};
use crate::page::PageArena;
use crate::posting::PostingReference;
use crate::recordset::Recordset;
use crate::segment::{IndexKey, ListSegment, Segment};

pub mod accumulator;
pub mod deferred;

pub use accumulator::Accumulator;
pub use deferred::{MergeStats, SortAndWriteStats};

/// One secondary index.
#[derive(Debug)]
pub struct Secondary {
    name: String,
    size: SegmentSize,
    table: IndexTable,
    values: BTreeMap<Vec<u8>, Accumulator>,
    values_segment: Option<u32>,
    deferred_root: Option<IndexTable>,
    deferred_runs: Vec<String>,
    run_sequence: u32,
}

impl Secondary {
    pub fn new<S: Into<String>>(name: S, size: SegmentSize) -> Self {
        Self::with_table(name, size, IndexTable::new())
    }

    pub fn with_table<S: Into<String>>(name: S, size: SegmentSize, table: IndexTable) -> Self {
        Secondary {
            name: name.into(),
            size,
            table,
            values: BTreeMap::new(),
            values_segment: None,
            deferred_root: None,
            deferred_runs: Vec::new(),
            run_sequence: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table(&self) -> &IndexTable {
        &self.table
    }

    /// Blob name of the persisted index.
    pub fn index_file_name(&self) -> String {
        format!("{}.idx", self.name)
    }

    /// Add one record to the posting for `key` in a segment.
    ///
    /// The posting escalates Int to List to Bitarray as it grows; a Bitarray
    /// is never demoted by a put.
    pub fn segment_put(
        &mut self,
        arena: &mut PageArena,
        key: &[u8],
        segment_number: u32,
        offset: u16,
    ) -> Result<()> {
        let Some(old) = self.table.get(key, segment_number) else {
            self.table.insert(
                key,
                PostingReference::Record {
                    segment_number,
                    offset,
                },
            );
            return Ok(());
        };
        let current = arena.read_segment(&old, None, self.size)?;
        if current.contains(self.size.join(segment_number, offset)) {
            return Ok(());
        }
        let updated = match current {
            Segment::Int(int) => Segment::List(ListSegment::from_offsets(
                segment_number,
                None,
                vec![int.offset(), offset],
                self.size,
            ))
            .normalize(true),
            Segment::List(mut list) => {
                list.insert(offset);
                Segment::List(list).normalize(true)
            }
            Segment::Bitarray(mut bits) => {
                bits.set(offset);
                Segment::Bitarray(bits)
            }
        };
        let reference = arena.replace(&old, &updated)?;
        self.table.insert(key, reference);
        Ok(())
    }

    /// Remove one record from the posting for `key` in a segment.
    ///
    /// A Bitarray drops to a List only at or below the lower conversion
    /// limit, a List becomes Int at one record, and an emptied posting is
    /// removed with its page freed.
    pub fn segment_delete(
        &mut self,
        arena: &mut PageArena,
        key: &[u8],
        segment_number: u32,
        offset: u16,
    ) -> Result<()> {
        let Some(old) = self.table.get(key, segment_number) else {
            return Ok(());
        };
        let current = arena.read_segment(&old, None, self.size)?;
        let updated = match current {
            Segment::Int(int) if int.offset() == offset => None,
            Segment::Int(_) => return Ok(()),
            Segment::List(mut list) => {
                if !list.remove(offset) {
                    return Ok(());
                }
                Some(Segment::List(list))
            }
            Segment::Bitarray(mut bits) => {
                if !bits.clear(offset) {
                    return Ok(());
                }
                Some(Segment::Bitarray(bits))
            }
        };
        match updated.filter(|segment| !segment.is_empty()) {
            Some(segment) => {
                let reference = arena.replace(&old, &segment.normalize(false))?;
                self.table.insert(key, reference);
            }
            None => {
                arena.release(&old)?;
                self.table.remove(key, segment_number);
            }
        }
        Ok(())
    }

    /// Replace the postings for `key` with the records of `recordset`.
    pub fn file_records_under(
        &mut self,
        arena: &mut PageArena,
        recordset: &Recordset,
        key: &[u8],
    ) -> Result<()> {
        self.unfile_records_under(arena, key)?;
        for segment_number in recordset.segment_numbers() {
            let Some(segment) = recordset.segment(*segment_number) else {
                continue;
            };
            if segment.is_empty() {
                continue;
            }
            let segment = segment.clone().with_key(None).normalize(true);
            let reference = arena.store_segment(&segment)?;
            self.table.insert(key, reference);
        }
        Ok(())
    }

    /// Delete the postings for `key`, freeing their pages. Returns the
    /// number of postings removed.
    pub fn unfile_records_under(&mut self, arena: &mut PageArena, key: &[u8]) -> Result<usize> {
        let Some(postings) = self.table.remove_key(key) else {
            return Ok(0);
        };
        for reference in postings.values() {
            arena.release(reference)?;
        }
        Ok(postings.len())
    }

    fn add_postings(
        &self,
        arena: &PageArena,
        recordset: &mut Recordset,
        key: &[u8],
        postings: &Postings,
    ) -> Result<()> {
        let index_key: IndexKey = Arc::from(key);
        for reference in postings.values() {
            let segment = arena.read_segment(reference, Some(index_key.clone()), self.size)?;
            let merged = match recordset.segment(segment.segment_number()) {
                Some(existing) => existing.or(&segment)?,
                None => segment,
            };
            recordset.insert_segment(merged)?;
        }
        Ok(())
    }

    /// Add the records filed under `key` to `recordset`.
    pub fn populate_recordset_key(
        &self,
        arena: &PageArena,
        recordset: &mut Recordset,
        key: &[u8],
    ) -> Result<()> {
        if let Some(postings) = self.table.postings(key) {
            self.add_postings(arena, recordset, key, postings)?;
        }
        Ok(())
    }

    /// Add the records filed under keys in `[low, high]`.
    pub fn populate_recordset_key_range(
        &self,
        arena: &PageArena,
        recordset: &mut Recordset,
        low: Option<&[u8]>,
        high: Option<&[u8]>,
    ) -> Result<()> {
        for (key, postings) in self.table.range(low, high) {
            self.add_postings(arena, recordset, key, postings)?;
        }
        Ok(())
    }

    /// Add the records filed under keys starting with `prefix`.
    pub fn populate_recordset_key_prefix(
        &self,
        arena: &PageArena,
        recordset: &mut Recordset,
        prefix: &[u8],
    ) -> Result<()> {
        for (key, postings) in self.table.prefix(prefix) {
            self.add_postings(arena, recordset, key, postings)?;
        }
        Ok(())
    }

    /// Add every record referenced by the index.
    pub fn populate_recordset_all(&self, arena: &PageArena, recordset: &mut Recordset) -> Result<()> {
        self.populate_recordset_key_range(arena, recordset, None, None)
    }

    /// The lowest record number filed under `key`.
    pub fn first_record_for_key(&self, arena: &PageArena, key: &[u8]) -> Result<Option<u64>> {
        let Some(reference) = self
            .table
            .postings(key)
            .and_then(|postings| postings.values().next())
        else {
            return Ok(None);
        };
        Ok(match reference {
            PostingReference::Record {
                segment_number,
                offset,
            } => Some(self.size.join(*segment_number, *offset)),
            _ => arena
                .read_segment(reference, None, self.size)?
                .record_numbers()
                .next(),
        })
    }

    /// Number of records filed under `key`, from the references alone.
    pub fn count_for_key(&self, key: &[u8]) -> usize {
        self.table
            .postings(key)
            .map_or(0, |postings| postings.values().map(PostingReference::count).sum())
    }
}
