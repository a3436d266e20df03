//! Deferred index updates for bulk loads.
//!
//! Hits for the segment being loaded collect in per-key [`Accumulator`]s.
//! At each update point [`Secondary::sort_and_write`] turns them into
//! posting references in the current deferred store. Every segment gets its
//! own deferred store, started on its first chunk, and finished stores are
//! written out as sorted runs. [`Secondary::merge`] then k-way merges the
//! main index with all runs into a new main index.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, VecDeque};
use std::mem;

use log::{debug, info};

use crate::error::{Result, SegbaseError};
use crate::index::{IndexTable, RunReader, RunRecord, RunWriter};
use crate::page::PageArena;
use crate::primary::ChunkState;
use crate::secondary::{Accumulator, Secondary};
use crate::storage::Storage;

/// What one [`Secondary::sort_and_write`] call did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SortAndWriteStats {
    pub keys: usize,
    pub merged: usize,
    pub pages_reused: u64,
    pub pages_appended: u64,
}

/// What one [`Secondary::merge`] call did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub sources: usize,
    pub buffer_size: usize,
    pub records_written: u64,
}

impl Secondary {
    /// Stage a hit for `key` at `offset` of the segment being loaded.
    pub fn defer_put(&mut self, key: &[u8], segment_number: u32, offset: u16) -> Result<()> {
        match self.values_segment {
            Some(pending) if pending != segment_number => {
                return Err(SegbaseError::invalid_operation(format!(
                    "index {}: hit for segment {segment_number} while segment {pending} is unflushed",
                    self.name
                )));
            }
            Some(_) => {}
            None => self.values_segment = Some(segment_number),
        }
        let size = self.size;
        match self.values.get_mut(key) {
            Some(accumulator) => {
                accumulator.add(offset, size);
            }
            None => {
                self.values.insert(key.to_vec(), Accumulator::new(offset));
            }
        }
        Ok(())
    }

    /// Number of keys with staged hits.
    pub fn pending_keys(&self) -> usize {
        self.values.len()
    }

    /// The staged value for `key`, if any.
    pub fn accumulator(&self, key: &[u8]) -> Option<&Accumulator> {
        self.values.get(key)
    }

    /// Names of the runs waiting to be merged.
    pub fn deferred_runs(&self) -> &[String] {
        &self.deferred_runs
    }

    /// The deferred store receiving the current segment's postings.
    pub fn deferred_root(&self) -> Option<&IndexTable> {
        self.deferred_root.as_ref()
    }

    /// Finish the current deferred store and start an empty one.
    pub fn new_deferred_root(&mut self, storage: &dyn Storage) -> Result<()> {
        self.close_deferred_root(storage)?;
        self.deferred_root = Some(IndexTable::new());
        debug!(
            "index {}: new deferred store, {} runs pending",
            self.name,
            self.deferred_runs.len()
        );
        Ok(())
    }

    fn close_deferred_root(&mut self, storage: &dyn Storage) -> Result<()> {
        let Some(root) = self.deferred_root.take() else {
            return Ok(());
        };
        if root.is_empty() {
            return Ok(());
        }
        let name = format!("{}.{}.run", self.name, self.run_sequence);
        self.run_sequence += 1;
        let records = root.save(storage, &name)?;
        debug!("index {}: wrote run {name} with {records} records", self.name);
        self.deferred_runs.push(name);
        Ok(())
    }

    /// Write the staged hits for `segment_number` as posting references.
    ///
    /// A key that already has a posting for this segment, either from an
    /// earlier chunk in the current deferred store or in the main index when
    /// this is the high segment, is merged with it and the page rewritten.
    /// Other keys get fresh or reused pages.
    pub fn sort_and_write(
        &mut self,
        arena: &mut PageArena,
        storage: &dyn Storage,
        segment_number: u32,
        chunk: ChunkState,
    ) -> Result<SortAndWriteStats> {
        if let Some(pending) = self.values_segment {
            if pending != segment_number {
                return Err(SegbaseError::invalid_operation(format!(
                    "index {}: flushing segment {segment_number} with hits staged for {pending}",
                    self.name
                )));
            }
        }
        if chunk.first_chunk {
            self.new_deferred_root(storage)?;
        }
        let before = arena.stats();
        let values = mem::take(&mut self.values);
        self.values_segment = None;
        let mut stats = SortAndWriteStats {
            keys: values.len(),
            ..SortAndWriteStats::default()
        };

        let size = self.size;
        let root = self.deferred_root.get_or_insert_with(IndexTable::new);
        for (key, accumulator) in values {
            let segment = accumulator.into_segment(segment_number, None, size);
            let existing = match root.remove(&key, segment_number) {
                Some(reference) => Some(reference),
                None if chunk.high_segment == Some(segment_number) => {
                    self.table.remove(&key, segment_number)
                }
                None => None,
            };
            let reference = match existing {
                Some(old) => {
                    let current = arena.read_segment(&old, None, size)?;
                    let merged = segment.or(&current)?.normalize(true);
                    stats.merged += 1;
                    arena.replace(&old, &merged)?
                }
                None => arena.store_segment(&segment)?,
            };
            root.insert(&key, reference);
        }

        let after = arena.stats();
        stats.pages_reused = after.pages_reused - before.pages_reused;
        stats.pages_appended = after.pages_appended - before.pages_appended;
        debug!(
            "index {}: sort_and_write segment {segment_number}: {} keys, {} merged, {} pages reused, {} appended",
            self.name, stats.keys, stats.merged, stats.pages_reused, stats.pages_appended
        );
        Ok(stats)
    }

    /// Merge the main index and every deferred run into a new main index.
    ///
    /// The main index is saved as `<name>.idx.old` and read back as the first
    /// source. Each source is read through a buffer of
    /// `segment_sort_scale / sources` records; the smallest buffered record
    /// is written next, and a source is deleted as soon as it is exhausted.
    pub fn merge(&mut self, storage: &dyn Storage) -> Result<MergeStats> {
        self.close_deferred_root(storage)?;
        if self.deferred_runs.is_empty() {
            return Ok(MergeStats::default());
        }

        let index_name = self.index_file_name();
        let old_name = format!("{index_name}.old");
        self.table.save(storage, &old_name)?;
        let mut names = vec![old_name];
        names.append(&mut self.deferred_runs);

        let buffer_size = (self.size.segment_sort_scale as usize / names.len().max(1)).max(1);
        info!(
            "index {}: merging {} sources, buffer size {buffer_size}",
            self.name,
            names.len()
        );

        let mut sources = Vec::with_capacity(names.len());
        for name in &names {
            sources.push(MergeSource::open(storage, name, buffer_size)?);
        }

        let mut heap = BinaryHeap::new();
        for (index, source) in sources.iter_mut().enumerate() {
            if let Some((key, value)) = source.pop(storage)? {
                heap.push(Reverse((key, value, index)));
            }
        }

        let mut writer = RunWriter::create(storage, &index_name)?;
        while let Some(Reverse((key, value, index))) = heap.pop() {
            writer.append(&key, &value)?;
            if let Some((key, value)) = sources[index].pop(storage)? {
                heap.push(Reverse((key, value, index)));
            }
        }
        let records_written = writer.finish()?;

        self.table = IndexTable::load(storage, &index_name)?;
        let stats = MergeStats {
            sources: sources.len(),
            buffer_size,
            records_written,
        };
        info!(
            "index {}: merge wrote {records_written} postings for {} keys",
            self.name,
            self.table.key_count()
        );
        Ok(stats)
    }
}

/// One merge input with its read-ahead buffer.
struct MergeSource {
    reader: RunReader,
    buffer: VecDeque<RunRecord>,
    limit: usize,
    removed: bool,
}

impl MergeSource {
    fn open(storage: &dyn Storage, name: &str, limit: usize) -> Result<Self> {
        let mut source = MergeSource {
            reader: RunReader::open(storage, name)?,
            buffer: VecDeque::with_capacity(limit),
            limit,
            removed: false,
        };
        source.refill(storage)?;
        Ok(source)
    }

    fn refill(&mut self, storage: &dyn Storage) -> Result<()> {
        self.reader.fill(&mut self.buffer, self.limit)?;
        if self.reader.is_exhausted() && !self.removed {
            storage.delete_file(self.reader.name())?;
            self.removed = true;
            debug!("removed merge source {}", self.reader.name());
        }
        Ok(())
    }

    fn pop(&mut self, storage: &dyn Storage) -> Result<Option<RunRecord>> {
        if self.buffer.is_empty() && !self.reader.is_exhausted() {
            self.refill(storage)?;
        }
        Ok(self.buffer.pop_front())
    }
}
