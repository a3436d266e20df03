//! Record sets: ordered collections of segments.
//!
//! A [`Recordset`] maps segment numbers to [`Segment`]s and keeps the
//! populated segment numbers sorted, so it can be traversed in record-number
//! order, ranked and selected into, and combined with other record sets from
//! the same database. It is both the query result type and the in-memory
//! form of an index posting list.
//!
//! Record sets are registered with their database's
//! [`RecordsetRegistry`]. Closing the database closes them; a closed record
//! set holds no segments, yields `None` from navigation and
//! [`RecordsetError::Closed`] from mutation.

use std::sync::{Arc, Weak};

use ahash::AHashMap;

use crate::config::SegmentSize;
use crate::error::{RecordsetError, Result};
use crate::segment::{CursorEntry, Segment};

pub mod cursor;
pub mod registry;

pub use cursor::RecordsetCursor;
pub use registry::{DatabaseId, RecordsetId, RecordsetRegistry};

use registry::RecordsetLink;

type SegmentOp = fn(&Segment, &Segment) -> Result<Segment>;

/// A set of record numbers, segmented.
#[derive(Debug)]
pub struct Recordset {
    id: RecordsetId,
    database: DatabaseId,
    registry: Weak<RecordsetRegistry>,
    link: Arc<RecordsetLink>,
    size: SegmentSize,
    segments: AHashMap<u32, Segment>,
    sorted_segnums: Vec<u32>,
    current_segment: Option<usize>,
}

impl Recordset {
    /// Create an empty record set registered with `registry`.
    pub fn new(registry: &Arc<RecordsetRegistry>, size: SegmentSize) -> Self {
        let (id, link) = registry.register();
        Recordset {
            id,
            database: registry.database(),
            registry: Arc::downgrade(registry),
            link,
            size,
            segments: AHashMap::new(),
            sorted_segnums: Vec::new(),
            current_segment: None,
        }
    }

    /// An empty record set on the same database.
    fn sibling(&self) -> Result<Self> {
        match self.registry.upgrade() {
            Some(registry) => Ok(Recordset::new(&registry, self.size)),
            None => Err(RecordsetError::Closed.into()),
        }
    }

    pub fn id(&self) -> RecordsetId {
        self.id
    }

    pub fn database_id(&self) -> DatabaseId {
        self.database
    }

    pub fn segment_size(&self) -> SegmentSize {
        self.size
    }

    pub fn is_closed(&self) -> bool {
        self.link.is_closed()
    }

    /// Number of cursors currently open on this record set.
    pub fn open_cursor_count(&self) -> usize {
        self.link.cursor_count()
    }

    /// Drop segments if the database closed this record set.
    fn release_if_closed(&mut self) -> bool {
        if self.link.is_closed() {
            if !self.segments.is_empty() {
                self.clear();
            }
            true
        } else {
            false
        }
    }

    fn ensure_open(&mut self) -> Result<()> {
        if self.release_if_closed() {
            Err(RecordsetError::Closed.into())
        } else {
            Ok(())
        }
    }

    /// Number of populated segments.
    pub fn segment_count(&self) -> usize {
        self.segment_numbers().len()
    }

    /// Populated segment numbers, ascending. Empty once closed.
    pub fn segment_numbers(&self) -> &[u32] {
        if self.link.is_closed() {
            &[]
        } else {
            &self.sorted_segnums
        }
    }

    pub fn segment(&self, segment_number: u32) -> Option<&Segment> {
        if self.link.is_closed() {
            return None;
        }
        self.segments.get(&segment_number)
    }

    pub fn contains_segment(&self, segment_number: u32) -> bool {
        self.segment(segment_number).is_some()
    }

    /// Add or replace the segment for its segment number.
    pub fn insert_segment(&mut self, segment: Segment) -> Result<()> {
        self.ensure_open()?;
        let segment_number = segment.segment_number();
        if let Err(index) = self.sorted_segnums.binary_search(&segment_number) {
            self.sorted_segnums.insert(index, segment_number);
            if let Some(current) = self.current_segment.as_mut() {
                if index <= *current {
                    *current += 1;
                }
            }
        }
        self.segments.insert(segment_number, segment);
        Ok(())
    }

    /// Remove and return the segment for `segment_number`.
    pub fn remove_segment(&mut self, segment_number: u32) -> Option<Segment> {
        let segment = self.segments.remove(&segment_number)?;
        if let Ok(index) = self.sorted_segnums.binary_search(&segment_number) {
            self.sorted_segnums.remove(index);
            self.current_segment = match self.current_segment {
                Some(current) if index < current => Some(current - 1),
                Some(current) if index == current => None,
                other => other,
            };
        }
        Some(segment)
    }

    /// Total records across all segments.
    pub fn count_records(&self) -> usize {
        if self.link.is_closed() {
            return 0;
        }
        self.segments.values().map(Segment::count_records).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.count_records() == 0
    }

    /// Whether `record_number` is in the set.
    pub fn contains(&self, record_number: u64) -> bool {
        let (segment_number, _) = self.size.split(record_number);
        self.segment(segment_number)
            .is_some_and(|segment| segment.contains(record_number))
    }

    /// Add `record_number`. A segment created here starts as a Bitarray.
    pub fn place(&mut self, record_number: u64) -> Result<()> {
        self.ensure_open()?;
        if record_number > self.size.max_record_number() {
            return Err(RecordsetError::RecordOutOfRange(record_number).into());
        }
        let (segment_number, offset) = self.size.split(record_number);
        if !self.segments.contains_key(&segment_number) {
            self.insert_segment(Segment::empty(segment_number, None, self.size))?;
        }
        if let Some(segment) = self.segments.get_mut(&segment_number) {
            segment.bitarray_mut().set(offset);
        }
        Ok(())
    }

    /// Remove `record_number`, promoting its segment to a Bitarray.
    ///
    /// The segment is not demoted; it is dropped once it holds no records.
    pub fn remove(&mut self, record_number: u64) -> Result<()> {
        self.ensure_open()?;
        let (segment_number, offset) = self.size.split(record_number);
        let emptied = match self.segments.get_mut(&segment_number) {
            Some(segment) => {
                let bits = segment.bitarray_mut();
                bits.clear(offset);
                segment.is_empty()
            }
            None => false,
        };
        if emptied {
            self.remove_segment(segment_number);
        }
        Ok(())
    }

    /// Ascending record numbers.
    pub fn record_numbers(&self) -> impl Iterator<Item = u64> + '_ {
        self.segment_numbers()
            .iter()
            .filter_map(|segment_number| self.segments.get(segment_number))
            .flat_map(Segment::record_numbers)
    }

    fn segment_at_mut(&mut self, index: usize) -> Option<&mut Segment> {
        let segment_number = *self.sorted_segnums.get(index)?;
        self.segments.get_mut(&segment_number)
    }

    fn scan_forward(&mut self, start: usize) -> Option<CursorEntry> {
        for index in start..self.sorted_segnums.len() {
            if let Some(entry) = self.segment_at_mut(index).and_then(Segment::first) {
                self.current_segment = Some(index);
                return Some(entry);
            }
        }
        None
    }

    fn scan_backward(&mut self, end: usize) -> Option<CursorEntry> {
        for index in (0..end).rev() {
            if let Some(entry) = self.segment_at_mut(index).and_then(Segment::last) {
                self.current_segment = Some(index);
                return Some(entry);
            }
        }
        None
    }

    pub fn first(&mut self) -> Option<CursorEntry> {
        if self.release_if_closed() {
            return None;
        }
        self.scan_forward(0)
    }

    pub fn last(&mut self) -> Option<CursorEntry> {
        if self.release_if_closed() {
            return None;
        }
        self.scan_backward(self.sorted_segnums.len())
    }

    /// The record after the current one, crossing into the next populated
    /// segment at a boundary. `None` at the end.
    pub fn next(&mut self) -> Option<CursorEntry> {
        if self.release_if_closed() {
            return None;
        }
        match self.current_segment {
            None => self.scan_forward(0),
            Some(index) => match self.segment_at_mut(index).and_then(Segment::next) {
                Some(entry) => Some(entry),
                None => self.scan_forward(index + 1),
            },
        }
    }

    /// The record before the current one. `None` at the start.
    pub fn prev(&mut self) -> Option<CursorEntry> {
        if self.release_if_closed() {
            return None;
        }
        match self.current_segment {
            None => self.scan_backward(self.sorted_segnums.len()),
            Some(index) => match self.segment_at_mut(index).and_then(Segment::prev) {
                Some(entry) => Some(entry),
                None => self.scan_backward(index),
            },
        }
    }

    pub fn current(&self) -> Option<CursorEntry> {
        if self.link.is_closed() {
            return None;
        }
        let segment_number = self.sorted_segnums.get(self.current_segment?)?;
        self.segments.get(segment_number)?.current()
    }

    /// Position on `record_number` if it is present.
    pub fn setat(&mut self, record_number: u64) -> Option<CursorEntry> {
        if self.release_if_closed() {
            return None;
        }
        let (segment_number, _) = self.size.split(record_number);
        let index = self.sorted_segnums.binary_search(&segment_number).ok()?;
        let entry = self.segment_at_mut(index)?.setat(record_number)?;
        self.current_segment = Some(index);
        Some(entry)
    }

    /// Position on the lowest record at or above `record_number`.
    pub fn nearest(&mut self, record_number: u64) -> Option<CursorEntry> {
        let position = self.get_position_of_record_number(record_number);
        let found = self.get_record_number_at_position(i64::try_from(position).ok()?)?;
        self.setat(found)
    }

    /// Forget the cursor position.
    pub fn reset_position(&mut self) {
        self.current_segment = None;
        for segment in self.segments.values_mut() {
            segment.reset();
        }
    }

    /// Number of records in the set strictly below `record_number`.
    pub fn get_position_of_record_number(&self, record_number: u64) -> usize {
        let (segment_number, _) = self.size.split(record_number);
        let segnums = self.segment_numbers();
        let before = segnums.partition_point(|&n| n < segment_number);
        let preceding: usize = segnums[..before]
            .iter()
            .filter_map(|n| self.segments.get(n))
            .map(Segment::count_records)
            .sum();
        let within = self
            .segment(segment_number)
            .map_or(0, |segment| segment.get_position_of_record_number(record_number));
        preceding + within
    }

    /// The record at `position`: 0-based from the lowest record when
    /// non-negative, counted back from the highest when negative (`-1` is
    /// the highest).
    pub fn get_record_number_at_position(&self, position: i64) -> Option<u64> {
        let segments = self
            .segment_numbers()
            .iter()
            .filter_map(|n| self.segments.get(n));
        if position >= 0 {
            let mut remaining = usize::try_from(position).ok()?;
            for segment in segments {
                let count = segment.count_records();
                if remaining < count {
                    return segment.get_record_number_at_position(remaining, true);
                }
                remaining -= count;
            }
        } else {
            let mut remaining = usize::try_from(-(position + 1)).ok()?;
            for segment in segments.rev() {
                let count = segment.count_records();
                if remaining < count {
                    return segment.get_record_number_at_position(remaining, false);
                }
                remaining -= count;
            }
        }
        None
    }

    fn check_combinable(&self, other: &Recordset, operation: &'static str) -> Result<()> {
        if self.is_closed() || other.is_closed() {
            return Err(RecordsetError::Closed.into());
        }
        if self.database != other.database {
            return Err(RecordsetError::DatabaseMismatch { operation }.into());
        }
        Ok(())
    }

    /// Per-segment combination. Lone segments are cloned when `keep_lone`
    /// and dropped otherwise; empty results are discarded.
    fn combine_segments(
        &self,
        other: &Recordset,
        operation: &'static str,
        keep_lone: bool,
        op: SegmentOp,
    ) -> Result<AHashMap<u32, Segment>> {
        self.check_combinable(other, operation)?;
        let mut combined = AHashMap::with_capacity(self.segments.len() + other.segments.len());
        for (&segment_number, segment) in &self.segments {
            match other.segments.get(&segment_number) {
                Some(theirs) => {
                    combined.insert(segment_number, op(segment, theirs)?);
                }
                None if keep_lone => {
                    combined.insert(segment_number, segment.clone());
                }
                None => {}
            }
        }
        if keep_lone {
            for (&segment_number, segment) in &other.segments {
                if !self.segments.contains_key(&segment_number) {
                    combined.insert(segment_number, segment.clone());
                }
            }
        }
        combined.retain(|_, segment| !segment.is_empty());
        Ok(combined)
    }

    fn install(&mut self, segments: AHashMap<u32, Segment>) {
        self.sorted_segnums = segments.keys().copied().collect();
        self.sorted_segnums.sort_unstable();
        self.segments = segments;
        self.current_segment = None;
    }

    fn combined(
        &self,
        other: &Recordset,
        operation: &'static str,
        keep_lone: bool,
        op: SegmentOp,
    ) -> Result<Recordset> {
        let segments = self.combine_segments(other, operation, keep_lone, op)?;
        let mut result = self.sibling()?;
        result.install(segments);
        Ok(result)
    }

    /// Records in either set.
    pub fn or(&self, other: &Recordset) -> Result<Recordset> {
        self.combined(other, "or", true, Segment::or)
    }

    /// Records in both sets.
    pub fn and(&self, other: &Recordset) -> Result<Recordset> {
        self.combined(other, "and", false, Segment::and)
    }

    /// Records in exactly one of the sets.
    pub fn xor(&self, other: &Recordset) -> Result<Recordset> {
        self.combined(other, "xor", true, Segment::xor)
    }

    /// In-place [`Recordset::or`]. Resets the cursor position.
    pub fn or_assign(&mut self, other: &Recordset) -> Result<()> {
        self.ensure_open()?;
        let segments = self.combine_segments(other, "or", true, Segment::or)?;
        self.install(segments);
        Ok(())
    }

    /// In-place [`Recordset::and`]. Resets the cursor position.
    pub fn and_assign(&mut self, other: &Recordset) -> Result<()> {
        self.ensure_open()?;
        let segments = self.combine_segments(other, "and", false, Segment::and)?;
        self.install(segments);
        Ok(())
    }

    /// In-place [`Recordset::xor`]. Resets the cursor position.
    pub fn xor_assign(&mut self, other: &Recordset) -> Result<()> {
        self.ensure_open()?;
        let segments = self.combine_segments(other, "xor", true, Segment::xor)?;
        self.install(segments);
        Ok(())
    }

    /// Re-encode every segment in its cheapest form.
    pub fn normalize(&mut self, use_upper_limit: bool) {
        for segment in self.segments.values_mut() {
            let taken = std::mem::replace(segment, Segment::empty(0, None, self.size));
            *segment = taken.normalize(use_upper_limit);
        }
    }

    /// Remove every record.
    pub fn clear(&mut self) {
        self.segments.clear();
        self.sorted_segnums.clear();
        self.current_segment = None;
    }

    /// Close the record set and leave the registry.
    pub fn close(&mut self) {
        self.link.close();
        if let Some(registry) = self.registry.upgrade() {
            registry.deregister(self.id);
        }
        self.clear();
    }

    /// A cursor over this record set.
    pub fn cursor(&mut self) -> RecordsetCursor<'_> {
        RecordsetCursor::new(self)
    }

    pub(crate) fn link(&self) -> &RecordsetLink {
        &self.link
    }
}

impl Clone for Recordset {
    /// Deep copy with a reset cursor, registered as a new record set.
    fn clone(&self) -> Self {
        let (id, link) = match self.registry.upgrade() {
            Some(registry) if !self.is_closed() => registry.register(),
            _ => (self.id, Arc::new(RecordsetLink::closed())),
        };
        let segments = if link.is_closed() {
            AHashMap::new()
        } else {
            self.segments.clone()
        };
        let mut sorted_segnums = segments.keys().copied().collect::<Vec<_>>();
        sorted_segnums.sort_unstable();
        Recordset {
            id,
            database: self.database,
            registry: self.registry.clone(),
            link,
            size: self.size,
            segments,
            sorted_segnums,
            current_segment: None,
        }
    }
}

impl Drop for Recordset {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.deregister(self.id);
        }
    }
}
