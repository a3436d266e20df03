//! Secondary index table: key → segment number → posting reference.

use std::collections::BTreeMap;
use std::ops::Bound;

use crate::error::{Result, SegbaseError};
use crate::posting::PostingReference;
use crate::storage::Storage;

pub mod run;

pub use run::{RunReader, RunRecord, RunWriter};

/// Postings for one key, ordered by segment number.
pub type Postings = BTreeMap<u32, PostingReference>;

/// A sorted index of posting references.
///
/// Iteration order is `(key, segment number)`, which is also the order of
/// `(key, encoded reference)` because encoded references start with the
/// big-endian segment number.
#[derive(Debug, Clone, Default)]
pub struct IndexTable {
    entries: BTreeMap<Vec<u8>, Postings>,
    len: usize,
}

impl IndexTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `(key, segment)` entries.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn key_count(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, key: &[u8], segment_number: u32) -> Option<PostingReference> {
        self.entries.get(key)?.get(&segment_number).copied()
    }

    pub fn postings(&self, key: &[u8]) -> Option<&Postings> {
        self.entries.get(key)
    }

    /// The highest segment with a posting for `key`.
    pub fn high_segment(&self, key: &[u8]) -> Option<u32> {
        self.entries.get(key)?.keys().next_back().copied()
    }

    /// Insert a reference, returning the one it replaces.
    pub fn insert(&mut self, key: &[u8], reference: PostingReference) -> Option<PostingReference> {
        let replaced = self
            .entries
            .entry(key.to_vec())
            .or_default()
            .insert(reference.segment_number(), reference);
        if replaced.is_none() {
            self.len += 1;
        }
        replaced
    }

    pub fn remove(&mut self, key: &[u8], segment_number: u32) -> Option<PostingReference> {
        let postings = self.entries.get_mut(key)?;
        let removed = postings.remove(&segment_number)?;
        if postings.is_empty() {
            self.entries.remove(key);
        }
        self.len -= 1;
        Some(removed)
    }

    /// Remove every posting for `key`.
    pub fn remove_key(&mut self, key: &[u8]) -> Option<Postings> {
        let removed = self.entries.remove(key)?;
        self.len -= removed.len();
        Some(removed)
    }

    pub fn keys(&self) -> impl Iterator<Item = &[u8]> + '_ {
        self.entries.keys().map(Vec::as_slice)
    }

    /// All entries in `(key, segment)` order.
    pub fn iter(&self) -> impl Iterator<Item = (&[u8], &PostingReference)> + '_ {
        self.entries.iter().flat_map(|(key, postings)| {
            postings.values().map(move |reference| (key.as_slice(), reference))
        })
    }

    /// Keys in `[low, high]`; either end may be open.
    pub fn range<'a>(
        &'a self,
        low: Option<&[u8]>,
        high: Option<&[u8]>,
    ) -> impl Iterator<Item = (&'a [u8], &'a Postings)> + 'a {
        let lower = low.map_or(Bound::Unbounded, |low| Bound::Included(low.to_vec()));
        let upper = high.map_or(Bound::Unbounded, |high| Bound::Included(high.to_vec()));
        let empty = matches!((&lower, &upper), (Bound::Included(l), Bound::Included(h)) if l > h);
        let entries = (!empty).then(|| self.entries.range((lower, upper)));
        entries
            .into_iter()
            .flatten()
            .map(|(key, postings)| (key.as_slice(), postings))
    }

    /// Keys starting with `prefix`.
    pub fn prefix<'a>(
        &'a self,
        prefix: &'a [u8],
    ) -> impl Iterator<Item = (&'a [u8], &'a Postings)> + 'a {
        self.entries
            .range(prefix.to_vec()..)
            .take_while(move |(key, _)| key.starts_with(prefix))
            .map(|(key, postings)| (key.as_slice(), postings))
    }

    /// Write the table as a sorted run.
    pub fn save(&self, storage: &dyn Storage, name: &str) -> Result<u64> {
        let mut writer = RunWriter::create(storage, name)?;
        for (key, reference) in self.iter() {
            writer.append(key, &reference.encode())?;
        }
        writer.finish()
    }

    /// Rebuild a table from a sorted run.
    pub fn load(storage: &dyn Storage, name: &str) -> Result<Self> {
        let mut reader = RunReader::open(storage, name)?;
        let mut table = IndexTable::new();
        while let Some((key, value)) = reader.next_record()? {
            let reference = PostingReference::decode(&value)?;
            if table.insert(&key, reference).is_some() {
                return Err(SegbaseError::corrupt(format!(
                    "run {name} holds two postings for segment {} of one key",
                    reference.segment_number()
                )));
            }
        }
        Ok(table)
    }
}
