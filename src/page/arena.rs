//! Page arena: list pages, bitmap pages and their free lists.
//!
//! Posting pages are allocated from the free lists before new pages are
//! appended. A page whose contents are superseded by a different encoding
//! goes back on its free list instead of being leaked.

use std::collections::BTreeSet;

use log::debug;

use crate::config::SegmentSize;
use crate::error::{Result, SegbaseError};
use crate::page::{MemoryPageStore, PageId, PageStore};
use crate::posting::PostingReference;
use crate::segment::{IndexKey, Segment, SegmentKind};
use crate::storage::Storage;
use crate::storage::structured::{StructReader, StructWriter};

const ARENA_MAGIC: &[u8; 4] = b"SBAR";

/// Allocation counters since the arena was created or loaded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArenaStats {
    pub pages_reused: u64,
    pub pages_appended: u64,
    pub pages_rewritten: u64,
}

/// List and bitmap pages with explicit free lists.
#[derive(Debug, Default)]
pub struct PageArena {
    list_pages: MemoryPageStore,
    bitmap_pages: MemoryPageStore,
    freed_list_pages: BTreeSet<PageId>,
    freed_bits_pages: BTreeSet<PageId>,
    stats: ArenaStats,
}

impl PageArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn list_pages(&self) -> &MemoryPageStore {
        &self.list_pages
    }

    pub fn bitmap_pages(&self) -> &MemoryPageStore {
        &self.bitmap_pages
    }

    pub fn stats(&self) -> ArenaStats {
        self.stats
    }

    /// Take a reusable list page, lowest id first.
    pub fn get_freed_list_page(&mut self) -> Option<PageId> {
        self.freed_list_pages.pop_first()
    }

    /// Return a list page to the free list.
    pub fn note_freed_list_page(&mut self, page_id: PageId) {
        self.freed_list_pages.insert(page_id);
    }

    /// Take a reusable bitmap page, lowest id first.
    pub fn get_freed_bits_page(&mut self) -> Option<PageId> {
        self.freed_bits_pages.pop_first()
    }

    /// Return a bitmap page to the free list.
    pub fn note_freed_bits_page(&mut self, page_id: PageId) {
        self.freed_bits_pages.insert(page_id);
    }

    pub fn freed_list_page_count(&self) -> usize {
        self.freed_list_pages.len()
    }

    pub fn freed_bits_page_count(&self) -> usize {
        self.freed_bits_pages.len()
    }

    /// Write a segment to a fresh or reused page and return its reference.
    ///
    /// Int segments are stored inline in the reference.
    pub fn store_segment(&mut self, segment: &Segment) -> Result<PostingReference> {
        let segment_number = segment.segment_number();
        let count = segment.count_records();
        if count == 0 {
            return Err(SegbaseError::invalid_operation(format!(
                "cannot store empty segment {segment_number}"
            )));
        }
        match segment {
            Segment::Int(int) => Ok(PostingReference::Record {
                segment_number,
                offset: int.offset(),
            }),
            Segment::List(_) => {
                let count = list_count(segment_number, count)?;
                let page_id = match self.get_freed_list_page() {
                    Some(page_id) => {
                        self.list_pages.put(page_id, segment.to_bytes())?;
                        self.stats.pages_reused += 1;
                        page_id
                    }
                    None => {
                        self.stats.pages_appended += 1;
                        self.list_pages.append(segment.to_bytes())?
                    }
                };
                Ok(PostingReference::List {
                    segment_number,
                    count,
                    page_id,
                })
            }
            Segment::Bitarray(_) => {
                let page_id = match self.get_freed_bits_page() {
                    Some(page_id) => {
                        self.bitmap_pages.put(page_id, segment.to_bytes())?;
                        self.stats.pages_reused += 1;
                        page_id
                    }
                    None => {
                        self.stats.pages_appended += 1;
                        self.bitmap_pages.append(segment.to_bytes())?
                    }
                };
                Ok(PostingReference::Bitmap {
                    segment_number,
                    count: count as u32,
                    page_id,
                })
            }
        }
    }

    /// Rebuild the segment a reference points at.
    pub fn read_segment(
        &self,
        reference: &PostingReference,
        key: Option<IndexKey>,
        size: SegmentSize,
    ) -> Result<Segment> {
        let segment_number = reference.segment_number();
        let segment = match *reference {
            PostingReference::Record { offset, .. } => Segment::decode(
                SegmentKind::Int,
                segment_number,
                key,
                &offset.to_be_bytes(),
                size,
            )?,
            PostingReference::List { page_id, .. } => {
                let bytes = self.list_pages.get(page_id).ok_or_else(|| {
                    SegbaseError::corrupt(format!("missing list page {page_id}"))
                })?;
                Segment::decode(SegmentKind::List, segment_number, key, bytes, size)?
            }
            PostingReference::Bitmap { page_id, .. } => {
                let bytes = self.bitmap_pages.get(page_id).ok_or_else(|| {
                    SegbaseError::corrupt(format!("missing bitmap page {page_id}"))
                })?;
                Segment::decode(SegmentKind::Bitarray, segment_number, key, bytes, size)?
            }
        };
        if segment.count_records() != reference.count() {
            return Err(SegbaseError::corrupt(format!(
                "segment {segment_number} holds {} records, reference says {}",
                segment.count_records(),
                reference.count()
            )));
        }
        Ok(segment)
    }

    /// Store a new version of a segment in place of `old`.
    ///
    /// The page is rewritten in place when the encoding is unchanged;
    /// otherwise the old page is released and a new one allocated.
    pub fn replace(&mut self, old: &PostingReference, segment: &Segment) -> Result<PostingReference> {
        let segment_number = segment.segment_number();
        let count = segment.count_records();
        match (*old, segment) {
            (PostingReference::List { page_id, .. }, Segment::List(_)) if count > 0 => {
                let count = list_count(segment_number, count)?;
                self.list_pages.put(page_id, segment.to_bytes())?;
                self.stats.pages_rewritten += 1;
                Ok(PostingReference::List {
                    segment_number,
                    count,
                    page_id,
                })
            }
            (PostingReference::Bitmap { page_id, .. }, Segment::Bitarray(_)) if count > 0 => {
                self.bitmap_pages.put(page_id, segment.to_bytes())?;
                self.stats.pages_rewritten += 1;
                Ok(PostingReference::Bitmap {
                    segment_number,
                    count: count as u32,
                    page_id,
                })
            }
            _ => {
                self.release(old)?;
                self.store_segment(segment)
            }
        }
    }

    /// Drop the page behind a reference and put it on its free list.
    pub fn release(&mut self, reference: &PostingReference) -> Result<()> {
        match *reference {
            PostingReference::Record { .. } => Ok(()),
            PostingReference::List { page_id, .. } => {
                self.list_pages.delete(page_id)?;
                self.note_freed_list_page(page_id);
                Ok(())
            }
            PostingReference::Bitmap { page_id, .. } => {
                self.bitmap_pages.delete(page_id)?;
                self.note_freed_bits_page(page_id);
                Ok(())
            }
        }
    }

    /// Persist pages and free lists as the named blob.
    pub fn save(&self, storage: &dyn Storage, name: &str) -> Result<()> {
        let mut writer = StructWriter::new(storage.create_output(name)?, ARENA_MAGIC)?;
        self.list_pages.write_to(&mut writer)?;
        self.bitmap_pages.write_to(&mut writer)?;
        for freed in [&self.freed_list_pages, &self.freed_bits_pages] {
            writer.write_u32(freed.len() as u32)?;
            for page_id in freed {
                writer.write_u32(*page_id)?;
            }
        }
        writer.close()?;
        debug!(
            "saved page arena {name}: {} list pages, {} bitmap pages, {} free",
            self.list_pages.len(),
            self.bitmap_pages.len(),
            self.freed_list_pages.len() + self.freed_bits_pages.len()
        );
        Ok(())
    }

    /// Load an arena saved with [`PageArena::save`].
    pub fn load(storage: &dyn Storage, name: &str) -> Result<Self> {
        let mut reader = StructReader::new(storage.open_input(name)?, ARENA_MAGIC)?;
        let list_pages = MemoryPageStore::read_from(&mut reader)?;
        let bitmap_pages = MemoryPageStore::read_from(&mut reader)?;
        let mut freed = [BTreeSet::new(), BTreeSet::new()];
        for set in &mut freed {
            let count = reader.read_u32()?;
            for _ in 0..count {
                set.insert(reader.read_u32()?);
            }
        }
        reader.verify_checksum()?;
        reader.close()?;
        let [freed_list_pages, freed_bits_pages] = freed;
        Ok(PageArena {
            list_pages,
            bitmap_pages,
            freed_list_pages,
            freed_bits_pages,
            stats: ArenaStats::default(),
        })
    }
}

fn list_count(segment_number: u32, count: usize) -> Result<u16> {
    u16::try_from(count).map_err(|_| {
        SegbaseError::invalid_operation(format!(
            "list segment {segment_number} has {count} records, too many for a list page"
        ))
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::segment::{BitarraySegment, IntSegment, ListSegment};
    use crate::storage::memory::MemoryStorage;

    fn size() -> SegmentSize {
        SegmentSize::default()
    }

    fn list(offsets: Vec<u16>) -> Segment {
        Segment::List(ListSegment::from_offsets(3, None, offsets, size()))
    }

    fn bitmap(offsets: &[u16]) -> Segment {
        let mut bits = BitarraySegment::empty(3, None, size());
        for offset in offsets {
            bits.set(*offset);
        }
        Segment::Bitarray(bits)
    }

    #[test]
    fn test_store_and_read_each_kind() {
        let mut arena = PageArena::new();
        let key: IndexKey = Arc::from(&b"k"[..]);

        let int = Segment::Int(IntSegment::new(3, None, 42, size()));
        let reference = arena.store_segment(&int).unwrap();
        assert_eq!(
            reference,
            PostingReference::Record {
                segment_number: 3,
                offset: 42
            }
        );
        let read = arena.read_segment(&reference, Some(key.clone()), size()).unwrap();
        assert_eq!(read.kind(), SegmentKind::Int);
        assert_eq!(read.key(), Some(&key));

        let reference = arena.store_segment(&list(vec![1, 2, 3])).unwrap();
        assert_eq!(reference.kind(), SegmentKind::List);
        assert_eq!(reference.count(), 3);
        let read = arena.read_segment(&reference, None, size()).unwrap();
        assert_eq!(
            read.record_numbers().collect::<Vec<_>>(),
            vec![24577, 24578, 24579]
        );

        let reference = arena.store_segment(&bitmap(&[0, 8191])).unwrap();
        assert_eq!(reference.kind(), SegmentKind::Bitarray);
        let read = arena.read_segment(&reference, None, size()).unwrap();
        assert_eq!(read.count_records(), 2);
    }

    #[test]
    fn test_freed_pages_are_reused() {
        let mut arena = PageArena::new();
        let first = arena.store_segment(&list(vec![1, 2])).unwrap();
        let second = arena.store_segment(&list(vec![3, 4])).unwrap();
        assert_eq!(first.page_id(), Some(1));
        assert_eq!(second.page_id(), Some(2));

        arena.release(&first).unwrap();
        assert_eq!(arena.freed_list_page_count(), 1);
        let third = arena.store_segment(&list(vec![5, 6])).unwrap();
        assert_eq!(third.page_id(), Some(1));
        assert_eq!(arena.freed_list_page_count(), 0);
        assert_eq!(arena.stats().pages_reused, 1);
        assert_eq!(arena.stats().pages_appended, 2);
    }

    #[test]
    fn test_replace_in_place_and_across_kinds() {
        let mut arena = PageArena::new();
        let reference = arena.store_segment(&list(vec![1, 2])).unwrap();

        let reference = arena.replace(&reference, &list(vec![1, 2, 9])).unwrap();
        assert_eq!(reference.page_id(), Some(1));
        assert_eq!(reference.count(), 3);
        assert_eq!(arena.stats().pages_rewritten, 1);

        let reference = arena.replace(&reference, &bitmap(&[1, 2, 9, 10])).unwrap();
        assert_eq!(reference.kind(), SegmentKind::Bitarray);
        assert_eq!(arena.freed_list_page_count(), 1);
        assert!(arena.list_pages().is_empty());

        let reference = arena
            .replace(&reference, &Segment::Int(IntSegment::new(3, None, 7, size())))
            .unwrap();
        assert_eq!(reference.kind(), SegmentKind::Int);
        assert_eq!(arena.freed_bits_page_count(), 1);
    }

    #[test]
    fn test_read_rejects_count_mismatch() {
        let mut arena = PageArena::new();
        let reference = arena.store_segment(&list(vec![1, 2])).unwrap();
        let wrong = PostingReference::List {
            segment_number: 3,
            count: 5,
            page_id: reference.page_id().unwrap(),
        };
        assert!(arena.read_segment(&wrong, None, size()).is_err());
        let missing = PostingReference::Bitmap {
            segment_number: 3,
            count: 1,
            page_id: 77,
        };
        assert!(arena.read_segment(&missing, None, size()).is_err());
    }

    #[test]
    fn test_save_and_load_keeps_free_lists() {
        let storage = MemoryStorage::new();
        let mut arena = PageArena::new();
        let a = arena.store_segment(&list(vec![1, 2])).unwrap();
        arena.store_segment(&bitmap(&[4])).unwrap();
        arena.release(&a).unwrap();
        arena.save(&storage, "arena").unwrap();

        let mut loaded = PageArena::load(&storage, "arena").unwrap();
        assert_eq!(loaded.bitmap_pages().len(), 1);
        assert_eq!(loaded.get_freed_list_page(), Some(1));
        assert_eq!(loaded.get_freed_bits_page(), None);
    }

    #[test]
    fn test_empty_segment_is_rejected() {
        let mut arena = PageArena::new();
        assert!(arena.store_segment(&bitmap(&[])).is_err());
    }
}
