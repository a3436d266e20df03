//! Byte-oriented page stores.
//!
//! A page store maps page ids to byte strings. Id 0 is reserved to mean
//! "no page", so appended pages are numbered from 1. Existence bitmaps use
//! `segment_number + 1` as their page id for the same reason.

use std::collections::BTreeMap;
use std::fmt::Debug;

use crate::error::{Result, SegbaseError};
use crate::storage::structured::{StructReader, StructWriter};
use crate::storage::{Storage, StorageInput, StorageOutput};

pub mod arena;

pub use arena::PageArena;

/// Identifier of a page within one store.
pub type PageId = u32;

/// The reserved "no page" id.
pub const NO_PAGE: PageId = 0;

const PAGE_STORE_MAGIC: &[u8; 4] = b"SBPG";

/// The page API a backend provides for posting and bitmap pages.
pub trait PageStore: Send + Sync + Debug {
    /// Get the contents of a page.
    fn get(&self, page_id: PageId) -> Option<&[u8]>;

    /// Write a page at a known id, replacing any previous contents.
    fn put(&mut self, page_id: PageId, bytes: Vec<u8>) -> Result<()>;

    /// Write a page at a fresh id and return the id.
    fn append(&mut self, bytes: Vec<u8>) -> Result<PageId>;

    /// Drop a page's contents. The id is not handed out again by `append`.
    fn delete(&mut self, page_id: PageId) -> Result<()>;

    /// Ids of all pages with contents, ascending.
    fn page_ids(&self) -> Vec<PageId>;

    /// Number of pages with contents.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A page store held in memory and persisted as a single blob.
#[derive(Debug, Clone, Default)]
pub struct MemoryPageStore {
    pages: BTreeMap<PageId, Vec<u8>>,
    high_page: PageId,
}

impl MemoryPageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Highest id ever written.
    pub fn high_page(&self) -> PageId {
        self.high_page
    }

    /// Iterate pages in id order.
    pub fn iter(&self) -> impl Iterator<Item = (PageId, &[u8])> + '_ {
        self.pages.iter().map(|(id, bytes)| (*id, bytes.as_slice()))
    }

    /// Total bytes held.
    pub fn total_bytes(&self) -> usize {
        self.pages.values().map(Vec::len).sum()
    }

    pub fn write_to<W: StorageOutput>(&self, writer: &mut StructWriter<W>) -> Result<()> {
        writer.write_u32(self.high_page)?;
        writer.write_u32(self.pages.len() as u32)?;
        for (page_id, bytes) in &self.pages {
            writer.write_u32(*page_id)?;
            writer.write_bytes(bytes)?;
        }
        Ok(())
    }

    pub fn read_from<R: StorageInput>(reader: &mut StructReader<R>) -> Result<Self> {
        let high_page = reader.read_u32()?;
        let count = reader.read_u32()?;
        let mut pages = BTreeMap::new();
        for _ in 0..count {
            let page_id = reader.read_u32()?;
            if page_id == NO_PAGE || page_id > high_page {
                return Err(SegbaseError::corrupt(format!(
                    "page id {page_id} outside 1..={high_page}"
                )));
            }
            pages.insert(page_id, reader.read_bytes()?);
        }
        Ok(MemoryPageStore { pages, high_page })
    }

    /// Persist the store as the named blob.
    pub fn save(&self, storage: &dyn Storage, name: &str) -> Result<()> {
        let mut writer = StructWriter::new(storage.create_output(name)?, PAGE_STORE_MAGIC)?;
        self.write_to(&mut writer)?;
        writer.close()
    }

    /// Load a store saved with [`MemoryPageStore::save`].
    pub fn load(storage: &dyn Storage, name: &str) -> Result<Self> {
        let mut reader = StructReader::new(storage.open_input(name)?, PAGE_STORE_MAGIC)?;
        let store = Self::read_from(&mut reader)?;
        reader.verify_checksum()?;
        reader.close()?;
        Ok(store)
    }
}

impl PageStore for MemoryPageStore {
    fn get(&self, page_id: PageId) -> Option<&[u8]> {
        self.pages.get(&page_id).map(Vec::as_slice)
    }

    fn put(&mut self, page_id: PageId, bytes: Vec<u8>) -> Result<()> {
        if page_id == NO_PAGE {
            return Err(SegbaseError::invalid_operation("page id 0 is reserved"));
        }
        self.high_page = self.high_page.max(page_id);
        self.pages.insert(page_id, bytes);
        Ok(())
    }

    fn append(&mut self, bytes: Vec<u8>) -> Result<PageId> {
        let page_id = self
            .high_page
            .checked_add(1)
            .ok_or_else(|| SegbaseError::storage("page ids exhausted"))?;
        self.high_page = page_id;
        self.pages.insert(page_id, bytes);
        Ok(page_id)
    }

    fn delete(&mut self, page_id: PageId) -> Result<()> {
        self.pages
            .remove(&page_id)
            .map(|_| ())
            .ok_or_else(|| SegbaseError::storage(format!("page {page_id} does not exist")))
    }

    fn page_ids(&self) -> Vec<PageId> {
        self.pages.keys().copied().collect()
    }

    fn len(&self) -> usize {
        self.pages.len()
    }
}
