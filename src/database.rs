//! A database: one record store, its secondary indexes and the page arena
//! they share.
//!
//! Records are appended with [`Database::put_record`]. In normal mode the
//! existence bitmap and every index are updated at once. Between
//! [`Database::set_defer_update`] and [`Database::unset_defer_update`] the
//! updates are staged instead and flushed at each deferred update point;
//! [`Database::do_final_segment_deferred_updates`] flushes the last partial
//! segment and merges the staged runs into the indexes.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use segbase::config::{DatabaseConfig, IndexSpec};
//! use segbase::database::Database;
//! use segbase::storage::memory::MemoryStorage;
//!
//! let config = DatabaseConfig::new("games").with_index(IndexSpec::json_field("result"));
//! let mut db = Database::create(Arc::new(MemoryStorage::new()), config).unwrap();
//!
//! db.put_record(br#"{"result":"win"}"#.to_vec()).unwrap();
//! db.put_record(br#"{"result":"loss"}"#.to_vec()).unwrap();
//! db.put_record(br#"{"result":"win"}"#.to_vec()).unwrap();
//!
//! let wins = db.recordset_for_key("result", b"win").unwrap();
//! assert_eq!(wins.record_numbers().collect::<Vec<_>>(), vec![0, 2]);
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::io::{Read, Write};
use std::sync::Arc;

use ahash::AHashMap;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::config::{DatabaseConfig, IndexSpec, SegmentSize};
use crate::error::{RecordsetError, Result, SegbaseError};
use crate::index::IndexTable;
use crate::page::{PageArena, PageStore};
use crate::primary::Primary;
use crate::recordset::{DatabaseId, Recordset, RecordsetRegistry};
use crate::secondary::Secondary;
use crate::segment::CursorEntry;
use crate::storage::{Storage, StorageInput, StorageOutput};

pub mod extractor;

pub use extractor::{JsonFieldExtractor, KeyExtractor};

/// Blob holding the database configuration.
pub const CONFIG_FILE: &str = "segbase.json";

/// Counts reported by [`Database::stats`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseStats {
    pub name: String,
    pub records: usize,
    pub high_record_number: Option<u64>,
    pub existence_segments: usize,
    pub list_pages: usize,
    pub bitmap_pages: usize,
    pub freed_list_pages: usize,
    pub freed_bitmap_pages: usize,
    pub indexes: BTreeMap<String, IndexStats>,
}

/// Per-index counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStats {
    pub keys: usize,
    pub postings: usize,
}

/// A record store with secondary indexes.
pub struct Database {
    config: DatabaseConfig,
    storage: Arc<dyn Storage>,
    primary: Primary,
    arena: PageArena,
    secondaries: BTreeMap<String, Secondary>,
    extractors: AHashMap<String, Arc<dyn KeyExtractor>>,
    registry: Arc<RecordsetRegistry>,
    deferred_update_points: Vec<u16>,
    deferred: bool,
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("name", &self.config.name)
            .field("id", &self.registry.database())
            .field("records", &self.primary.record_count())
            .field("indexes", &self.secondaries.keys().collect::<Vec<_>>())
            .field("deferred", &self.deferred)
            .finish()
    }
}

impl Database {
    fn assemble(
        config: DatabaseConfig,
        storage: Arc<dyn Storage>,
        primary: Primary,
        arena: PageArena,
        secondaries: BTreeMap<String, Secondary>,
    ) -> Self {
        let mut extractors: AHashMap<String, Arc<dyn KeyExtractor>> = AHashMap::new();
        for spec in &config.indexes {
            if let Some(field) = &spec.field {
                extractors.insert(spec.name.clone(), Arc::new(JsonFieldExtractor::new(field.clone())));
            }
        }
        Database {
            deferred_update_points: config.effective_deferred_update_points(),
            config,
            storage,
            primary,
            arena,
            secondaries,
            extractors,
            registry: RecordsetRegistry::new(DatabaseId::allocate()),
            deferred: false,
        }
    }

    /// Create an empty database in `storage` and write its configuration.
    pub fn create(storage: Arc<dyn Storage>, config: DatabaseConfig) -> Result<Self> {
        config.validate()?;
        if storage.file_exists(CONFIG_FILE) {
            return Err(SegbaseError::config(format!(
                "a database already exists in this storage ({CONFIG_FILE} present)"
            )));
        }
        let size = config.segment_size;
        let secondaries = config
            .indexes
            .iter()
            .map(|spec| (spec.name.clone(), Secondary::new(spec.name.clone(), size)))
            .collect();
        let database = Self::assemble(config, storage, Primary::new(size), PageArena::new(), secondaries);
        database.save_config()?;
        info!(
            "created database {} with {} indexes",
            database.config.name,
            database.secondaries.len()
        );
        Ok(database)
    }

    /// Open the database stored in `storage`.
    pub fn open(storage: Arc<dyn Storage>) -> Result<Self> {
        let mut input = storage.open_input(CONFIG_FILE)?;
        let mut json = String::new();
        input.read_to_string(&mut json)?;
        input.close()?;
        let config = DatabaseConfig::from_json(&json)?;
        let size = config.segment_size;

        let records_name = Self::records_file_name(&config);
        let existence_name = Self::existence_file_name(&config);
        let primary = if storage.file_exists(&records_name) {
            Primary::load(storage.as_ref(), &records_name, &existence_name, size)?
        } else {
            Primary::new(size)
        };
        let arena_name = Self::arena_file_name(&config);
        let arena = if storage.file_exists(&arena_name) {
            PageArena::load(storage.as_ref(), &arena_name)?
        } else {
            PageArena::new()
        };
        let mut secondaries = BTreeMap::new();
        for spec in &config.indexes {
            let secondary = Secondary::new(spec.name.clone(), size);
            let table = if storage.file_exists(&secondary.index_file_name()) {
                IndexTable::load(storage.as_ref(), &secondary.index_file_name())?
            } else {
                IndexTable::new()
            };
            secondaries.insert(spec.name.clone(), Secondary::with_table(spec.name.clone(), size, table));
        }
        let database = Self::assemble(config, storage, primary, arena, secondaries);
        info!(
            "opened database {}: {} records, {} indexes",
            database.config.name,
            database.primary.record_count(),
            database.secondaries.len()
        );
        Ok(database)
    }

    /// Open the database in `storage`, creating it from `config` if absent.
    pub fn open_or_create(storage: Arc<dyn Storage>, config: DatabaseConfig) -> Result<Self> {
        if storage.file_exists(CONFIG_FILE) {
            Self::open(storage)
        } else {
            Self::create(storage, config)
        }
    }

    fn records_file_name(config: &DatabaseConfig) -> String {
        format!("{}.rec", config.name)
    }

    fn existence_file_name(config: &DatabaseConfig) -> String {
        format!("{}.ebm", config.name)
    }

    fn arena_file_name(config: &DatabaseConfig) -> String {
        format!("{}.pages", config.name)
    }

    fn save_config(&self) -> Result<()> {
        let mut output = self.storage.create_output(CONFIG_FILE)?;
        output.write_all(self.config.to_json()?.as_bytes())?;
        output.close()
    }

    pub fn id(&self) -> DatabaseId {
        self.registry.database()
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    pub fn segment_size(&self) -> SegmentSize {
        self.config.segment_size
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub fn registry(&self) -> &Arc<RecordsetRegistry> {
        &self.registry
    }

    pub fn arena(&self) -> &PageArena {
        &self.arena
    }

    pub fn primary(&self) -> &Primary {
        &self.primary
    }

    pub fn index(&self, name: &str) -> Option<&Secondary> {
        self.secondaries.get(name)
    }

    pub fn index_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.secondaries.keys().map(String::as_str)
    }

    fn secondary(&self, name: &str) -> Result<&Secondary> {
        self.secondaries
            .get(name)
            .ok_or_else(|| SegbaseError::index(format!("no index named {name}")))
    }

    fn ensure_not_deferred(&self, operation: &str) -> Result<()> {
        if self.deferred {
            return Err(SegbaseError::invalid_operation(format!(
                "{operation} is not allowed during deferred updates"
            )));
        }
        Ok(())
    }

    /// Add a secondary index and file every existing record under it.
    pub fn add_index(&mut self, spec: IndexSpec) -> Result<()> {
        self.ensure_not_deferred("add_index")?;
        if self.secondaries.contains_key(&spec.name) {
            return Err(SegbaseError::config(format!("index {} already exists", spec.name)));
        }
        let name = spec.name.clone();
        let field = spec.field.clone();
        let mut config = self.config.clone();
        config.indexes.push(spec);
        config.validate()?;
        self.config = config;
        self.secondaries
            .insert(name.clone(), Secondary::new(name.clone(), self.segment_size()));
        self.save_config()?;
        if let Some(field) = field {
            self.set_key_extractor(&name, JsonFieldExtractor::new(field))?;
        }
        Ok(())
    }

    /// Use `extractor` to derive keys for the named index.
    ///
    /// Existing records are filed under the index at once.
    pub fn set_key_extractor<E: KeyExtractor + 'static>(&mut self, name: &str, extractor: E) -> Result<()> {
        self.ensure_not_deferred("set_key_extractor")?;
        self.secondary(name)?;
        let extractor: Arc<dyn KeyExtractor> = Arc::new(extractor);
        let size = self.segment_size();
        if let Some(secondary) = self.secondaries.get_mut(name) {
            for (record_number, record) in self.primary.records() {
                let (segment_number, offset) = size.split(record_number);
                for key in extractor.extract(record)? {
                    secondary.segment_put(&mut self.arena, &key, segment_number, offset)?;
                }
            }
        }
        self.extractors.insert(name.to_string(), extractor);
        Ok(())
    }

    fn keys_for(&self, record: &[u8]) -> Result<Vec<(String, Vec<Vec<u8>>)>> {
        let mut keys = Vec::with_capacity(self.extractors.len());
        for name in self.secondaries.keys() {
            if let Some(extractor) = self.extractors.get(name) {
                keys.push((name.clone(), extractor.extract(record)?));
            }
        }
        Ok(keys)
    }

    /// Append a record and index it. Returns its record number.
    pub fn put_record(&mut self, record: Vec<u8>) -> Result<u64> {
        let record_number = self.primary.next_record_number()?;
        let keys = self.keys_for(&record)?;
        let (segment_number, offset) = self.segment_size().split(record_number);
        self.primary.put_record(record_number, record);

        if self.deferred {
            self.primary.defer_put(segment_number, offset)?;
            for (name, index_keys) in &keys {
                if let Some(secondary) = self.secondaries.get_mut(name) {
                    for key in index_keys {
                        secondary.defer_put(key, segment_number, offset)?;
                    }
                }
            }
            if self.deferred_update_points.contains(&offset) {
                self.do_segment_deferred_updates(segment_number, offset)?;
            }
        } else {
            self.primary.segment_put(segment_number, offset)?;
            for (name, index_keys) in &keys {
                if let Some(secondary) = self.secondaries.get_mut(name) {
                    for key in index_keys {
                        secondary.segment_put(&mut self.arena, key, segment_number, offset)?;
                    }
                }
            }
        }
        Ok(record_number)
    }

    /// Replace a record's value and re-file it under its new keys.
    pub fn replace_record(&mut self, record_number: u64, record: Vec<u8>) -> Result<()> {
        self.ensure_not_deferred("replace_record")?;
        let old = self
            .primary
            .record(record_number)
            .ok_or_else(|| SegbaseError::index(format!("record {record_number} does not exist")))?;
        let old_keys = self.keys_for(old)?;
        let new_keys = self.keys_for(&record)?;
        let (segment_number, offset) = self.segment_size().split(record_number);
        for (name, keys) in &old_keys {
            if let Some(secondary) = self.secondaries.get_mut(name) {
                for key in keys {
                    secondary.segment_delete(&mut self.arena, key, segment_number, offset)?;
                }
            }
        }
        for (name, keys) in &new_keys {
            if let Some(secondary) = self.secondaries.get_mut(name) {
                for key in keys {
                    secondary.segment_put(&mut self.arena, key, segment_number, offset)?;
                }
            }
        }
        self.primary.put_record(record_number, record);
        Ok(())
    }

    /// Delete a record and remove it from every index. Returns false if
    /// there was no such record.
    pub fn delete_record(&mut self, record_number: u64) -> Result<bool> {
        self.ensure_not_deferred("delete_record")?;
        let Some(record) = self.primary.record(record_number) else {
            return Ok(false);
        };
        let keys = self.keys_for(record)?;
        let (segment_number, offset) = self.segment_size().split(record_number);
        for (name, index_keys) in &keys {
            if let Some(secondary) = self.secondaries.get_mut(name) {
                for key in index_keys {
                    secondary.segment_delete(&mut self.arena, key, segment_number, offset)?;
                }
            }
        }
        self.primary.segment_delete(segment_number, offset)?;
        self.primary.delete_record(record_number);
        Ok(true)
    }

    pub fn record(&self, record_number: u64) -> Option<&[u8]> {
        self.primary.record(record_number)
    }

    /// Pair a cursor entry with its stored record.
    ///
    /// ```
    /// use std::sync::Arc;
    /// use segbase::config::{DatabaseConfig, IndexSpec};
    /// use segbase::database::Database;
    /// use segbase::storage::memory::MemoryStorage;
    ///
    /// let config = DatabaseConfig::new("demo").with_index(IndexSpec::json_field("k"));
    /// let mut db = Database::create(Arc::new(MemoryStorage::new()), config).unwrap();
    /// db.put_record(br#"{"k":"a"}"#.to_vec()).unwrap();
    ///
    /// let mut found = db.recordset_for_key("k", b"a").unwrap();
    /// let mut cursor = found.cursor();
    /// let (entry, record) = cursor.first().and_then(|e| db.entry_record(e)).unwrap();
    /// assert_eq!(entry.record_number, 0);
    /// assert_eq!(record, br#"{"k":"a"}"#);
    /// ```
    pub fn entry_record(&self, entry: CursorEntry) -> Option<(CursorEntry, &[u8])> {
        let record = self.primary.record(entry.record_number)?;
        Some((entry, record))
    }

    /// Stored records for every member of `recordset`, ascending.
    pub fn records<'a>(
        &'a self,
        recordset: &'a Recordset,
    ) -> impl Iterator<Item = (u64, &'a [u8])> + 'a {
        recordset
            .record_numbers()
            .filter_map(|record_number| Some((record_number, self.primary.record(record_number)?)))
    }

    pub fn record_count(&self) -> usize {
        self.primary.record_count()
    }

    pub fn high_record_number(&self) -> Option<u64> {
        self.primary.get_high_record().map(|(record_number, _)| record_number)
    }

    pub fn is_deferred(&self) -> bool {
        self.deferred
    }

    /// The offsets at which deferred updates are flushed.
    pub fn deferred_update_points(&self) -> &[u16] {
        &self.deferred_update_points
    }

    /// Switch to deferred updates for a bulk load.
    pub fn set_defer_update(&mut self) -> Result<()> {
        if self.deferred {
            return Err(SegbaseError::invalid_operation("deferred updates already on"));
        }
        self.primary.set_defer_update(&self.deferred_update_points);
        self.deferred = true;
        info!(
            "database {}: deferred updates on, update points {:?}",
            self.config.name, self.deferred_update_points
        );
        Ok(())
    }

    /// Flush the staged updates for a segment that reached an update point.
    pub fn do_segment_deferred_updates(&mut self, segment_number: u32, offset: u16) -> Result<()> {
        let chunk = self
            .primary
            .chunk_state()
            .ok_or_else(|| SegbaseError::invalid_operation("deferred updates are off"))?;
        self.primary.write_existence_bit_map(segment_number)?;
        for secondary in self.secondaries.values_mut() {
            secondary.sort_and_write(&mut self.arena, self.storage.as_ref(), segment_number, chunk)?;
        }
        self.primary
            .note_update_point(segment_number, offset, &self.deferred_update_points);
        debug!(
            "database {}: deferred updates done for segment {segment_number} at offset {offset}",
            self.config.name
        );
        Ok(())
    }

    /// Flush the final, possibly partial, segment and merge every index.
    ///
    /// The segment is skipped when its last record fell on an update point,
    /// since that flush already happened. The merge always runs.
    pub fn do_final_segment_deferred_updates(&mut self) -> Result<()> {
        let chunk = self
            .primary
            .chunk_state()
            .ok_or_else(|| SegbaseError::invalid_operation("deferred updates are off"))?;
        if let Some(high) = self.high_record_number() {
            let (segment_number, offset) = self.segment_size().split(high);
            if !self.deferred_update_points.contains(&offset) {
                self.primary.write_existence_bit_map(segment_number)?;
                for secondary in self.secondaries.values_mut() {
                    secondary.sort_and_write(
                        &mut self.arena,
                        self.storage.as_ref(),
                        segment_number,
                        chunk,
                    )?;
                }
            }
        }
        self.merge()
    }

    /// Merge the deferred runs of every index into its main index.
    pub fn merge(&mut self) -> Result<()> {
        for secondary in self.secondaries.values_mut() {
            secondary.merge(self.storage.as_ref())?;
        }
        Ok(())
    }

    /// Leave deferred update mode.
    pub fn unset_defer_update(&mut self) {
        let pending_keys: usize = self.secondaries.values().map(Secondary::pending_keys).sum();
        let unwritten = self.primary.unset_defer_update();
        if pending_keys > 0 || unwritten > 0 {
            warn!(
                "database {}: deferred updates off with {pending_keys} staged keys and {unwritten} unwritten bitmaps",
                self.config.name
            );
        }
        self.deferred = false;
        info!("database {}: deferred updates off", self.config.name);
    }

    /// A new, empty record set on this database.
    pub fn recordset(&self) -> Recordset {
        Recordset::new(&self.registry, self.segment_size())
    }

    /// Records filed under `key` in the named index.
    pub fn recordset_for_key(&self, index: &str, key: &[u8]) -> Result<Recordset> {
        let mut recordset = self.recordset();
        self.secondary(index)?
            .populate_recordset_key(&self.arena, &mut recordset, key)?;
        Ok(recordset)
    }

    /// Records filed under keys in `[low, high]` in the named index.
    pub fn recordset_for_key_range(
        &self,
        index: &str,
        low: Option<&[u8]>,
        high: Option<&[u8]>,
    ) -> Result<Recordset> {
        let mut recordset = self.recordset();
        self.secondary(index)?
            .populate_recordset_key_range(&self.arena, &mut recordset, low, high)?;
        Ok(recordset)
    }

    /// Records filed under keys starting with `prefix` in the named index.
    pub fn recordset_for_key_prefix(&self, index: &str, prefix: &[u8]) -> Result<Recordset> {
        let mut recordset = self.recordset();
        self.secondary(index)?
            .populate_recordset_key_prefix(&self.arena, &mut recordset, prefix)?;
        Ok(recordset)
    }

    /// Every record referenced by the named index.
    pub fn recordset_for_index(&self, index: &str) -> Result<Recordset> {
        let mut recordset = self.recordset();
        self.secondary(index)?
            .populate_recordset_all(&self.arena, &mut recordset)?;
        Ok(recordset)
    }

    /// Every record in the database, from the existence bitmaps.
    pub fn recordset_all(&self) -> Result<Recordset> {
        let mut recordset = self.recordset();
        self.primary.populate_recordset_all(&mut recordset)?;
        Ok(recordset)
    }

    /// The lowest record number filed under `key`.
    pub fn first_record_for_key(&self, index: &str, key: &[u8]) -> Result<Option<u64>> {
        self.secondary(index)?.first_record_for_key(&self.arena, key)
    }

    /// Store `recordset` in the named index under `key`, replacing what was
    /// there.
    pub fn file_records_under(&mut self, index: &str, recordset: &Recordset, key: &[u8]) -> Result<()> {
        self.ensure_not_deferred("file_records_under")?;
        if recordset.database_id() != self.id() {
            return Err(RecordsetError::DatabaseMismatch {
                operation: "file_records_under",
            }
            .into());
        }
        let secondary = self
            .secondaries
            .get_mut(index)
            .ok_or_else(|| SegbaseError::index(format!("no index named {index}")))?;
        secondary.file_records_under(&mut self.arena, recordset, key)
    }

    /// Remove what the named index stores under `key`.
    pub fn unfile_records_under(&mut self, index: &str, key: &[u8]) -> Result<usize> {
        self.ensure_not_deferred("unfile_records_under")?;
        let secondary = self
            .secondaries
            .get_mut(index)
            .ok_or_else(|| SegbaseError::index(format!("no index named {index}")))?;
        secondary.unfile_records_under(&mut self.arena, key)
    }

    pub fn stats(&self) -> DatabaseStats {
        DatabaseStats {
            name: self.config.name.clone(),
            records: self.primary.record_count(),
            high_record_number: self.high_record_number(),
            existence_segments: self.primary.existence_segment_count(),
            list_pages: self.arena.list_pages().len(),
            bitmap_pages: self.arena.bitmap_pages().len(),
            freed_list_pages: self.arena.freed_list_page_count(),
            freed_bitmap_pages: self.arena.freed_bits_page_count(),
            indexes: self
                .secondaries
                .iter()
                .map(|(name, secondary)| {
                    (
                        name.clone(),
                        IndexStats {
                            keys: secondary.table().key_count(),
                            postings: secondary.table().len(),
                        },
                    )
                })
                .collect(),
        }
    }

    /// Persist configuration, records, bitmaps, pages and indexes.
    pub fn flush(&self) -> Result<()> {
        self.ensure_not_deferred("flush")?;
        let storage = self.storage.as_ref();
        self.save_config()?;
        self.primary.save(
            storage,
            &Self::records_file_name(&self.config),
            &Self::existence_file_name(&self.config),
        )?;
        self.arena.save(storage, &Self::arena_file_name(&self.config))?;
        for secondary in self.secondaries.values() {
            secondary.table().save(storage, &secondary.index_file_name())?;
        }
        storage.sync()?;
        info!(
            "flushed database {}: {} records",
            self.config.name,
            self.primary.record_count()
        );
        Ok(())
    }

    /// Close every record set open on this database. Returns how many were
    /// closed.
    pub fn close(&mut self) -> usize {
        let closed = self.registry.close_all();
        debug!("database {}: closed {closed} record sets", self.config.name);
        closed
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        self.registry.close_all();
    }
}
