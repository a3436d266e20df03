//! # segbase
//!
//! Segmented record sets and bulk-loaded secondary indexes.
//!
//! ## Features
//!
//! - Record sets split into fixed-width segments, each stored as a single
//!   record, a sorted offset list or a bitmap, whichever fits best
//! - Cursors, rank and select, and set algebra over record sets
//! - Secondary indexes whose postings live in a shared page arena with
//!   page reuse
//! - Deferred updates for bulk loads: per-segment accumulation, sorted runs
//!   and a k-way merge into the main index
//! - Pluggable storage backends (in-memory and directory)

pub mod cli;
pub mod config;
pub mod database;
pub mod error;
pub mod index;
pub mod page;
pub mod posting;
pub mod primary;
pub mod recordset;
pub mod secondary;
pub mod segment;
pub mod storage;

pub mod prelude {
    pub use crate::config::{DatabaseConfig, IndexSpec, SegmentSize};
    pub use crate::database::{Database, JsonFieldExtractor, KeyExtractor};
    pub use crate::error::{RecordsetError, Result, SegbaseError};
    pub use crate::recordset::{Recordset, RecordsetCursor};
    pub use crate::segment::{CursorEntry, IndexKey, Segment, SegmentKind};
    pub use crate::storage::Storage;
    pub use crate::storage::file::{FileStorage, FileStorageConfig};
    pub use crate::storage::memory::MemoryStorage;
}

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
