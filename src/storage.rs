//! Storage abstraction layer.
//!
//! The engine persists everything as named blobs: page stores, sorted index
//! runs, the record file and the configuration. A [`Storage`] backend only
//! has to create, read, rename and delete such blobs, so the same engine
//! runs against [`MemoryStorage`](memory::MemoryStorage) in tests and
//! [`FileStorage`](file::FileStorage) on disk.
//!
//! # Example
//!
//! ```
//! use std::io::{Read, Write};
//!
//! use segbase::storage::Storage;
//! use segbase::storage::memory::MemoryStorage;
//!
//! # fn main() -> segbase::error::Result<()> {
//! let storage = MemoryStorage::new();
//!
//! let mut output = storage.create_output("pages.bin")?;
//! output.write_all(b"page data")?;
//! output.close()?;
//!
//! let mut input = storage.open_input("pages.bin")?;
//! let mut buffer = Vec::new();
//! input.read_to_end(&mut buffer)?;
//! assert_eq!(buffer, b"page data");
//! # Ok(())
//! # }
//! ```

use std::io::{Read, Write};

use thiserror::Error;

use crate::error::{Result, SegbaseError};

pub mod file;
pub mod memory;
pub mod structured;

/// A backend that stores named blobs.
pub trait Storage: Send + Sync + std::fmt::Debug {
    /// Open an existing blob for reading.
    fn open_input(&self, name: &str) -> Result<Box<dyn StorageInput>>;

    /// Create a blob for writing, replacing any existing one.
    ///
    /// The contents become visible once the output is closed.
    fn create_output(&self, name: &str) -> Result<Box<dyn StorageOutput>>;

    /// Check if a blob exists.
    fn file_exists(&self, name: &str) -> bool;

    /// Delete a blob. Deleting a missing blob is not an error.
    fn delete_file(&self, name: &str) -> Result<()>;

    /// List all blob names, sorted.
    fn list_files(&self) -> Result<Vec<String>>;

    /// Size of a blob in bytes.
    fn file_size(&self, name: &str) -> Result<u64>;

    /// Rename a blob, replacing any blob already called `new_name`.
    fn rename_file(&self, old_name: &str, new_name: &str) -> Result<()>;

    /// Sync all pending writes.
    fn sync(&self) -> Result<()>;
}

/// A trait for reading a blob.
pub trait StorageInput: Read + Send + std::fmt::Debug {
    /// Total size of the blob.
    fn size(&self) -> Result<u64>;

    /// Close the input.
    fn close(&mut self) -> Result<()>;
}

/// A trait for writing a blob.
pub trait StorageOutput: Write + Send + std::fmt::Debug {
    /// Flush and sync the output to storage.
    fn flush_and_sync(&mut self) -> Result<()>;

    /// Bytes written so far.
    fn position(&self) -> u64;

    /// Close the output, publishing its contents.
    fn close(&mut self) -> Result<()>;
}

impl StorageOutput for Box<dyn StorageOutput> {
    fn flush_and_sync(&mut self) -> Result<()> {
        self.as_mut().flush_and_sync()
    }

    fn position(&self) -> u64 {
        self.as_ref().position()
    }

    fn close(&mut self) -> Result<()> {
        self.as_mut().close()
    }
}

impl StorageInput for Box<dyn StorageInput> {
    fn size(&self) -> Result<u64> {
        self.as_ref().size()
    }

    fn close(&mut self) -> Result<()> {
        self.as_mut().close()
    }
}

/// Error types specific to storage operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Output is closed: {0}")]
    OutputClosed(String),
}

impl From<StorageError> for SegbaseError {
    fn from(err: StorageError) -> Self {
        SegbaseError::storage(err.to_string())
    }
}
