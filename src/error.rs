//! Error types for segbase.
//!
//! Every fallible operation in the crate returns [`Result`], whose error type
//! is [`SegbaseError`]. Contract violations on record sets (combining sets
//! from different databases, combining segments with different segment
//! numbers, using a closed record set) are reported through the dedicated
//! [`RecordsetError`], which converts into [`SegbaseError::Recordset`].
//!
//! # Examples
//!
//! ```
//! use segbase::error::{Result, SegbaseError};
//!
//! fn load_page(page_id: u32) -> Result<Vec<u8>> {
//!     Err(SegbaseError::corrupt(format!("page {page_id} missing")))
//! }
//!
//! assert!(load_page(7).is_err());
//! ```

use std::io;

use thiserror::Error;

/// Contract errors raised by segment and record set operations.
///
/// These signal a programming error in the caller and are never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordsetError {
    /// Two record sets built from different databases were combined.
    #[error("{operation}: record sets belong to different databases")]
    DatabaseMismatch { operation: &'static str },

    /// Two segments with different segment numbers were combined.
    #[error("{operation}: segment numbers differ ({left} and {right})")]
    SegmentMismatch {
        operation: &'static str,
        left: u32,
        right: u32,
    },

    /// The record set was closed, directly or by its database.
    #[error("record set is closed")]
    Closed,

    /// A record number does not fit the segment layout.
    #[error("record number {0} is out of range")]
    RecordOutOfRange(u64),
}

/// The main error type for segbase operations.
#[derive(Error, Debug)]
pub enum SegbaseError {
    /// I/O errors from the storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Record set contract errors.
    #[error("Recordset error: {0}")]
    Recordset(#[from] RecordsetError),

    /// Storage-related errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// Index-related errors (unknown index, bad key extraction)
    #[error("Index error: {0}")]
    Index(String),

    /// Invalid configuration
    #[error("Config error: {0}")]
    Config(String),

    /// Malformed persisted bytes: bad posting lengths, missing pages, checksum failures
    #[error("Corrupt data: {0}")]
    Corrupt(String),

    /// Invalid operation for the current database state
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error for other cases
    #[error("Error: {0}")]
    Other(String),

    /// Generic anyhow error
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
}

/// Result type alias for operations that may fail with SegbaseError.
pub type Result<T> = std::result::Result<T, SegbaseError>;

impl SegbaseError {
    /// Create a new storage error.
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        SegbaseError::Storage(msg.into())
    }

    /// Create a new index error.
    pub fn index<S: Into<String>>(msg: S) -> Self {
        SegbaseError::Index(msg.into())
    }

    /// Create a new configuration error.
    pub fn config<S: Into<String>>(msg: S) -> Self {
        SegbaseError::Config(msg.into())
    }

    /// Create a new corrupt data error.
    pub fn corrupt<S: Into<String>>(msg: S) -> Self {
        SegbaseError::Corrupt(msg.into())
    }

    /// Create a new invalid operation error.
    pub fn invalid_operation<S: Into<String>>(msg: S) -> Self {
        SegbaseError::InvalidOperation(msg.into())
    }

    /// Create a new generic error.
    pub fn other<S: Into<String>>(msg: S) -> Self {
        SegbaseError::Other(msg.into())
    }

    /// The record set contract error, if this is one.
    pub fn as_recordset_error(&self) -> Option<&RecordsetError> {
        match self {
            SegbaseError::Recordset(err) => Some(err),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_construction() {
        let error = SegbaseError::storage("Test storage error");
        assert_eq!(error.to_string(), "Storage error: Test storage error");

        let error = SegbaseError::index("Test index error");
        assert_eq!(error.to_string(), "Index error: Test index error");

        let error = SegbaseError::config("width too large");
        assert_eq!(error.to_string(), "Config error: width too large");

        let error = SegbaseError::corrupt("bad magic");
        assert_eq!(error.to_string(), "Corrupt data: bad magic");
    }

    #[test]
    fn test_recordset_error_conversion() {
        let error: SegbaseError = RecordsetError::SegmentMismatch {
            operation: "or",
            left: 1,
            right: 2,
        }
        .into();
        assert_eq!(
            error.to_string(),
            "Recordset error: or: segment numbers differ (1 and 2)"
        );
        assert_eq!(
            error.as_recordset_error(),
            Some(&RecordsetError::SegmentMismatch {
                operation: "or",
                left: 1,
                right: 2
            })
        );

        let error: SegbaseError = RecordsetError::Closed.into();
        assert!(matches!(
            error,
            SegbaseError::Recordset(RecordsetError::Closed)
        ));
    }

    #[test]
    fn test_error_from_io() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "File not found");
        let error = SegbaseError::from(io_error);

        match error {
            SegbaseError::Io(_) => {} // Expected
            _ => panic!("Expected IO error"),
        }
        assert!(SegbaseError::other("x").as_recordset_error().is_none());
    }
}
