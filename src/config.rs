//! Database configuration.
//!
//! [`SegmentSize`] fixes the segment layout for one database: how many
//! record numbers a segment spans, the thresholds that choose between the
//! List and Bitarray encodings, and the read-ahead scale of the external
//! merge. It is `Copy` and is captured by value by every segment and record
//! set created for the database, so it never changes after open.
//!
//! [`DatabaseConfig`] is the serializable description of a whole database
//! and is stored next to the data as `segbase.json`.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SegbaseError};

/// Largest segment width representable with 2-byte offsets.
pub const MAX_SEGMENT_WIDTH: u32 = 1 << 16;

/// Segment layout and conversion thresholds.
///
/// # Example
///
/// ```
/// use segbase::config::SegmentSize;
///
/// let size = SegmentSize::default().with_upper_conversion_limit(400);
/// assert_eq!(size.segment_width(), 8192);
/// assert_eq!(size.upper_conversion_limit, 400);
/// assert!(size.lower_conversion_limit <= 400);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentSize {
    /// Bytes in one segment bitmap; the segment width is eight times this.
    pub segment_size_bytes: u32,

    /// A List holding more records than this is promoted to a Bitarray.
    pub upper_conversion_limit: u32,

    /// A Bitarray shrinking to this many records or fewer may be demoted
    /// when normalizing with the lower limit.
    pub lower_conversion_limit: u32,

    /// Records held in memory across all sources during the external merge.
    pub segment_sort_scale: u32,
}

impl Default for SegmentSize {
    fn default() -> Self {
        SegmentSize::with_segment_size_bytes(1024)
    }
}

impl SegmentSize {
    /// Layout for the given bitmap size with thresholds derived from it.
    ///
    /// A List page stays smaller than a Bitmap page: the upper limit is one
    /// less than half the bitmap byte count (two bytes per offset), and the
    /// lower limit sits 5% below it.
    pub fn with_segment_size_bytes(segment_size_bytes: u32) -> Self {
        let upper = (segment_size_bytes / 2).saturating_sub(1).max(1);
        SegmentSize {
            segment_size_bytes,
            upper_conversion_limit: upper,
            lower_conversion_limit: upper - upper / 20,
            segment_sort_scale: 65536,
        }
    }

    /// Set the upper limit, pulling the lower limit down if needed.
    pub fn with_upper_conversion_limit(mut self, limit: u32) -> Self {
        self.upper_conversion_limit = limit;
        self.lower_conversion_limit = limit - limit / 20;
        self
    }

    /// Set the lower limit.
    pub fn with_lower_conversion_limit(mut self, limit: u32) -> Self {
        self.lower_conversion_limit = limit;
        self
    }

    /// Set the merge read-ahead scale.
    pub fn with_segment_sort_scale(mut self, scale: u32) -> Self {
        self.segment_sort_scale = scale;
        self
    }

    /// Number of record numbers spanned by one segment.
    pub fn segment_width(&self) -> u32 {
        self.segment_size_bytes * 8
    }

    /// Byte length of a serialized Bitarray segment.
    pub fn empty_bitarray_bytes(&self) -> usize {
        self.segment_size_bytes as usize
    }

    /// Split a record number into segment number and offset.
    pub fn split(&self, record_number: u64) -> (u32, u16) {
        let width = u64::from(self.segment_width());
        ((record_number / width) as u32, (record_number % width) as u16)
    }

    /// Inverse of [`SegmentSize::split`].
    pub fn join(&self, segment_number: u32, offset: u16) -> u64 {
        u64::from(segment_number) * u64::from(self.segment_width()) + u64::from(offset)
    }

    /// Highest record number addressable with 4-byte segment numbers.
    pub fn max_record_number(&self) -> u64 {
        self.join(u32::MAX, (self.segment_width() - 1) as u16)
    }

    /// Check the layout is usable.
    pub fn validate(&self) -> Result<()> {
        if self.segment_size_bytes == 0 {
            return Err(SegbaseError::config("segment_size_bytes must be positive"));
        }
        match self.segment_size_bytes.checked_mul(8) {
            Some(width) if width <= MAX_SEGMENT_WIDTH => {}
            _ => {
                return Err(SegbaseError::config(format!(
                    "segment_size_bytes {} gives a segment width above {MAX_SEGMENT_WIDTH}",
                    self.segment_size_bytes
                )));
            }
        }
        if self.upper_conversion_limit == 0 || self.upper_conversion_limit >= self.segment_width() {
            return Err(SegbaseError::config(format!(
                "upper_conversion_limit {} must be in 1..{}",
                self.upper_conversion_limit,
                self.segment_width()
            )));
        }
        if self.lower_conversion_limit > self.upper_conversion_limit {
            return Err(SegbaseError::config(format!(
                "lower_conversion_limit {} exceeds upper_conversion_limit {}",
                self.lower_conversion_limit, self.upper_conversion_limit
            )));
        }
        if self.segment_sort_scale == 0 {
            return Err(SegbaseError::config("segment_sort_scale must be positive"));
        }
        Ok(())
    }
}

/// A secondary index declared in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSpec {
    /// Index name, unique within the database.
    pub name: String,

    /// JSON field whose value is the index key. When absent the index needs
    /// an extractor registered in code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl IndexSpec {
    /// Index over a top-level JSON field of the same name.
    pub fn json_field<S: Into<String>>(name: S) -> Self {
        let name = name.into();
        IndexSpec {
            field: Some(name.clone()),
            name,
        }
    }
}

/// Serializable description of a database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database name, used as the file name prefix in storage.
    pub name: String,

    /// Segment layout.
    #[serde(default)]
    pub segment_size: SegmentSize,

    /// Offsets within a segment at which deferred updates are flushed, in
    /// addition to the last offset of each segment.
    #[serde(default)]
    pub deferred_update_points: Vec<u16>,

    /// Secondary indexes.
    #[serde(default)]
    pub indexes: Vec<IndexSpec>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            name: "segbase".to_string(),
            segment_size: SegmentSize::default(),
            deferred_update_points: Vec::new(),
            indexes: Vec::new(),
        }
    }
}

impl DatabaseConfig {
    /// Configuration with the given name and defaults elsewhere.
    pub fn new<S: Into<String>>(name: S) -> Self {
        DatabaseConfig {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Replace the segment layout.
    pub fn with_segment_size(mut self, segment_size: SegmentSize) -> Self {
        self.segment_size = segment_size;
        self
    }

    /// Add a secondary index.
    pub fn with_index(mut self, index: IndexSpec) -> Self {
        self.indexes.push(index);
        self
    }

    /// Replace the deferred update points.
    pub fn with_deferred_update_points(mut self, points: Vec<u16>) -> Self {
        self.deferred_update_points = points;
        self
    }

    /// Sorted, de-duplicated flush points. The last offset of a segment is
    /// always one of them.
    pub fn effective_deferred_update_points(&self) -> Vec<u16> {
        let mut points = self.deferred_update_points.clone();
        points.push((self.segment_size.segment_width() - 1) as u16);
        points.sort_unstable();
        points.dedup();
        points
    }

    /// Check the configuration is usable.
    pub fn validate(&self) -> Result<()> {
        self.segment_size.validate()?;
        if self.name.is_empty() {
            return Err(SegbaseError::config("database name must not be empty"));
        }
        let width = self.segment_size.segment_width();
        if let Some(point) = self
            .deferred_update_points
            .iter()
            .find(|&&point| u32::from(point) >= width)
        {
            return Err(SegbaseError::config(format!(
                "deferred update point {point} is outside segment width {width}"
            )));
        }
        let mut names: Vec<&str> = self.indexes.iter().map(|spec| spec.name.as_str()).collect();
        names.sort_unstable();
        if names.windows(2).any(|pair| pair[0] == pair[1]) {
            return Err(SegbaseError::config("index names must be unique"));
        }
        Ok(())
    }

    /// Parse a configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: DatabaseConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Load a configuration file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Write a configuration file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path, self.to_json()?)?;
        Ok(())
    }
}
