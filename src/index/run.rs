//! Sorted run files.
//!
//! A run is a stream of `(key, value)` records in ascending order, framed by
//! [`StructWriter`] so every run carries a magic tag and checksum. The main
//! index and each deferred-update store are persisted as runs, which lets
//! the final merge read every source the same way.

use std::collections::VecDeque;

use crate::error::{Result, SegbaseError};
use crate::storage::structured::{StructReader, StructWriter};
use crate::storage::{Storage, StorageInput, StorageOutput};

const RUN_MAGIC: &[u8; 4] = b"SBRN";
const RECORD_MARKER: u8 = 1;
const END_MARKER: u8 = 0;

/// One run record.
pub type RunRecord = (Vec<u8>, Vec<u8>);

/// Writes records in ascending `(key, value)` order.
pub struct RunWriter {
    name: String,
    writer: StructWriter<Box<dyn StorageOutput>>,
    last: Option<RunRecord>,
    count: u64,
}

impl RunWriter {
    pub fn create(storage: &dyn Storage, name: &str) -> Result<Self> {
        Ok(RunWriter {
            name: name.to_string(),
            writer: StructWriter::new(storage.create_output(name)?, RUN_MAGIC)?,
            last: None,
            count: 0,
        })
    }

    /// Append a record; it must not sort before the previous one.
    pub fn append(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        if let Some((last_key, last_value)) = &self.last {
            if (key, value) < (last_key.as_slice(), last_value.as_slice()) {
                return Err(SegbaseError::index(format!(
                    "run {} written out of order",
                    self.name
                )));
            }
        }
        self.writer.write_u8(RECORD_MARKER)?;
        self.writer.write_bytes(key)?;
        self.writer.write_bytes(value)?;
        self.last = Some((key.to_vec(), value.to_vec()));
        self.count += 1;
        Ok(())
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// Write the trailer and close. Returns the number of records written.
    pub fn finish(mut self) -> Result<u64> {
        self.writer.write_u8(END_MARKER)?;
        self.writer.write_u64(self.count)?;
        self.writer.close()?;
        Ok(self.count)
    }
}

/// Reads a run written by [`RunWriter`].
pub struct RunReader {
    name: String,
    reader: Option<StructReader<Box<dyn StorageInput>>>,
    count: u64,
}

impl RunReader {
    pub fn open(storage: &dyn Storage, name: &str) -> Result<Self> {
        Ok(RunReader {
            name: name.to_string(),
            reader: Some(StructReader::new(storage.open_input(name)?, RUN_MAGIC)?),
            count: 0,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the trailer has been reached.
    pub fn is_exhausted(&self) -> bool {
        self.reader.is_none()
    }

    /// Read the next record, or `None` after the last one.
    ///
    /// Reaching the end checks the record count and checksum and closes
    /// the input.
    pub fn next_record(&mut self) -> Result<Option<RunRecord>> {
        let Some(reader) = self.reader.as_mut() else {
            return Ok(None);
        };
        match reader.read_u8()? {
            RECORD_MARKER => {
                let key = reader.read_bytes()?;
                let value = reader.read_bytes()?;
                self.count += 1;
                Ok(Some((key, value)))
            }
            END_MARKER => {
                let expected = reader.read_u64()?;
                if expected != self.count {
                    return Err(SegbaseError::corrupt(format!(
                        "run {} has {} records, trailer says {expected}",
                        self.name, self.count
                    )));
                }
                reader.verify_checksum()?;
                if let Some(reader) = self.reader.take() {
                    reader.close()?;
                }
                Ok(None)
            }
            marker => Err(SegbaseError::corrupt(format!(
                "run {} has bad record marker {marker}",
                self.name
            ))),
        }
    }

    /// Read ahead until `buffer` holds `limit` records or the run ends.
    pub fn fill(&mut self, buffer: &mut VecDeque<RunRecord>, limit: usize) -> Result<()> {
        while buffer.len() < limit {
            match self.next_record()? {
                Some(record) => buffer.push_back(record),
                None => break,
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for RunReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunReader")
            .field("name", &self.name)
            .field("count", &self.count)
            .field("exhausted", &self.is_exhausted())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStorage;

    #[test]
    fn test_write_and_read_run() {
        let storage = MemoryStorage::new();
        let mut writer = RunWriter::create(&storage, "run").unwrap();
        writer.append(b"a", b"1").unwrap();
        writer.append(b"a", b"2").unwrap();
        writer.append(b"b", b"").unwrap();
        assert_eq!(writer.finish().unwrap(), 3);

        let mut reader = RunReader::open(&storage, "run").unwrap();
        let mut buffer = VecDeque::new();
        reader.fill(&mut buffer, 2).unwrap();
        assert_eq!(buffer.len(), 2);
        assert!(!reader.is_exhausted());
        reader.fill(&mut buffer, 10).unwrap();
        assert_eq!(
            buffer.into_iter().collect::<Vec<_>>(),
            vec![
                (b"a".to_vec(), b"1".to_vec()),
                (b"a".to_vec(), b"2".to_vec()),
                (b"b".to_vec(), Vec::new()),
            ]
        );
        assert!(reader.is_exhausted());
        assert_eq!(reader.next_record().unwrap(), None);
    }

    #[test]
    fn test_out_of_order_append_fails() {
        let storage = MemoryStorage::new();
        let mut writer = RunWriter::create(&storage, "run").unwrap();
        writer.append(b"b", b"1").unwrap();
        assert!(writer.append(b"a", b"1").is_err());
        assert!(writer.append(b"b", b"0").is_err());
    }

    #[test]
    fn test_empty_run() {
        let storage = MemoryStorage::new();
        RunWriter::create(&storage, "empty").unwrap().finish().unwrap();
        let mut reader = RunReader::open(&storage, "empty").unwrap();
        assert_eq!(reader.next_record().unwrap(), None);
        assert!(reader.is_exhausted());
    }
}
