//! Checksummed binary framing for persisted structures.
//!
//! Every persisted blob starts with a 4-byte magic tag and ends with a CRC32
//! of everything before it. Integers are little-endian; byte strings carry a
//! `u32` length prefix.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use crc32fast::Hasher;

use crate::error::{Result, SegbaseError};
use crate::storage::{StorageInput, StorageOutput};

/// A structured writer for binary data.
pub struct StructWriter<W: StorageOutput> {
    writer: W,
    hasher: Hasher,
    position: u64,
}

impl<W: StorageOutput> StructWriter<W> {
    /// Create a writer and emit the magic tag.
    pub fn new(writer: W, magic: &[u8; 4]) -> Result<Self> {
        let mut writer = StructWriter {
            writer,
            hasher: Hasher::new(),
            position: 0,
        };
        writer.write_raw(magic)?;
        Ok(writer)
    }

    /// Write a u8 value.
    pub fn write_u8(&mut self, value: u8) -> Result<()> {
        self.writer.write_u8(value)?;
        self.track(&[value]);
        Ok(())
    }

    /// Write a u32 value (little-endian).
    pub fn write_u32(&mut self, value: u32) -> Result<()> {
        self.writer.write_u32::<LittleEndian>(value)?;
        self.track(&value.to_le_bytes());
        Ok(())
    }

    /// Write a u64 value (little-endian).
    pub fn write_u64(&mut self, value: u64) -> Result<()> {
        self.writer.write_u64::<LittleEndian>(value)?;
        self.track(&value.to_le_bytes());
        Ok(())
    }

    /// Write raw bytes with a u32 length prefix.
    pub fn write_bytes(&mut self, value: &[u8]) -> Result<()> {
        let length = u32::try_from(value.len())
            .map_err(|_| SegbaseError::storage("byte string longer than u32::MAX"))?;
        self.write_u32(length)?;
        self.write_raw(value)
    }

    /// Write raw bytes without length prefix.
    pub fn write_raw(&mut self, value: &[u8]) -> Result<()> {
        self.writer.write_all(value)?;
        self.track(value);
        Ok(())
    }

    /// Get current position.
    pub fn position(&self) -> u64 {
        self.position
    }

    fn track(&mut self, data: &[u8]) {
        self.hasher.update(data);
        self.position += data.len() as u64;
    }

    /// Write the checksum and close the output.
    pub fn close(mut self) -> Result<()> {
        let checksum = self.hasher.clone().finalize();
        self.writer.write_u32::<LittleEndian>(checksum)?;
        self.writer.flush_and_sync()?;
        self.writer.close()?;
        Ok(())
    }
}

/// A structured reader for binary data.
pub struct StructReader<R: StorageInput> {
    reader: R,
    hasher: Hasher,
    position: u64,
    file_size: u64,
}

impl<R: StorageInput> StructReader<R> {
    /// Create a reader and check the magic tag.
    pub fn new(reader: R, magic: &[u8; 4]) -> Result<Self> {
        let file_size = reader.size()?;
        if file_size < 8 {
            return Err(SegbaseError::corrupt("file too short for header and checksum"));
        }
        let mut reader = StructReader {
            reader,
            hasher: Hasher::new(),
            position: 0,
            file_size,
        };
        let found = reader.read_raw(4)?;
        if found.as_slice() != magic {
            return Err(SegbaseError::corrupt(format!(
                "bad magic {found:?}, expected {magic:?}"
            )));
        }
        Ok(reader)
    }

    /// Read a u8 value.
    pub fn read_u8(&mut self) -> Result<u8> {
        self.check_remaining(1)?;
        let value = self.reader.read_u8()?;
        self.track(&[value]);
        Ok(value)
    }

    /// Read a u32 value (little-endian).
    pub fn read_u32(&mut self) -> Result<u32> {
        self.check_remaining(4)?;
        let value = self.reader.read_u32::<LittleEndian>()?;
        self.track(&value.to_le_bytes());
        Ok(value)
    }

    /// Read a u64 value (little-endian).
    pub fn read_u64(&mut self) -> Result<u64> {
        self.check_remaining(8)?;
        let value = self.reader.read_u64::<LittleEndian>()?;
        self.track(&value.to_le_bytes());
        Ok(value)
    }

    /// Read bytes with a u32 length prefix.
    pub fn read_bytes(&mut self) -> Result<Vec<u8>> {
        let length = self.read_u32()? as usize;
        self.read_raw(length)
    }

    /// Read exact number of raw bytes.
    pub fn read_raw(&mut self, length: usize) -> Result<Vec<u8>> {
        self.check_remaining(length as u64)?;
        let mut bytes = vec![0u8; length];
        self.reader.read_exact(&mut bytes)?;
        self.track(&bytes);
        Ok(bytes)
    }

    /// Check if only the checksum remains.
    pub fn is_eof(&self) -> bool {
        self.position >= self.file_size.saturating_sub(4)
    }

    fn check_remaining(&self, length: u64) -> Result<()> {
        if self.position + length > self.file_size.saturating_sub(4) {
            return Err(SegbaseError::corrupt(format!(
                "read of {length} bytes at {} runs past end of data",
                self.position
            )));
        }
        Ok(())
    }

    fn track(&mut self, data: &[u8]) {
        self.hasher.update(data);
        self.position += data.len() as u64;
    }

    /// Read the trailing checksum and compare it with the data read.
    pub fn verify_checksum(&mut self) -> Result<()> {
        if !self.is_eof() {
            return Err(SegbaseError::corrupt("unread data before checksum"));
        }
        let stored = self.reader.read_u32::<LittleEndian>()?;
        let computed = self.hasher.clone().finalize();
        if stored != computed {
            return Err(SegbaseError::corrupt(format!(
                "checksum mismatch: stored {stored:#010x}, computed {computed:#010x}"
            )));
        }
        Ok(())
    }

    /// Close the reader.
    pub fn close(mut self) -> Result<()> {
        self.reader.close()
    }
}
