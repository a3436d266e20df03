//! On-disk posting references.
//!
//! An index entry maps a key to one reference per segment. The reference
//! form is chosen by the segment's record count and told apart by length:
//!
//! | form   | layout                                   | bytes |
//! |--------|------------------------------------------|-------|
//! | record | segment (4) ‖ offset (2)                 | 6     |
//! | list   | segment (4) ‖ count (2) ‖ list page (4)  | 10    |
//! | bitmap | segment (4) ‖ count (3) ‖ bitmap page (4)| 11    |
//!
//! All fields are big-endian, so encoded references sort by segment number.

use byteorder::{BigEndian, ByteOrder};

use crate::error::{Result, SegbaseError};
use crate::segment::SegmentKind;

pub const RECORD_REFERENCE_LEN: usize = 6;
pub const LIST_REFERENCE_LEN: usize = 10;
pub const BITMAP_REFERENCE_LEN: usize = 11;

/// Where one segment of a key's posting list lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PostingReference {
    /// A single record stored inline.
    Record { segment_number: u32, offset: u16 },
    /// Records stored as an offset list on a list page.
    List {
        segment_number: u32,
        count: u16,
        page_id: u32,
    },
    /// Records stored as a bitmap on a bitmap page.
    Bitmap {
        segment_number: u32,
        count: u32,
        page_id: u32,
    },
}

impl PostingReference {
    pub fn segment_number(&self) -> u32 {
        match *self {
            PostingReference::Record { segment_number, .. }
            | PostingReference::List { segment_number, .. }
            | PostingReference::Bitmap { segment_number, .. } => segment_number,
        }
    }

    /// Number of records referenced.
    pub fn count(&self) -> usize {
        match *self {
            PostingReference::Record { .. } => 1,
            PostingReference::List { count, .. } => usize::from(count),
            PostingReference::Bitmap { count, .. } => count as usize,
        }
    }

    /// The page holding the records, if not inline.
    pub fn page_id(&self) -> Option<u32> {
        match *self {
            PostingReference::Record { .. } => None,
            PostingReference::List { page_id, .. } | PostingReference::Bitmap { page_id, .. } => {
                Some(page_id)
            }
        }
    }

    /// The segment encoding this reference decodes to.
    pub fn kind(&self) -> SegmentKind {
        match self {
            PostingReference::Record { .. } => SegmentKind::Int,
            PostingReference::List { .. } => SegmentKind::List,
            PostingReference::Bitmap { .. } => SegmentKind::Bitarray,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        match *self {
            PostingReference::Record {
                segment_number,
                offset,
            } => {
                let mut bytes = vec![0u8; RECORD_REFERENCE_LEN];
                BigEndian::write_u32(&mut bytes[..4], segment_number);
                BigEndian::write_u16(&mut bytes[4..], offset);
                bytes
            }
            PostingReference::List {
                segment_number,
                count,
                page_id,
            } => {
                let mut bytes = vec![0u8; LIST_REFERENCE_LEN];
                BigEndian::write_u32(&mut bytes[..4], segment_number);
                BigEndian::write_u16(&mut bytes[4..6], count);
                BigEndian::write_u32(&mut bytes[6..], page_id);
                bytes
            }
            PostingReference::Bitmap {
                segment_number,
                count,
                page_id,
            } => {
                let mut bytes = vec![0u8; BITMAP_REFERENCE_LEN];
                BigEndian::write_u32(&mut bytes[..4], segment_number);
                BigEndian::write_u24(&mut bytes[4..7], count);
                BigEndian::write_u32(&mut bytes[7..], page_id);
                bytes
            }
        }
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        match bytes.len() {
            RECORD_REFERENCE_LEN => Ok(PostingReference::Record {
                segment_number: BigEndian::read_u32(&bytes[..4]),
                offset: BigEndian::read_u16(&bytes[4..]),
            }),
            LIST_REFERENCE_LEN => Ok(PostingReference::List {
                segment_number: BigEndian::read_u32(&bytes[..4]),
                count: BigEndian::read_u16(&bytes[4..6]),
                page_id: BigEndian::read_u32(&bytes[6..]),
            }),
            BITMAP_REFERENCE_LEN => Ok(PostingReference::Bitmap {
                segment_number: BigEndian::read_u32(&bytes[..4]),
                count: BigEndian::read_u24(&bytes[4..7]),
                page_id: BigEndian::read_u32(&bytes[7..]),
            }),
            length => Err(SegbaseError::corrupt(format!(
                "posting reference has {length} bytes"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_layouts() {
        let record = PostingReference::Record {
            segment_number: 0x01020304,
            offset: 0x0506,
        };
        assert_eq!(record.encode(), vec![1, 2, 3, 4, 5, 6]);

        let list = PostingReference::List {
            segment_number: 1,
            count: 10,
            page_id: 0x0a0b0c0d,
        };
        assert_eq!(list.encode(), vec![0, 0, 0, 1, 0, 10, 0x0a, 0x0b, 0x0c, 0x0d]);

        let bitmap = PostingReference::Bitmap {
            segment_number: 2,
            count: 65536,
            page_id: 3,
        };
        assert_eq!(bitmap.encode(), vec![0, 0, 0, 2, 1, 0, 0, 0, 0, 0, 3]);

        for reference in [record, list, bitmap] {
            assert_eq!(PostingReference::decode(&reference.encode()).unwrap(), reference);
        }
    }

    #[test]
    fn test_reference_accessors() {
        let list = PostingReference::List {
            segment_number: 7,
            count: 12,
            page_id: 4,
        };
        assert_eq!(list.segment_number(), 7);
        assert_eq!(list.count(), 12);
        assert_eq!(list.page_id(), Some(4));
        assert_eq!(list.kind(), SegmentKind::List);

        let record = PostingReference::Record {
            segment_number: 7,
            offset: 3,
        };
        assert_eq!(record.count(), 1);
        assert_eq!(record.page_id(), None);
    }

    #[test]
    fn test_encoded_references_sort_by_segment() {
        let low = PostingReference::Bitmap {
            segment_number: 1,
            count: 900,
            page_id: 99,
        };
        let high = PostingReference::Record {
            segment_number: 256,
            offset: 0,
        };
        assert!(low.encode() < high.encode());
    }

    #[test]
    fn test_decode_rejects_bad_length() {
        assert!(PostingReference::decode(&[0; 7]).is_err());
        assert!(PostingReference::decode(&[]).is_err());
    }
}
