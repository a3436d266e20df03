//! Cursors over record sets.

use crate::recordset::Recordset;
use crate::segment::CursorEntry;

/// A forward/backward cursor over a [`Recordset`].
///
/// The cursor borrows the record set for its lifetime and is counted on the
/// record set while open. Navigation returns `None` at either end and after
/// the record set has been closed.
///
/// # Example
///
/// ```
/// use segbase::config::SegmentSize;
/// use segbase::recordset::{DatabaseId, Recordset, RecordsetRegistry};
///
/// let registry = RecordsetRegistry::new(DatabaseId::allocate());
/// let mut recordset = Recordset::new(&registry, SegmentSize::default());
/// recordset.place(3).unwrap();
/// recordset.place(9000).unwrap();
///
/// let mut cursor = recordset.cursor();
/// assert_eq!(cursor.first().unwrap().record_number, 3);
/// assert_eq!(cursor.next().unwrap().record_number, 9000);
/// assert!(cursor.next().is_none());
/// ```
#[derive(Debug)]
pub struct RecordsetCursor<'a> {
    recordset: &'a mut Recordset,
}

impl<'a> RecordsetCursor<'a> {
    pub(crate) fn new(recordset: &'a mut Recordset) -> Self {
        recordset.link().cursor_opened();
        RecordsetCursor { recordset }
    }

    pub fn first(&mut self) -> Option<CursorEntry> {
        self.recordset.first()
    }

    pub fn last(&mut self) -> Option<CursorEntry> {
        self.recordset.last()
    }

    pub fn next(&mut self) -> Option<CursorEntry> {
        self.recordset.next()
    }

    pub fn prev(&mut self) -> Option<CursorEntry> {
        self.recordset.prev()
    }

    pub fn current(&self) -> Option<CursorEntry> {
        self.recordset.current()
    }

    /// Position on `record_number` if present.
    pub fn setat(&mut self, record_number: u64) -> Option<CursorEntry> {
        self.recordset.setat(record_number)
    }

    /// Position on the lowest record at or above `record_number`.
    pub fn nearest(&mut self, record_number: u64) -> Option<CursorEntry> {
        self.recordset.nearest(record_number)
    }

    /// Number of records before `record_number`.
    pub fn get_position_of_record(&self, record_number: u64) -> usize {
        self.recordset.get_position_of_record_number(record_number)
    }

    /// Position on the record at `position` (negative counts from the end).
    pub fn get_record_at_position(&mut self, position: i64) -> Option<CursorEntry> {
        let record_number = self.recordset.get_record_number_at_position(position)?;
        self.recordset.setat(record_number)
    }

    pub fn count_records(&self) -> usize {
        self.recordset.count_records()
    }

    pub fn is_closed(&self) -> bool {
        self.recordset.is_closed()
    }

    /// Restart from before the first record.
    pub fn refresh(&mut self) {
        self.recordset.reset_position();
    }
}

impl Drop for RecordsetCursor<'_> {
    fn drop(&mut self) {
        self.recordset.link().cursor_closed();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SegmentSize;
    use crate::recordset::{DatabaseId, RecordsetRegistry};

    #[test]
    fn test_cursor_navigation() {
        let registry = RecordsetRegistry::new(DatabaseId::allocate());
        let mut recordset = Recordset::new(&registry, SegmentSize::default());
        for record in [4, 8, 8192, 8200] {
            recordset.place(record).unwrap();
        }

        let mut cursor = recordset.cursor();
        assert_eq!(cursor.count_records(), 4);
        assert_eq!(cursor.last().unwrap().record_number, 8200);
        assert_eq!(cursor.prev().unwrap().record_number, 8192);
        assert_eq!(cursor.get_position_of_record(8192), 2);
        assert_eq!(cursor.get_record_at_position(1).unwrap().record_number, 8);
        assert_eq!(cursor.next().unwrap().record_number, 8192);
        assert_eq!(cursor.get_record_at_position(-4).unwrap().record_number, 4);
        assert_eq!(cursor.nearest(9).unwrap().record_number, 8192);
        assert_eq!(cursor.current().unwrap().record_number, 8192);

        cursor.refresh();
        assert!(cursor.current().is_none());
        assert_eq!(cursor.next().unwrap().record_number, 4);
    }

    #[test]
    fn test_cursor_is_counted() {
        let registry = RecordsetRegistry::new(DatabaseId::allocate());
        let mut recordset = Recordset::new(&registry, SegmentSize::default());

        {
            let cursor = recordset.cursor();
            assert!(!cursor.is_closed());
            assert_eq!(cursor.recordset.open_cursor_count(), 1);
        }
        assert_eq!(recordset.open_cursor_count(), 0);
    }

    #[test]
    fn test_cursor_after_database_teardown() {
        let registry = RecordsetRegistry::new(DatabaseId::allocate());
        let mut recordset = Recordset::new(&registry, SegmentSize::default());
        recordset.place(1).unwrap();

        let mut cursor = recordset.cursor();
        registry.close_all();
        assert!(cursor.is_closed());
        assert!(cursor.first().is_none());
        assert_eq!(cursor.count_records(), 0);
    }
}
