//! Open record set registry.
//!
//! A database keeps one registry. Every [`Recordset`](crate::recordset::Recordset)
//! created for the database registers a shared link here and holds only a
//! `Weak` to the registry, so neither side keeps the other alive. Closing the
//! database marks every registered link closed; each record set notices on
//! its next use and drops its segments.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use ahash::AHashMap;
use log::debug;
use parking_lot::Mutex;

/// Identity of one open database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DatabaseId(u64);

impl DatabaseId {
    /// A process-unique identity.
    pub fn allocate() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        DatabaseId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Identity of one record set within its registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordsetId(u64);

/// State shared between a record set and the registry.
#[derive(Debug, Default)]
pub(crate) struct RecordsetLink {
    closed: AtomicBool,
    cursors: AtomicUsize,
}

impl RecordsetLink {
    pub(crate) fn closed() -> Self {
        RecordsetLink {
            closed: AtomicBool::new(true),
            cursors: AtomicUsize::new(0),
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub(crate) fn cursor_opened(&self) {
        self.cursors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn cursor_closed(&self) {
        self.cursors.fetch_sub(1, Ordering::Relaxed);
    }

    pub(crate) fn cursor_count(&self) -> usize {
        self.cursors.load(Ordering::Relaxed)
    }
}

/// Identity-keyed table of the record sets open on one database.
#[derive(Debug)]
pub struct RecordsetRegistry {
    database: DatabaseId,
    next_id: AtomicU64,
    open: Mutex<AHashMap<RecordsetId, Weak<RecordsetLink>>>,
}

impl RecordsetRegistry {
    pub fn new(database: DatabaseId) -> Arc<Self> {
        Arc::new(RecordsetRegistry {
            database,
            next_id: AtomicU64::new(1),
            open: Mutex::new(AHashMap::new()),
        })
    }

    /// The database this registry belongs to.
    pub fn database(&self) -> DatabaseId {
        self.database
    }

    pub(crate) fn register(&self) -> (RecordsetId, Arc<RecordsetLink>) {
        let id = RecordsetId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let link = Arc::new(RecordsetLink::default());
        self.open.lock().insert(id, Arc::downgrade(&link));
        (id, link)
    }

    pub(crate) fn deregister(&self, id: RecordsetId) {
        self.open.lock().remove(&id);
    }

    /// Number of record sets still registered and alive.
    pub fn open_count(&self) -> usize {
        let mut open = self.open.lock();
        open.retain(|_, link| link.strong_count() > 0);
        open.len()
    }

    /// Close every registered record set and empty the registry.
    ///
    /// Returns how many live record sets were closed.
    pub fn close_all(&self) -> usize {
        let drained: Vec<Weak<RecordsetLink>> = self.open.lock().drain().map(|(_, link)| link).collect();
        let mut closed = 0;
        for link in drained.iter().filter_map(Weak::upgrade) {
            if link.cursor_count() > 0 {
                debug!("closing record set with {} open cursors", link.cursor_count());
            }
            link.close();
            closed += 1;
        }
        debug!("closed {closed} record sets on {:?}", self.database);
        closed
    }
}
