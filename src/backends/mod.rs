//! Concrete backends that physically hold record data.

mod archive;
mod database;
mod file;
mod sqlite;

pub use archive::{ArchiveRecordStore, VacuumStats};
pub use database::DatabaseRecordStore;
pub use file::FileRecordStore;
pub use sqlite::SqliteRecordStore;

use std::ops::Bound;

/// Borrow a cursor bound held as owned `String`.
pub(crate) fn borrow_bound(bound: &Bound<String>) -> Bound<&str> {
    match bound {
        Bound::Included(key) => Bound::Included(key.as_str()),
        Bound::Excluded(key) => Bound::Excluded(key.as_str()),
        Bound::Unbounded => Bound::Unbounded,
    }
}
