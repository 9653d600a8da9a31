//! # Record Store
//!
//! Interchangeable on-disk stores of keyed, opaque byte records.
//!
//! ## Core Concepts
//!
//! - **Record stores**: Directories holding records behind one interface,
//!   [`RecordStore`], whatever the backend
//! - **Backends**: One file per record, an append-only archive, an embedded
//!   key/value database or an SQLite table
//! - **Control file**: Every store describes itself (kind, description,
//!   count) in a properties file, so stores are opened by path alone
//! - **Views**: A compression decorator over another backend, and list views
//!   exposing a subset of another store's keys
//! - **Tooling**: Merging stores, re-keying records by digest with hash
//!   translation, importing files and comparing stores
//!
//! ## Example
//!
//! ```ignore
//! use recstore::{create_record_store, open_record_store, Kind, Mode, StoreConfig};
//!
//! let mut store = create_record_store(
//!     &StoreConfig::new("./images", Kind::Archive).with_description("Test images"),
//! )?;
//! store.insert("face-001", &bytes)?;
//! drop(store);
//!
//! let mut store = open_record_store("./images", Mode::ReadOnly)?;
//! for record in store.records() {
//!     let record = record?;
//!     println!("{}: {} bytes", record.key, record.data.len());
//! }
//! ```

pub mod backends;
pub mod compressed;
pub mod control;
pub mod error;
pub mod hashing;
pub mod list;
pub mod merge;
pub mod ordered_set;
pub mod properties;
pub mod store;
pub mod tools;
pub mod types;

// Re-exports
pub use backends::{
    ArchiveRecordStore, DatabaseRecordStore, FileRecordStore, SqliteRecordStore, VacuumStats,
};
pub use compressed::CompressedRecordStore;
pub use control::read_kind;
pub use error::{ErrorKind, Result, StoreError};
pub use hashing::{HashSubject, KeyFormat, KeyHasher};
pub use list::{is_list_record_store, KeyListUpdate, ListRecordStore};
pub use merge::{
    merge, merge_and_hash_record_stores, merge_record_stores, DuplicatePolicy, MergeConfig,
    MergeReport,
};
pub use ordered_set::OrderedSet;
pub use properties::Properties;
pub use store::{
    create_record_store, open_record_store, remove_record_store, ArchiveOptions, RecordStore,
    Records, StoreConfig,
};
pub use types::*;
