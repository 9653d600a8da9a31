//! The record store interface and the factory functions that create, open
//! and remove stores of any kind.

use crate::backends::{ArchiveRecordStore, DatabaseRecordStore, FileRecordStore, SqliteRecordStore};
use crate::compressed::CompressedRecordStore;
use crate::control;
use crate::error::{Result, StoreError};
use crate::list::ListRecordStore;
use crate::types::{CompressorKind, Cursor, Kind, Mode, Record};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A keyed collection of opaque byte records persisted on disk.
///
/// Every backend honors the same contract:
/// - keys are unique; `insert` of a present key fails with `ObjectExists`
/// - `read`, `length`, `replace`, `remove` and `flush` of an absent key
///   fail with `ObjectDoesNotExist`
/// - `count` tracks inserts and removes and survives reopening
/// - a read-only handle rejects every mutation
///
/// Sequencing walks the store with one cursor per handle. `Cursor::Start`
/// rewinds before fetching; `Ok(None)` marks exhaustion and repeats until
/// the cursor is rewound.
pub trait RecordStore: Send {
    /// Backend kind recorded in the control file.
    fn kind(&self) -> Kind;

    /// Directory holding the store.
    fn pathname(&self) -> &Path;

    fn mode(&self) -> Mode;

    fn description(&self) -> &str;

    fn change_description(&mut self, description: &str) -> Result<()>;

    /// Number of records.
    fn count(&self) -> u64;

    /// Bytes of disk the store occupies.
    fn space_used(&self) -> Result<u64>;

    fn insert(&mut self, key: &str, data: &[u8]) -> Result<()>;

    fn replace(&mut self, key: &str, data: &[u8]) -> Result<()>;

    fn remove(&mut self, key: &str) -> Result<()>;

    fn read(&self, key: &str) -> Result<Vec<u8>>;

    /// Length in bytes of the record stored under `key`.
    fn length(&self, key: &str) -> Result<u64>;

    fn contains_key(&self, key: &str) -> Result<bool>;

    /// Force the data of one record to stable storage.
    fn flush(&mut self, key: &str) -> Result<()>;

    /// Force all pending data and metadata to stable storage.
    fn sync(&mut self) -> Result<()>;

    /// Fetch the next record, or `None` once every record has been returned.
    fn sequence(&mut self, cursor: Cursor) -> Result<Option<Record>>;

    /// Like [`sequence`](RecordStore::sequence) without reading the data.
    fn sequence_key(&mut self, cursor: Cursor) -> Result<Option<String>> {
        Ok(self.sequence(cursor)?.map(|record| record.key))
    }

    /// Position the cursor so the next `sequence(Cursor::Next)` returns `key`.
    fn set_cursor_at_key(&mut self, key: &str) -> Result<()>;

    /// Relocate the store. Fails with `ObjectExists` if `new_path` exists.
    fn move_to(&mut self, new_path: &Path) -> Result<()>;
}

impl<'s> dyn RecordStore + 's {
    /// Iterate over every record from the start.
    ///
    /// The iterator rewinds the store's cursor when first polled.
    pub fn records(&mut self) -> Records<'_, 's> {
        Records {
            store: self,
            cursor: Cursor::Start,
            done: false,
        }
    }
}

/// Iterator over a full sequencing pass. See [`records`](trait.RecordStore.html#method.records).
pub struct Records<'a, 's> {
    store: &'a mut (dyn RecordStore + 's),
    cursor: Cursor,
    done: bool,
}

impl<'a, 's> Iterator for Records<'a, 's> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.store.sequence(self.cursor) {
            Ok(Some(record)) => {
                self.cursor = Cursor::Next;
                Some(Ok(record))
            }
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true; // Stop iteration on error
                Some(Err(e))
            }
        }
    }
}

/// Tuning for archive stores.
#[derive(Clone, Debug)]
pub struct ArchiveOptions {
    /// Sync the log every N appends (0 = every append).
    pub sync_interval: u64,

    /// Read cache size (number of records).
    pub cache_size: usize,
}

impl Default for ArchiveOptions {
    fn default() -> Self {
        Self {
            sync_interval: 100,
            cache_size: 1000,
        }
    }
}

/// Parameters for [`create_record_store`].
#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// Directory the store will occupy. Must not exist yet.
    pub path: PathBuf,

    /// Free text saved in the control file.
    pub description: String,

    /// Backend kind. With `compression` set this is the kind of the
    /// compressed store's inner stores.
    pub kind: Kind,

    /// Wrap the store in the compression decorator.
    pub compression: Option<CompressorKind>,

    /// Source store of a list view.
    pub source: Option<PathBuf>,

    /// Archive tuning, also applied to archive inner stores.
    pub archive: ArchiveOptions,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./store"),
            description: String::new(),
            kind: Kind::default(),
            compression: None,
            source: None,
            archive: ArchiveOptions::default(),
        }
    }
}

impl StoreConfig {
    pub fn new(path: impl Into<PathBuf>, kind: Kind) -> Self {
        Self {
            path: path.into(),
            kind,
            ..Self::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_compression(mut self, compressor: CompressorKind) -> Self {
        self.compression = Some(compressor);
        self
    }

    pub fn with_source(mut self, source: impl Into<PathBuf>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// Create a new store as described by `config`.
///
/// A failed create removes the directory it started, so the path can be
/// used again.
pub fn create_record_store(config: &StoreConfig) -> Result<Box<dyn RecordStore>> {
    control::create_or_discard(&config.path, || build_record_store(config))
}

fn build_record_store(config: &StoreConfig) -> Result<Box<dyn RecordStore>> {
    if let Some(compressor) = config.compression {
        return Ok(Box::new(CompressedRecordStore::create(
            config, config.kind, compressor,
        )?));
    }

    let path = config.path.as_path();
    let description = config.description.as_str();
    Ok(match config.kind {
        Kind::File => Box::new(FileRecordStore::create(path, description)?),
        Kind::Archive => Box::new(ArchiveRecordStore::create(path, description, &config.archive)?),
        Kind::Database => Box::new(DatabaseRecordStore::create(path, description)?),
        Kind::Sqlite => Box::new(SqliteRecordStore::create(path, description)?),
        Kind::List => {
            let source = config.source.as_deref().ok_or_else(|| {
                StoreError::Parameter("a list record store needs a source store".into())
            })?;
            Box::new(ListRecordStore::create(path, description, source)?)
        }
        Kind::Compressed => {
            return Err(StoreError::Parameter(
                "choose a compressor and an inner kind to create a compressed store".into(),
            ))
        }
    })
}

/// Open an existing store of any kind.
pub fn open_record_store(path: impl AsRef<Path>, mode: Mode) -> Result<Box<dyn RecordStore>> {
    let path = path.as_ref();
    Ok(match control::read_kind(path)? {
        Kind::File => Box::new(FileRecordStore::open(path, mode)?),
        Kind::Archive => Box::new(ArchiveRecordStore::open(path, mode, &ArchiveOptions::default())?),
        Kind::Database => Box::new(DatabaseRecordStore::open(path, mode)?),
        Kind::Sqlite => Box::new(SqliteRecordStore::open(path, mode)?),
        Kind::Compressed => Box::new(CompressedRecordStore::open(path, mode)?),
        Kind::List => Box::new(ListRecordStore::open(path, mode)?),
    })
}

/// Delete the store at `path` and every file backing it.
///
/// A list view's source is left untouched. Fails with `Locked` while a
/// read-write handle is open.
pub fn remove_record_store(path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    // Opening read-write takes the lock, so a store in use is never removed.
    drop(open_record_store(path, Mode::ReadWrite)?);
    fs::remove_dir_all(path)?;
    debug!(path = %path.display(), "removed record store");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_create_open_remove() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store");
        {
            let mut store =
                create_record_store(&StoreConfig::new(&path, Kind::File).with_description("d"))
                    .unwrap();
            store.insert("a", b"1").unwrap();
        }

        let store = open_record_store(&path, Mode::ReadOnly).unwrap();
        assert_eq!(store.kind(), Kind::File);
        assert_eq!(store.description(), "d");
        assert_eq!(store.count(), 1);
        drop(store);

        remove_record_store(&path).unwrap();
        assert!(!path.exists());
        assert!(matches!(
            remove_record_store(&path),
            Err(StoreError::ObjectDoesNotExist(_))
        ));
    }

    #[test]
    fn test_records_iterator() {
        let dir = TempDir::new().unwrap();
        let mut store =
            create_record_store(&StoreConfig::new(dir.path().join("s"), Kind::File)).unwrap();
        for key in ["b", "a", "c"] {
            store.insert(key, key.as_bytes()).unwrap();
        }

        let keys: Vec<String> = store.records().map(|r| r.unwrap().key).collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
        // A second pass rewinds.
        assert_eq!(store.records().count(), 3);
    }

    #[test]
    fn test_invalid_configs() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            create_record_store(&StoreConfig::new(dir.path().join("l"), Kind::List)),
            Err(StoreError::Parameter(_))
        ));
        assert!(matches!(
            create_record_store(&StoreConfig::new(dir.path().join("c"), Kind::Compressed)),
            Err(StoreError::Parameter(_))
        ));
        assert!(!dir.path().join("l").exists());
        assert!(!dir.path().join("c").exists());
    }
}
