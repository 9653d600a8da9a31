//! One file per record.
//!
//! Records live under `<store>/records/<key>`. Keys are kept in memory in
//! sorted order, so sequencing returns records in lexicographic key order.

use super::borrow_bound;
use crate::control::Control;
use crate::error::{Result, StoreError};
use crate::properties::sync_dir;
use crate::store::RecordStore;
use crate::types::{validate_key, Cursor, Kind, Mode, Record};
use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::Write;
use std::ops::Bound;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::warn;

/// Directory holding record files.
const RECORDS_DIR: &str = "records";

/// Store keeping each record in its own file.
pub struct FileRecordStore {
    control: Control,

    /// Every key present in `records/`.
    keys: BTreeSet<String>,

    /// Lower bound of the next key to sequence.
    cursor: Bound<String>,
}

impl FileRecordStore {
    pub fn create(path: &Path, description: &str) -> Result<Self> {
        let control = Control::create(path, Kind::File, description)?;
        fs::create_dir(path.join(RECORDS_DIR))?;
        sync_dir(path)?;

        Ok(Self {
            control,
            keys: BTreeSet::new(),
            cursor: Bound::Unbounded,
        })
    }

    pub fn open(path: &Path, mode: Mode) -> Result<Self> {
        let mut control = Control::open(path, mode, Kind::File)?;

        let mut keys = BTreeSet::new();
        for entry in fs::read_dir(path.join(RECORDS_DIR))? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                keys.insert(entry.file_name().to_string_lossy().into_owned());
            }
        }

        let found = keys.len() as u64;
        if found != control.count() {
            warn!(
                path = %path.display(),
                recorded = control.count(),
                found,
                "record count disagrees with records on disk"
            );
            if mode == Mode::ReadWrite {
                control.set_count(found)?;
            }
        }

        Ok(Self {
            control,
            keys,
            cursor: Bound::Unbounded,
        })
    }

    fn records_dir(&self) -> PathBuf {
        self.control.path().join(RECORDS_DIR)
    }

    fn record_path(&self, key: &str) -> PathBuf {
        self.records_dir().join(key)
    }

    fn require(&self, key: &str) -> Result<()> {
        if self.keys.contains(key) {
            Ok(())
        } else {
            Err(StoreError::missing_key(key))
        }
    }

    /// Write a record file whole: stage next to `records/`, then rename.
    fn write_record(&self, key: &str, data: &[u8]) -> Result<()> {
        let mut staged = NamedTempFile::new_in(self.control.path())?;
        staged.write_all(data)?;
        staged.persist(self.record_path(key))?;
        Ok(())
    }
}

impl RecordStore for FileRecordStore {
    fn kind(&self) -> Kind {
        Kind::File
    }

    fn pathname(&self) -> &Path {
        self.control.path()
    }

    fn mode(&self) -> Mode {
        self.control.mode()
    }

    fn description(&self) -> &str {
        self.control.description()
    }

    fn change_description(&mut self, description: &str) -> Result<()> {
        self.control.set_description(description)
    }

    fn count(&self) -> u64 {
        self.control.count()
    }

    fn space_used(&self) -> Result<u64> {
        let mut total = 0;
        for key in &self.keys {
            total += allocated_bytes(&fs::metadata(self.record_path(key))?);
        }
        Ok(total)
    }

    fn insert(&mut self, key: &str, data: &[u8]) -> Result<()> {
        self.control.check_writable()?;
        validate_key(key)?;
        if self.keys.contains(key) {
            return Err(StoreError::duplicate_key(key));
        }

        self.write_record(key, data)?;
        self.keys.insert(key.to_string());
        self.control.increment()
    }

    fn replace(&mut self, key: &str, data: &[u8]) -> Result<()> {
        self.control.check_writable()?;
        self.require(key)?;
        self.write_record(key, data)
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        self.control.check_writable()?;
        self.require(key)?;

        fs::remove_file(self.record_path(key))?;
        self.keys.remove(key);
        self.control.decrement()
    }

    fn read(&self, key: &str) -> Result<Vec<u8>> {
        self.require(key)?;
        Ok(fs::read(self.record_path(key))?)
    }

    fn length(&self, key: &str) -> Result<u64> {
        self.require(key)?;
        Ok(fs::metadata(self.record_path(key))?.len())
    }

    fn contains_key(&self, key: &str) -> Result<bool> {
        Ok(self.keys.contains(key))
    }

    fn flush(&mut self, key: &str) -> Result<()> {
        self.require(key)?;
        File::open(self.record_path(key))?.sync_all()?;
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        if self.control.mode() == Mode::ReadWrite {
            for key in &self.keys {
                File::open(self.record_path(key))?.sync_all()?;
            }
            sync_dir(&self.records_dir())?;
        }
        self.control.sync()
    }

    fn sequence(&mut self, cursor: Cursor) -> Result<Option<Record>> {
        match self.sequence_key(cursor)? {
            Some(key) => {
                let data = fs::read(self.record_path(&key))?;
                Ok(Some(Record { key, data }))
            }
            None => Ok(None),
        }
    }

    fn sequence_key(&mut self, cursor: Cursor) -> Result<Option<String>> {
        if cursor == Cursor::Start {
            self.cursor = Bound::Unbounded;
        }
        let next = self
            .keys
            .range::<str, _>((borrow_bound(&self.cursor), Bound::Unbounded))
            .next()
            .cloned();

        if let Some(key) = &next {
            self.cursor = Bound::Excluded(key.clone());
        }
        Ok(next)
    }

    fn set_cursor_at_key(&mut self, key: &str) -> Result<()> {
        self.require(key)?;
        self.cursor = Bound::Included(key.to_string());
        Ok(())
    }

    fn move_to(&mut self, new_path: &Path) -> Result<()> {
        self.control.relocate(new_path)
    }
}

/// Bytes the filesystem allocated for a file.
#[cfg(unix)]
fn allocated_bytes(metadata: &fs::Metadata) -> u64 {
    use std::os::unix::fs::MetadataExt;
    metadata.blocks() * 512
}

#[cfg(not(unix))]
fn allocated_bytes(metadata: &fs::Metadata) -> u64 {
    metadata.len()
}
