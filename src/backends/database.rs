//! Records in an embedded B-tree database (`redb`).
//!
//! The control file tags these stores `BerkeleyDB`. Writes commit with
//! eventual durability; `sync` and `flush` commit with immediate durability,
//! which also makes every earlier commit durable.
//!
//! The engine locks its file exclusively, so only one handle, read-only or
//! not, can have a database store open at a time.

use super::borrow_bound;
use crate::control::Control;
use crate::error::{Result, StoreError};
use crate::store::RecordStore;
use crate::types::{validate_key, Cursor, Kind, Mode, Record};
use redb::{Database, DatabaseError, Durability, ReadableTable, TableDefinition, WriteTransaction};
use std::fs;
use std::ops::Bound;
use std::path::Path;

const DB_FILE: &str = "records.redb";

/// Table holding every record.
const RECORDS: TableDefinition<&str, &[u8]> = TableDefinition::new("records");

/// Store backed by a single `redb` file.
pub struct DatabaseRecordStore {
    control: Control,
    db: Database,

    /// Lower bound of the next key to sequence.
    cursor: Bound<String>,
}

impl DatabaseRecordStore {
    pub fn create(path: &Path, description: &str) -> Result<Self> {
        let control = Control::create(path, Kind::Database, description)?;
        let db = Database::create(path.join(DB_FILE))?;

        let mut w = db.begin_write()?;
        w.set_durability(Durability::Immediate);
        w.open_table(RECORDS)?;
        w.commit()?;

        Ok(Self {
            control,
            db,
            cursor: Bound::Unbounded,
        })
    }

    pub fn open(path: &Path, mode: Mode) -> Result<Self> {
        let control = Control::open(path, mode, Kind::Database)?;

        let db_path = path.join(DB_FILE);
        if !db_path.exists() {
            return Err(StoreError::Strategy(format!(
                "{} is missing its database file",
                path.display()
            )));
        }
        let db = match Database::open(&db_path) {
            Ok(db) => db,
            Err(DatabaseError::DatabaseAlreadyOpen) => {
                return Err(StoreError::Locked(path.to_path_buf()))
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            control,
            db,
            cursor: Bound::Unbounded,
        })
    }

    fn begin_write(&self) -> Result<WriteTransaction> {
        let mut w = self.db.begin_write()?;
        w.set_durability(Durability::Eventual);
        Ok(w)
    }

    /// Commit an empty transaction with immediate durability.
    fn make_durable(&self) -> Result<()> {
        let mut w = self.db.begin_write()?;
        w.set_durability(Durability::Immediate);
        w.commit()?;
        Ok(())
    }

    /// Write `data` under `key`, requiring the key to be absent (`insert`)
    /// or present (`replace`).
    fn put(&mut self, key: &str, data: &[u8], must_exist: bool) -> Result<()> {
        let w = self.begin_write()?;
        let existed = {
            let mut table = w.open_table(RECORDS)?;
            let existed = table.get(key)?.is_some();
            if existed == must_exist {
                table.insert(key, data)?;
            }
            existed
        };

        if existed != must_exist {
            w.abort()?;
            return Err(if existed {
                StoreError::duplicate_key(key)
            } else {
                StoreError::missing_key(key)
            });
        }
        w.commit()?;
        Ok(())
    }

    fn with_value<T>(&self, key: &str, f: impl FnOnce(&[u8]) -> T) -> Result<T> {
        let r = self.db.begin_read()?;
        let table = r.open_table(RECORDS)?;
        let result = match table.get(key)? {
            Some(guard) => Ok(f(guard.value())),
            None => Err(StoreError::missing_key(key)),
        };
        result
    }
}

impl RecordStore for DatabaseRecordStore {
    fn kind(&self) -> Kind {
        Kind::Database
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
        Ok(fs::metadata(self.control.path().join(DB_FILE))?.len())
    }

    fn insert(&mut self, key: &str, data: &[u8]) -> Result<()> {
        self.control.check_writable()?;
        validate_key(key)?;
        self.put(key, data, false)?;
        self.control.increment()
    }

    fn replace(&mut self, key: &str, data: &[u8]) -> Result<()> {
        self.control.check_writable()?;
        self.put(key, data, true)
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        self.control.check_writable()?;

        let w = self.begin_write()?;
        let removed = {
            let mut table = w.open_table(RECORDS)?;
            let removed = table.remove(key)?.is_some();
            removed
        };
        if !removed {
            w.abort()?;
            return Err(StoreError::missing_key(key));
        }
        w.commit()?;
        self.control.decrement()
    }

    fn read(&self, key: &str) -> Result<Vec<u8>> {
        self.with_value(key, |data| data.to_vec())
    }

    fn length(&self, key: &str) -> Result<u64> {
        self.with_value(key, |data| data.len() as u64)
    }

    fn contains_key(&self, key: &str) -> Result<bool> {
        let r = self.db.begin_read()?;
        let table = r.open_table(RECORDS)?;
        let found = table.get(key)?.is_some();
        Ok(found)
    }

    fn flush(&mut self, key: &str) -> Result<()> {
        if !self.contains_key(key)? {
            return Err(StoreError::missing_key(key));
        }
        if self.control.mode() == Mode::ReadWrite {
            self.make_durable()?;
        }
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        if self.control.mode() == Mode::ReadWrite {
            self.make_durable()?;
        }
        self.control.sync()
    }

    fn sequence(&mut self, cursor: Cursor) -> Result<Option<Record>> {
        if cursor == Cursor::Start {
            self.cursor = Bound::Unbounded;
        }

        let next = {
            let r = self.db.begin_read()?;
            let table = r.open_table(RECORDS)?;
            let mut range = table.range::<&str>((borrow_bound(&self.cursor), Bound::Unbounded))?;
            let record = match range.next() {
                Some(entry) => {
                    let (k, v) = entry?;
                    Some(Record::new(k.value(), v.value()))
                }
                None => None,
            };
            record
        };

        if let Some(record) = &next {
            self.cursor = Bound::Excluded(record.key.clone());
        }
        Ok(next)
    }

    fn set_cursor_at_key(&mut self, key: &str) -> Result<()> {
        if !self.contains_key(key)? {
            return Err(StoreError::missing_key(key));
        }
        self.cursor = Bound::Included(key.to_string());
        Ok(())
    }

    fn move_to(&mut self, new_path: &Path) -> Result<()> {
        self.control.relocate(new_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_key_order_and_tag() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("db");
        let mut store = DatabaseRecordStore::create(&path, "").unwrap();
        for key in ["pear", "apple", "fig"] {
            store.insert(key, key.as_bytes()).unwrap();
        }

        let mut keys = Vec::new();
        let mut cursor = Cursor::Start;
        while let Some(record) = store.sequence(cursor).unwrap() {
            assert_eq!(record.data, record.key.as_bytes());
            keys.push(record.key);
            cursor = Cursor::Next;
        }
        assert_eq!(keys, vec!["apple", "fig", "pear"]);
        assert_eq!(crate::control::read_kind(&path).unwrap(), Kind::Database);
    }

    #[test]
    fn test_failed_writes_leave_no_trace() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("db");
        {
            let mut store = DatabaseRecordStore::create(&path, "").unwrap();
            store.insert("a", b"1").unwrap();
            assert!(matches!(store.insert("a", b"2"), Err(StoreError::ObjectExists(_))));
            assert!(matches!(store.replace("b", b"2"), Err(StoreError::ObjectDoesNotExist(_))));
            assert!(matches!(store.remove("b"), Err(StoreError::ObjectDoesNotExist(_))));
            store.sync().unwrap();
        }

        let store = DatabaseRecordStore::open(&path, Mode::ReadOnly).unwrap();
        assert_eq!(store.count(), 1);
        assert_eq!(store.read("a").unwrap(), b"1");
        assert!(!store.contains_key("b").unwrap());
    }

    #[test]
    fn test_second_open_is_locked() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("db");
        let _store = DatabaseRecordStore::create(&path, "").unwrap();

        assert!(matches!(
            DatabaseRecordStore::open(&path, Mode::ReadOnly),
            Err(StoreError::Locked(_))
        ));
    }
}
