//! Records in an SQLite table.
//!
//! One file, `records.sqlite`, with a single table:
//!
//! ```sql
//! CREATE TABLE RecordData (key TEXT PRIMARY KEY NOT NULL, value BLOB NOT NULL)
//! ```
//!
//! Sequencing follows rowid order, i.e. insertion order. `replace` updates in
//! place and keeps the record's position.

use crate::control::Control;
use crate::error::{Result, StoreError};
use crate::store::RecordStore;
use crate::types::{validate_key, Cursor, Kind, Mode, Record};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use std::fs;
use std::path::Path;

const DB_FILE: &str = "records.sqlite";

const SCHEMA: &str = "CREATE TABLE RecordData (
    key TEXT PRIMARY KEY NOT NULL,
    value BLOB NOT NULL
)";

/// Store backed by an SQLite database file.
pub struct SqliteRecordStore {
    control: Control,
    conn: Connection,

    /// Rowid of the last record returned by `sequence`.
    last_rowid: i64,
}

impl SqliteRecordStore {
    pub fn create(path: &Path, description: &str) -> Result<Self> {
        let control = Control::create(path, Kind::Sqlite, description)?;
        let conn = Connection::open(path.join(DB_FILE))?;
        conn.execute_batch(SCHEMA)?;

        Ok(Self {
            control,
            conn,
            last_rowid: 0,
        })
    }

    pub fn open(path: &Path, mode: Mode) -> Result<Self> {
        let control = Control::open(path, mode, Kind::Sqlite)?;
        let conn = connect(&path.join(DB_FILE), mode)?;

        Ok(Self {
            control,
            conn,
            last_rowid: 0,
        })
    }

    fn rowid_of(&self, key: &str) -> Result<Option<i64>> {
        Ok(self
            .conn
            .prepare_cached("SELECT rowid FROM RecordData WHERE key = ?1")?
            .query_row(params![key], |row| row.get(0))
            .optional()?)
    }
}

fn connect(db_path: &Path, mode: Mode) -> Result<Connection> {
    if !db_path.exists() {
        return Err(StoreError::Strategy(format!(
            "{} is missing",
            db_path.display()
        )));
    }
    let flags = match mode {
        Mode::ReadOnly => OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        Mode::ReadWrite => OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    };
    Ok(Connection::open_with_flags(db_path, flags)?)
}

impl RecordStore for SqliteRecordStore {
    fn kind(&self) -> Kind {
        Kind::Sqlite
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
        if self.rowid_of(key)?.is_some() {
            return Err(StoreError::duplicate_key(key));
        }

        self.conn
            .prepare_cached("INSERT INTO RecordData (key, value) VALUES (?1, ?2)")?
            .execute(params![key, data])?;
        self.control.increment()
    }

    fn replace(&mut self, key: &str, data: &[u8]) -> Result<()> {
        self.control.check_writable()?;
        let changed = self
            .conn
            .prepare_cached("UPDATE RecordData SET value = ?2 WHERE key = ?1")?
            .execute(params![key, data])?;
        if changed == 0 {
            return Err(StoreError::missing_key(key));
        }
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        self.control.check_writable()?;
        let changed = self
            .conn
            .prepare_cached("DELETE FROM RecordData WHERE key = ?1")?
            .execute(params![key])?;
        if changed == 0 {
            return Err(StoreError::missing_key(key));
        }
        self.control.decrement()
    }

    fn read(&self, key: &str) -> Result<Vec<u8>> {
        self.conn
            .prepare_cached("SELECT value FROM RecordData WHERE key = ?1")?
            .query_row(params![key], |row| row.get(0))
            .optional()?
            .ok_or_else(|| StoreError::missing_key(key))
    }

    fn length(&self, key: &str) -> Result<u64> {
        let length: Option<i64> = self
            .conn
            .prepare_cached("SELECT length(value) FROM RecordData WHERE key = ?1")?
            .query_row(params![key], |row| row.get(0))
            .optional()?;
        length
            .map(|n| n as u64)
            .ok_or_else(|| StoreError::missing_key(key))
    }

    fn contains_key(&self, key: &str) -> Result<bool> {
        Ok(self.rowid_of(key)?.is_some())
    }

    fn flush(&mut self, key: &str) -> Result<()> {
        // Every statement commits on its own, so a present record is already durable.
        if !self.contains_key(key)? {
            return Err(StoreError::missing_key(key));
        }
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        if self.control.mode() == Mode::ReadWrite {
            self.conn.cache_flush()?;
        }
        self.control.sync()
    }

    fn sequence(&mut self, cursor: Cursor) -> Result<Option<Record>> {
        if cursor == Cursor::Start {
            self.last_rowid = 0;
        }

        let next: Option<(i64, String, Vec<u8>)> = self
            .conn
            .prepare_cached(
                "SELECT rowid, key, value FROM RecordData WHERE rowid > ?1 ORDER BY rowid LIMIT 1",
            )?
            .query_row(params![self.last_rowid], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })
            .optional()?;

        Ok(next.map(|(rowid, key, data)| {
            self.last_rowid = rowid;
            Record { key, data }
        }))
    }

    fn set_cursor_at_key(&mut self, key: &str) -> Result<()> {
        let rowid = self
            .rowid_of(key)?
            .ok_or_else(|| StoreError::missing_key(key))?;
        self.last_rowid = rowid - 1;
        Ok(())
    }

    fn move_to(&mut self, new_path: &Path) -> Result<()> {
        self.control.relocate(new_path)?;
        // SQLite resolves journal files by name, so reconnect at the new path.
        self.conn = connect(&new_path.join(DB_FILE), self.control.mode())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn keys(store: &mut SqliteRecordStore) -> Vec<String> {
        let mut keys = Vec::new();
        let mut cursor = Cursor::Start;
        while let Some(key) = store.sequence_key(cursor).unwrap() {
            keys.push(key);
            cursor = Cursor::Next;
        }
        keys
    }

    #[test]
    fn test_insertion_order_survives_replace() {
        let dir = TempDir::new().unwrap();
        let mut store = SqliteRecordStore::create(&dir.path().join("sql"), "").unwrap();
        for key in ["z", "a", "m"] {
            store.insert(key, b"v").unwrap();
        }
        store.replace("z", b"updated").unwrap();

        assert_eq!(keys(&mut store), vec!["z", "a", "m"]);
        assert_eq!(store.read("z").unwrap(), b"updated");
        assert_eq!(store.length("z").unwrap(), 7);
    }

    #[test]
    fn test_empty_record() {
        let dir = TempDir::new().unwrap();
        let mut store = SqliteRecordStore::create(&dir.path().join("sql"), "").unwrap();
        store.insert("empty", b"").unwrap();
        assert_eq!(store.read("empty").unwrap(), Vec::<u8>::new());
        assert_eq!(store.length("empty").unwrap(), 0);
    }

    #[test]
    fn test_cursor_at_key_and_move() {
        let dir = TempDir::new().unwrap();
        let mut store = SqliteRecordStore::create(&dir.path().join("sql"), "").unwrap();
        for key in ["one", "two", "three"] {
            store.insert(key, key.as_bytes()).unwrap();
        }
        store.set_cursor_at_key("two").unwrap();
        assert_eq!(store.sequence_key(Cursor::Next).unwrap().as_deref(), Some("two"));

        let moved = dir.path().join("moved");
        store.move_to(&moved).unwrap();
        assert_eq!(store.pathname(), moved.as_path());
        store.insert("four", b"4").unwrap();
        assert_eq!(store.count(), 4);
        assert_eq!(store.read("one").unwrap(), b"one");
    }
}
