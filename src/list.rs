//! List views: a named subset of another store's keys.
//!
//! A list store keeps no record data. Its control file names the source
//! store (`SourceRecordStore`, absolute) and `KeyList.txt` holds the member
//! keys, one per line, in the order they were added. Reads go to the source,
//! which is reopened read-only whenever it is needed and never modified.
//!
//! The key list changes only through [`ListRecordStore::add_keys`] and
//! [`ListRecordStore::remove_keys`]. Each change rewrites the whole list into
//! a temporary file in the store directory and renames it over the old one,
//! then records the new `Count`.

use crate::control::{self, Control};
use crate::error::{Result, StoreError};
use crate::ordered_set::{OrderedSet, Strategy};
use crate::properties::sync_dir;
use crate::store::{open_record_store, RecordStore};
use crate::types::{validate_key, Cursor, Kind, Mode, Record};
use std::fs;
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// File holding the member keys.
pub const KEY_LIST_FILE: &str = "KeyList.txt";

const SOURCE_PROPERTY: &str = "SourceRecordStore";

/// Whether `path` holds a list view.
pub fn is_list_record_store(path: impl AsRef<Path>) -> bool {
    matches!(control::read_kind(path.as_ref()), Ok(Kind::List))
}

/// Outcome of a key list change.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KeyListUpdate {
    /// Keys the change applied to.
    pub applied: Vec<String>,
    /// Keys left out: absent from the source on add, absent from the list
    /// on remove.
    pub rejected: Vec<String>,
}

impl KeyListUpdate {
    pub fn is_complete(&self) -> bool {
        self.rejected.is_empty()
    }

    /// Turn rejected keys into an `ObjectDoesNotExist` error naming them all.
    pub fn ensure_complete(&self) -> Result<()> {
        if self.is_complete() {
            return Ok(());
        }
        Err(StoreError::ObjectDoesNotExist(format!(
            "keys {}",
            self.rejected
                .iter()
                .map(|k| format!("\"{}\"", k))
                .collect::<Vec<_>>()
                .join(", ")
        )))
    }
}

/// View over the records of a source store named in a key list.
pub struct ListRecordStore {
    control: Control,

    /// Absolute path of the source store.
    source: PathBuf,

    keys: OrderedSet<String>,

    /// Source handle held from `Cursor::Start` until exhaustion.
    pass: Option<Box<dyn RecordStore>>,

    /// Index in `keys` of the next key to sequence.
    position: usize,
}

impl ListRecordStore {
    /// Create an empty list view over `source`.
    pub fn create(path: &Path, description: &str, source: &Path) -> Result<Self> {
        control::read_kind(source).map_err(|_| missing_source(source))?;
        let source = fs::canonicalize(source)?;

        let mut control = Control::create(path, Kind::List, description)?;
        control.set_property(SOURCE_PROPERTY, source.display())?;

        let mut store = Self {
            control,
            source,
            keys: OrderedSet::new(Strategy::Faster),
            pass: None,
            position: 0,
        };
        store.write_key_list()?;
        Ok(store)
    }

    pub fn open(path: &Path, mode: Mode) -> Result<Self> {
        let mut control = Control::open(path, mode, Kind::List)?;
        let source = PathBuf::from(control.require(SOURCE_PROPERTY)?);
        let keys = read_key_list(path)?;

        let listed = keys.len() as u64;
        if listed != control.count() {
            warn!(
                path = %path.display(),
                recorded = control.count(),
                listed,
                "record count disagrees with key list"
            );
            if mode == Mode::ReadWrite {
                control.set_count(listed)?;
            }
        }

        Ok(Self {
            control,
            source,
            keys,
            pass: None,
            position: 0,
        })
    }

    /// Path of the store this view reads from.
    pub fn source_path(&self) -> &Path {
        &self.source
    }

    /// Member keys in list order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(String::as_str)
    }

    /// Add keys present in the source. Keys the source lacks are reported
    /// in [`KeyListUpdate::rejected`]; the rest are still added.
    pub fn add_keys<I, S>(&mut self, keys: I) -> Result<KeyListUpdate>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.control.check_writable()?;
        self.keys = read_key_list(self.control.path())?;

        let source = self.open_source()?;
        let mut update = KeyListUpdate::default();
        for key in keys {
            let key = key.as_ref();
            if validate_key(key).is_ok() && source.contains_key(key)? {
                self.keys.push_back(key.to_string());
                update.applied.push(key.to_string());
            } else {
                update.rejected.push(key.to_string());
            }
        }
        drop(source);

        self.write_key_list()?;
        if !update.is_complete() {
            warn!(
                path = %self.control.path().display(),
                rejected = ?update.rejected,
                "keys not found in source record store"
            );
        }
        Ok(update)
    }

    /// Drop keys from the list. The source is not touched.
    pub fn remove_keys<I, S>(&mut self, keys: I) -> Result<KeyListUpdate>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.control.check_writable()?;
        self.keys = read_key_list(self.control.path())?;

        let mut update = KeyListUpdate::default();
        for key in keys {
            let key = key.as_ref().to_string();
            if self.keys.erase(&key) {
                update.applied.push(key);
            } else {
                update.rejected.push(key);
            }
        }

        self.write_key_list()?;
        Ok(update)
    }

    fn open_source(&self) -> Result<Box<dyn RecordStore>> {
        open_record_store(&self.source, Mode::ReadOnly).map_err(|e| match e {
            StoreError::ObjectDoesNotExist(_) => missing_source(&self.source),
            other => other,
        })
    }

    fn require(&self, key: &str) -> Result<()> {
        if self.keys.contains(&key.to_string()) {
            Ok(())
        } else {
            Err(StoreError::missing_key(key))
        }
    }

    /// Run `f` against the source, reusing the handle of a pass in progress.
    fn with_source<T>(&self, f: impl FnOnce(&dyn RecordStore) -> Result<T>) -> Result<T> {
        match &self.pass {
            Some(source) => f(source.as_ref()),
            None => f(self.open_source()?.as_ref()),
        }
    }

    /// Write the current list to a temporary file beside the live one.
    fn stage_key_list(&self) -> Result<NamedTempFile> {
        let staged = NamedTempFile::new_in(self.control.path())?;
        {
            let mut writer = BufWriter::new(staged.as_file());
            for key in &self.keys {
                writeln!(writer, "{}", key)?;
            }
            writer.flush()?;
        }
        staged.as_file().sync_all()?;
        Ok(staged)
    }

    /// Replace the key list on disk, then record the new count.
    fn write_key_list(&mut self) -> Result<()> {
        let dir = self.control.path().to_path_buf();
        self.stage_key_list()?.persist(dir.join(KEY_LIST_FILE))?;
        sync_dir(&dir)?;

        self.control.set_count(self.keys.len() as u64)?;
        self.control.sync()?;
        debug!(path = %dir.display(), count = self.keys.len(), "rewrote key list");
        Ok(())
    }
}

fn missing_source(source: &Path) -> StoreError {
    StoreError::ObjectDoesNotExist(format!("source record store {}", source.display()))
}

fn read_key_list(path: &Path) -> Result<OrderedSet<String>> {
    let text = match fs::read_to_string(path.join(KEY_LIST_FILE)) {
        Ok(text) => text,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(StoreError::Strategy(format!(
                "{} is missing its key list",
                path.display()
            )))
        }
        Err(e) => return Err(e.into()),
    };

    let mut keys = OrderedSet::new(Strategy::Faster);
    keys.extend(
        text.lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string),
    );
    Ok(keys)
}

fn read_only_view(path: &Path) -> StoreError {
    StoreError::Strategy(format!(
        "{} is a list view; change its membership with add_keys and remove_keys",
        path.display()
    ))
}

impl RecordStore for ListRecordStore {
    fn kind(&self) -> Kind {
        Kind::List
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
        Ok(fs::metadata(self.control.path().join(KEY_LIST_FILE))?.len())
    }

    fn insert(&mut self, _key: &str, _data: &[u8]) -> Result<()> {
        Err(read_only_view(self.control.path()))
    }

    fn replace(&mut self, _key: &str, _data: &[u8]) -> Result<()> {
        Err(read_only_view(self.control.path()))
    }

    fn remove(&mut self, _key: &str) -> Result<()> {
        Err(read_only_view(self.control.path()))
    }

    fn read(&self, key: &str) -> Result<Vec<u8>> {
        self.require(key)?;
        self.with_source(|source| source.read(key))
    }

    fn length(&self, key: &str) -> Result<u64> {
        self.require(key)?;
        self.with_source(|source| source.length(key))
    }

    fn contains_key(&self, key: &str) -> Result<bool> {
        Ok(self.keys.contains(&key.to_string()))
    }

    fn flush(&mut self, key: &str) -> Result<()> {
        self.require(key)
    }

    fn sync(&mut self) -> Result<()> {
        self.control.sync()
    }

    fn sequence(&mut self, cursor: Cursor) -> Result<Option<Record>> {
        let key = match self.sequence_key(cursor)? {
            Some(key) => key,
            None => return Ok(None),
        };
        if self.pass.is_none() {
            self.pass = Some(self.open_source()?);
        }
        let data = self.with_source(|source| source.read(&key))?;
        Ok(Some(Record { key, data }))
    }

    fn sequence_key(&mut self, cursor: Cursor) -> Result<Option<String>> {
        if cursor == Cursor::Start {
            self.position = 0;
            self.pass = None;
        }
        match self.keys.get(self.position).cloned() {
            Some(key) => {
                self.position += 1;
                Ok(Some(key))
            }
            None => {
                // Exhausted: release the source.
                self.pass = None;
                Ok(None)
            }
        }
    }

    fn set_cursor_at_key(&mut self, key: &str) -> Result<()> {
        self.position = self
            .keys
            .position(&key.to_string())
            .ok_or_else(|| StoreError::missing_key(key))?;
        Ok(())
    }

    fn move_to(&mut self, new_path: &Path) -> Result<()> {
        self.control.relocate(new_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{create_record_store, StoreConfig};
    use tempfile::TempDir;

    fn source_with(dir: &TempDir, keys: &[&str]) -> PathBuf {
        let path = dir.path().join("source");
        let mut source = create_record_store(&StoreConfig::new(&path, Kind::Archive)).unwrap();
        for key in keys {
            source.insert(key, key.as_bytes()).unwrap();
        }
        path
    }

    #[test]
    fn test_create_writes_absolute_source_and_empty_list() {
        let dir = TempDir::new().unwrap();
        let source = source_with(&dir, &["a"]);
        let path = dir.path().join("list");
        let store = ListRecordStore::create(&path, "subset", &source).unwrap();

        assert!(store.source_path().is_absolute());
        assert_eq!(store.count(), 0);
        assert_eq!(fs::read_to_string(path.join(KEY_LIST_FILE)).unwrap(), "");
        assert!(is_list_record_store(&path));
        assert!(!is_list_record_store(&source));
    }

    #[test]
    fn test_missing_source_and_existing_target() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            ListRecordStore::create(&dir.path().join("list"), "", &dir.path().join("nope")),
            Err(StoreError::ObjectDoesNotExist(_))
        ));

        let source = source_with(&dir, &[]);
        assert!(matches!(
            ListRecordStore::create(&source, "", &source),
            Err(StoreError::ObjectExists(_))
        ));
    }

    #[test]
    fn test_add_and_remove_keys() {
        let dir = TempDir::new().unwrap();
        let source = source_with(&dir, &["a", "b", "c"]);
        let path = dir.path().join("list");
        let mut store = ListRecordStore::create(&path, "", &source).unwrap();

        let update = store.add_keys(["c", "x", "a"]).unwrap();
        assert_eq!(update.applied, vec!["c", "a"]);
        assert_eq!(update.rejected, vec!["x"]);
        assert!(matches!(update.ensure_complete(), Err(StoreError::ObjectDoesNotExist(_))));
        assert_eq!(store.count(), 2);
        assert_eq!(fs::read_to_string(path.join(KEY_LIST_FILE)).unwrap(), "c\na\n");

        let update = store.remove_keys(["c", "zz"]).unwrap();
        assert_eq!(update.applied, vec!["c"]);
        assert_eq!(update.rejected, vec!["zz"]);
        assert_eq!(store.keys().collect::<Vec<_>>(), vec!["a"]);
        assert!(matches!(store.read("c"), Err(StoreError::ObjectDoesNotExist(_))));
    }

    #[test]
    fn test_padded_keys_are_rejected() {
        let dir = TempDir::new().unwrap();
        let source = source_with(&dir, &["padded"]);
        let path = dir.path().join("list");
        let mut store = ListRecordStore::create(&path, "", &source).unwrap();

        let update = store.add_keys([" padded", "padded "]).unwrap();
        assert!(update.applied.is_empty());
        assert_eq!(update.rejected, vec![" padded", "padded "]);
        assert_eq!(store.count(), 0);
        drop(store);

        let store = ListRecordStore::open(&path, Mode::ReadOnly).unwrap();
        assert_eq!(store.count(), 0);
        assert!(!store.contains_key("padded").unwrap());
    }

    #[test]
    fn test_interrupted_update_leaves_list_intact() {
        let dir = TempDir::new().unwrap();
        let source = source_with(&dir, &["a", "b"]);
        let path = dir.path().join("list");
        let mut store = ListRecordStore::create(&path, "", &source).unwrap();
        store.add_keys(["a"]).unwrap();

        // Stage a new list but stop before the rename.
        store.keys.push_back("b".to_string());
        let staged = store.stage_key_list().unwrap();
        drop(staged);
        drop(store);

        let store = ListRecordStore::open(&path, Mode::ReadOnly).unwrap();
        assert_eq!(store.keys().collect::<Vec<_>>(), vec!["a"]);
        assert_eq!(store.count(), 1);
        let leftovers = fs::read_dir(&path)
            .unwrap()
            .filter(|e| e.as_ref().unwrap().file_name().to_string_lossy().starts_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn test_sequence_holds_source_until_exhausted() {
        let dir = TempDir::new().unwrap();
        let source = source_with(&dir, &["a", "b", "c"]);
        let mut store = ListRecordStore::create(&dir.path().join("list"), "", &source).unwrap();
        store.add_keys(["c", "a"]).unwrap();

        let first = store.sequence(Cursor::Start).unwrap().unwrap();
        assert_eq!(first, Record::new("c", "c"));
        assert!(store.pass.is_some());
        assert_eq!(store.sequence(Cursor::Next).unwrap().unwrap().key, "a");
        assert_eq!(store.sequence(Cursor::Next).unwrap(), None);
        assert!(store.pass.is_none());
    }

    #[test]
    fn test_base_mutations_are_rejected() {
        let dir = TempDir::new().unwrap();
        let source = source_with(&dir, &["a"]);
        let mut store = ListRecordStore::create(&dir.path().join("list"), "", &source).unwrap();
        store.add_keys(["a"]).unwrap();

        assert!(matches!(store.insert("b", b"1"), Err(StoreError::Strategy(_))));
        assert!(matches!(store.replace("a", b"1"), Err(StoreError::Strategy(_))));
        assert!(matches!(store.remove("a"), Err(StoreError::Strategy(_))));
        assert_eq!(store.read("a").unwrap(), b"a");
    }
}
