//! Error handling and edge case tests.

use recstore::control::CONTROL_FILE;
use recstore::{
    create_record_store, open_record_store, read_kind, remove_record_store, ErrorKind, Kind, Mode,
    RecordStore, StoreConfig, StoreError,
};
use std::fs;
use tempfile::TempDir;

fn test_store(dir: &TempDir, kind: Kind) -> Box<dyn RecordStore> {
    create_record_store(&StoreConfig::new(dir.path().join("store"), kind)).unwrap()
}

// --- Locking ---

#[test]
fn test_second_writer_is_locked_out() {
    let dir = TempDir::new().unwrap();
    for kind in [Kind::File, Kind::Archive, Kind::Sqlite] {
        let path = dir.path().join(kind.as_str());
        let _writer = create_record_store(&StoreConfig::new(&path, kind)).unwrap();

        let result = open_record_store(&path, Mode::ReadWrite);
        assert!(matches!(result, Err(StoreError::Locked(_))), "{}", kind);
        assert!(matches!(remove_record_store(&path), Err(StoreError::Locked(_))));
        assert!(path.exists());
    }
}

#[test]
fn test_reader_alongside_writer() {
    let dir = TempDir::new().unwrap();
    let mut writer = test_store(&dir, Kind::Sqlite);
    writer.insert("k", b"v").unwrap();

    let reader = open_record_store(dir.path().join("store"), Mode::ReadOnly).unwrap();
    assert_eq!(reader.read("k").unwrap(), b"v");
}

#[test]
fn test_database_allows_one_handle() {
    let dir = TempDir::new().unwrap();
    let _writer = test_store(&dir, Kind::Database);

    let result = open_record_store(dir.path().join("store"), Mode::ReadOnly);
    assert!(matches!(result, Err(StoreError::Locked(_))));
}

#[test]
fn test_lock_released_on_drop() {
    let dir = TempDir::new().unwrap();
    drop(test_store(&dir, Kind::Archive));
    let store = open_record_store(dir.path().join("store"), Mode::ReadWrite).unwrap();
    assert_eq!(store.mode(), Mode::ReadWrite);
}

// --- Missing and malformed stores ---

#[test]
fn test_open_missing_store() {
    let dir = TempDir::new().unwrap();
    let result = open_record_store(dir.path().join("nothing"), Mode::ReadOnly);
    assert!(matches!(result, Err(StoreError::ObjectDoesNotExist(_))));

    // A plain directory is not a store.
    fs::create_dir(dir.path().join("plain")).unwrap();
    let result = open_record_store(dir.path().join("plain"), Mode::ReadOnly);
    assert!(matches!(result, Err(StoreError::ObjectDoesNotExist(_))));
}

#[test]
fn test_create_over_existing_path() {
    let dir = TempDir::new().unwrap();
    drop(test_store(&dir, Kind::File));
    for kind in [Kind::File, Kind::Archive, Kind::Database, Kind::Sqlite] {
        let result = create_record_store(&StoreConfig::new(dir.path().join("store"), kind));
        assert!(matches!(result, Err(StoreError::ObjectExists(_))));
    }
    assert_eq!(read_kind(&dir.path().join("store")).unwrap(), Kind::File);
}

#[test]
fn test_unknown_type_in_control_file() {
    let dir = TempDir::new().unwrap();
    drop(test_store(&dir, Kind::File));
    let control = dir.path().join("store").join(CONTROL_FILE);
    let text = fs::read_to_string(&control).unwrap().replace("Type = File", "Type = Tape");
    fs::write(&control, text).unwrap();

    let err = open_record_store(dir.path().join("store"), Mode::ReadOnly).err().unwrap();
    assert!(matches!(err, StoreError::Strategy(_)));
    assert_eq!(err.kind(), ErrorKind::StrategyError);
}

// --- Keys ---

#[test]
fn test_invalid_keys() {
    let dir = TempDir::new().unwrap();
    let mut store = test_store(&dir, Kind::File);
    for key in ["", "a/b", "back\\slash", "star*", "amp&", ".."] {
        let err = store.insert(key, b"x").unwrap_err();
        assert!(matches!(err, StoreError::Parameter(_)), "{:?}", key);
        assert_eq!(err.kind(), ErrorKind::ParameterError);
    }
    assert_eq!(store.count(), 0);
}

#[test]
fn test_error_kinds() {
    let dir = TempDir::new().unwrap();
    let mut store = test_store(&dir, Kind::Archive);
    store.insert("k", b"v").unwrap();

    assert_eq!(store.insert("k", b"v").unwrap_err().kind(), ErrorKind::ObjectExists);
    assert_eq!(store.read("z").unwrap_err().kind(), ErrorKind::ObjectDoesNotExist);
    assert_eq!(
        store.move_to(dir.path()).unwrap_err().kind(),
        ErrorKind::ObjectExists
    );
}
