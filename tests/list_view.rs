//! List views over real source stores.

use recstore::{
    create_record_store, is_list_record_store, open_record_store, remove_record_store, Cursor,
    Kind, ListRecordStore, Mode, RecordStore, StoreConfig, StoreError,
};
use std::path::PathBuf;
use tempfile::TempDir;

fn source(dir: &TempDir, kind: Kind, keys: &[&str]) -> PathBuf {
    let path = dir.path().join("S");
    let mut store = create_record_store(&StoreConfig::new(&path, kind)).unwrap();
    for key in keys {
        store.insert(key, format!("data of {}", key).as_bytes()).unwrap();
    }
    path
}

#[test]
fn test_add_reports_keys_missing_from_source() {
    let dir = TempDir::new().unwrap();
    let s = source(&dir, Kind::File, &["f1", "f2", "f3"]);
    let l = dir.path().join("L");

    let mut list = ListRecordStore::create(&l, "first and fourth", &s).unwrap();
    let update = list.add_keys(["f1", "f4"]).unwrap();
    assert_eq!(update.applied, vec!["f1"]);
    assert_eq!(update.rejected, vec!["f4"]);
    assert!(!update.is_complete());
    assert_eq!(list.count(), 1);
    assert_eq!(list.read("f1").unwrap(), b"data of f1");
    drop(list);

    let source = open_record_store(&s, Mode::ReadOnly).unwrap();
    assert_eq!(source.count(), 3);
}

#[test]
fn test_open_by_path() {
    let dir = TempDir::new().unwrap();
    let s = source(&dir, Kind::Sqlite, &["a", "b", "c", "d"]);
    let l = dir.path().join("L");
    {
        let mut list = ListRecordStore::create(&l, "evens", &s).unwrap();
        list.add_keys(["d", "b"]).unwrap().ensure_complete().unwrap();
    }

    assert!(is_list_record_store(&l));
    let mut list = open_record_store(&l, Mode::ReadOnly).unwrap();
    assert_eq!(list.kind(), Kind::List);
    assert_eq!(list.description(), "evens");
    assert_eq!(list.count(), 2);

    // Sequencing follows the list, not the source.
    let records: Vec<_> = list.records().map(|r| r.unwrap()).collect();
    assert_eq!(records[0].key, "d");
    assert_eq!(records[1].data, b"data of b");
    assert_eq!(list.length("d").unwrap(), b"data of d".len() as u64);

    assert!(!list.contains_key("a").unwrap());
    assert!(matches!(list.read("a"), Err(StoreError::ObjectDoesNotExist(_))));

    list.set_cursor_at_key("b").unwrap();
    assert_eq!(list.sequence_key(Cursor::Next).unwrap().as_deref(), Some("b"));
    assert_eq!(list.sequence_key(Cursor::Next).unwrap(), None);
}

#[test]
fn test_removing_view_keeps_source() {
    let dir = TempDir::new().unwrap();
    let s = source(&dir, Kind::Archive, &["x"]);
    let l = dir.path().join("L");
    {
        let mut list = ListRecordStore::create(&l, "", &s).unwrap();
        list.add_keys(["x"]).unwrap();
    }

    remove_record_store(&l).unwrap();
    assert!(!l.exists());
    let source = open_record_store(&s, Mode::ReadOnly).unwrap();
    assert_eq!(source.read("x").unwrap(), b"data of x");
}

#[test]
fn test_view_follows_moved_list() {
    let dir = TempDir::new().unwrap();
    let s = source(&dir, Kind::File, &["k"]);
    let l = dir.path().join("L");
    let moved = dir.path().join("L2");

    let mut list = ListRecordStore::create(&l, "", &s).unwrap();
    list.add_keys(["k"]).unwrap();
    list.move_to(&moved).unwrap();
    drop(list);

    let list = open_record_store(&moved, Mode::ReadOnly).unwrap();
    assert_eq!(list.read("k").unwrap(), b"data of k");
}

#[test]
fn test_source_gone() {
    let dir = TempDir::new().unwrap();
    let s = source(&dir, Kind::File, &["k"]);
    let l = dir.path().join("L");
    {
        let mut list = ListRecordStore::create(&l, "", &s).unwrap();
        list.add_keys(["k"]).unwrap();
    }
    remove_record_store(&s).unwrap();

    let list = open_record_store(&l, Mode::ReadOnly).unwrap();
    assert_eq!(list.count(), 1);
    assert!(matches!(list.read("k"), Err(StoreError::ObjectDoesNotExist(_))));
}
