//! Library form of the record store utilities: building stores from files,
//! comparing stores, and pulling records back out.

pub mod diff;
pub mod import;

pub use diff::{diff_stores, DiffMethod, Difference};
pub use import::{import_paths, ImportConfig, ImportReport};

use crate::error::{Result, StoreError};
use crate::hashing::decode_translation;
use crate::store::RecordStore;
use crate::types::{digest, Cursor, Record};

/// Original key of `hash` according to a hash translation store.
pub fn unhash(translation: &dyn RecordStore, hash: &str) -> Result<String> {
    Ok(decode_translation(&translation.read(hash)?))
}

/// Read `key`, or the record stored under the digest of `key` if the store
/// was built with hashed names.
pub fn read_possibly_hashed(store: &dyn RecordStore, key: &str) -> Result<Record> {
    match store.read(key) {
        Ok(data) => Ok(Record::new(key, data)),
        Err(StoreError::ObjectDoesNotExist(_)) => {
            let hashed = digest(key.as_bytes());
            let data = store.read(&hashed).map_err(|e| match e {
                StoreError::ObjectDoesNotExist(_) => StoreError::missing_key(key),
                other => other,
            })?;
            Ok(Record::new(hashed, data))
        }
        Err(e) => Err(e),
    }
}

/// Every key in sequence order.
pub fn list_keys(store: &mut dyn RecordStore) -> Result<Vec<String>> {
    let mut keys = Vec::with_capacity(store.count() as usize);
    let mut cursor = Cursor::Start;
    while let Some(key) = store.sequence_key(cursor)? {
        keys.push(key);
        cursor = Cursor::Next;
    }
    Ok(keys)
}

/// Records `first` through `last` (1-based, inclusive) in sequence order.
pub fn extract_range(store: &mut dyn RecordStore, first: u64, last: u64) -> Result<Vec<Record>> {
    let total = store.count();
    if total == 0 {
        return Err(StoreError::ObjectDoesNotExist(format!(
            "records in empty store {}",
            store.pathname().display()
        )));
    }
    if first == 0 || first > last {
        return Err(StoreError::Parameter(format!(
            "invalid record range {}-{}",
            first, last
        )));
    }
    if last > total {
        return Err(StoreError::Parameter(format!(
            "record range {}-{} exceeds the {} records in the store",
            first, last, total
        )));
    }

    let mut cursor = Cursor::Start;
    for _ in 1..first {
        if store.sequence_key(cursor)?.is_none() {
            return Err(StoreError::Parameter(format!(
                "could not sequence to record {}",
                first
            )));
        }
        cursor = Cursor::Next;
    }

    let mut records = Vec::with_capacity((last - first + 1) as usize);
    for index in first..=last {
        match store.sequence(cursor)? {
            Some(record) => records.push(record),
            None => {
                return Err(StoreError::Parameter(format!(
                    "could not sequence to record {}",
                    index
                )))
            }
        }
        cursor = Cursor::Next;
    }
    Ok(records)
}

/// Number of records exactly `size` bytes long.
pub fn count_records_of_size(store: &mut dyn RecordStore, size: u64) -> Result<u64> {
    let mut matching = 0;
    for key in list_keys(store)? {
        if store.length(&key)? == size {
            matching += 1;
        }
    }
    Ok(matching)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{create_record_store, StoreConfig};
    use crate::types::Kind;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> Box<dyn RecordStore> {
        let mut store =
            create_record_store(&StoreConfig::new(dir.path().join("s"), Kind::Sqlite)).unwrap();
        for (key, data) in [("one", "1"), ("two", "22"), ("three", "333"), ("four", "44")] {
            store.insert(key, data.as_bytes()).unwrap();
        }
        store
    }

    #[test]
    fn test_extract_range() {
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir);

        let keys: Vec<_> = extract_range(store.as_mut(), 2, 3)
            .unwrap()
            .into_iter()
            .map(|r| r.key)
            .collect();
        assert_eq!(keys, vec!["two", "three"]);

        for (first, last) in [(0, 1), (3, 2), (1, 5)] {
            assert!(matches!(
                extract_range(store.as_mut(), first, last),
                Err(StoreError::Parameter(_))
            ));
        }
    }

    #[test]
    fn test_counts_and_listing() {
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir);
        assert_eq!(count_records_of_size(store.as_mut(), 2).unwrap(), 2);
        assert_eq!(count_records_of_size(store.as_mut(), 9).unwrap(), 0);
        assert_eq!(
            list_keys(store.as_mut()).unwrap(),
            vec!["one", "two", "three", "four"]
        );
    }

    #[test]
    fn test_read_possibly_hashed() {
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir);
        store.insert(&digest(b"image.png"), b"pixels").unwrap();

        let direct = read_possibly_hashed(store.as_ref(), "two").unwrap();
        assert_eq!(direct.data, b"22");

        let hashed = read_possibly_hashed(store.as_ref(), "image.png").unwrap();
        assert_eq!(hashed.key, digest(b"image.png"));
        assert_eq!(hashed.data, b"pixels");

        assert!(matches!(
            read_possibly_hashed(store.as_ref(), "nothing"),
            Err(StoreError::ObjectDoesNotExist(_))
        ));
    }
}
