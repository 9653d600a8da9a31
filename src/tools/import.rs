//! Building a store from files on disk.

use crate::error::{Result, StoreError};
use crate::hashing::{HashSubject, KeyFormat, KeyHasher, Origin};
use crate::merge::{store_record, DuplicatePolicy};
use crate::store::RecordStore;
use crate::types::validate_key;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// How files become records.
#[derive(Clone, Copy, Debug, Default)]
pub struct ImportConfig {
    /// Store each file under a digest of this subject instead of its name.
    pub hash_subject: Option<HashSubject>,
    pub key_format: KeyFormat,
    pub duplicates: DuplicatePolicy,
}

/// Outcome of [`import_paths`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub inserted: u64,
    /// Files that replaced an existing record.
    pub replaced: u64,
    /// Paths that were not imported: special files and unusable names.
    pub skipped: Vec<PathBuf>,
}

/// Insert every file named by `paths`, descending into directories.
///
/// A hashed import needs `translation`, and `translation` is only accepted
/// for a hashed import.
pub fn import_paths(
    store: &mut dyn RecordStore,
    mut translation: Option<&mut dyn RecordStore>,
    paths: &[PathBuf],
    config: &ImportConfig,
) -> Result<ImportReport> {
    let hasher = match (config.hash_subject, translation.is_some()) {
        (Some(subject), true) => Some(KeyHasher::new(subject, config.key_format)),
        (None, false) => None,
        (Some(_), false) => {
            return Err(StoreError::Parameter(
                "hashed keys need a hash translation store".into(),
            ))
        }
        (None, true) => {
            return Err(StoreError::Parameter(
                "a hash translation store needs a hash subject".into(),
            ))
        }
    };

    let mut files = Vec::new();
    let mut report = ImportReport::default();
    for path in paths {
        collect(path, &mut files, &mut report.skipped)?;
    }

    for path in files {
        let name = match path.file_name().and_then(|n| n.to_str()) {
            Some(name) if validate_key(name).is_ok() => name.to_string(),
            _ => {
                warn!(path = %path.display(), "skipping file with an unusable name");
                report.skipped.push(path);
                continue;
            }
        };
        let data = fs::read(&path)?;

        let key = match (&hasher, translation.as_deref_mut()) {
            (Some(hasher), Some(translation)) => {
                let full = path.to_string_lossy();
                let origin = Origin {
                    name: &name,
                    path: &full,
                };
                let hashed = hasher.hashed_key(origin, &data);
                store_record(translation, &hashed, &hasher.translation(origin), config.duplicates)?;
                hashed
            }
            _ => name,
        };

        if store_record(store, &key, &data, config.duplicates)? {
            report.replaced += 1;
        } else {
            report.inserted += 1;
        }
    }

    debug!(
        store = %store.pathname().display(),
        inserted = report.inserted,
        replaced = report.replaced,
        skipped = report.skipped.len(),
        "imported files"
    );
    Ok(report)
}

/// Regular files under `path`, directories expanded in name order.
fn collect(path: &Path, files: &mut Vec<PathBuf>, skipped: &mut Vec<PathBuf>) -> Result<()> {
    let metadata = fs::metadata(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => {
            StoreError::ObjectDoesNotExist(format!("{}", path.display()))
        }
        _ => StoreError::Io(e),
    })?;

    if metadata.is_file() {
        files.push(path.to_path_buf());
    } else if metadata.is_dir() {
        let mut entries = fs::read_dir(path)?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<std::io::Result<Vec<_>>>()?;
        entries.sort();
        for entry in entries {
            collect(&entry, files, skipped)?;
        }
    } else {
        warn!(path = %path.display(), "skipping special file");
        skipped.push(path.to_path_buf());
    }
    Ok(())
}
