//! Merging stores, optionally re-keying records by digest.

use crate::control::store_name;
use crate::error::{Result, StoreError};
use crate::hashing::{translation_description, HashSubject, KeyFormat, KeyHasher, Origin};
use crate::store::{create_record_store, open_record_store, RecordStore, StoreConfig};
use crate::types::{Kind, Mode};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// What to do when a key is already present in the destination.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum DuplicatePolicy {
    /// Abort with `ObjectExists`.
    #[default]
    Stop,
    /// Replace the existing record and log a warning.
    Overwrite,
}

/// Merge configuration.
#[derive(Clone, Debug)]
pub struct MergeConfig {
    /// Store to create. Must not exist.
    pub destination: PathBuf,

    pub description: String,

    /// Kind of the destination (and of the translation store).
    pub kind: Kind,

    /// Stores to read, in order.
    pub sources: Vec<PathBuf>,

    pub duplicates: DuplicatePolicy,

    /// Store records under a digest of this subject.
    pub hash_subject: Option<HashSubject>,

    /// Translation store to create alongside a hashed merge.
    pub hash_translation: Option<PathBuf>,

    pub key_format: KeyFormat,

    /// NUL-terminate translation values.
    pub nul_terminate: bool,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            destination: PathBuf::from("./merged"),
            description: String::new(),
            kind: Kind::default(),
            sources: Vec::new(),
            duplicates: DuplicatePolicy::default(),
            hash_subject: None,
            hash_translation: None,
            key_format: KeyFormat::default(),
            nul_terminate: false,
        }
    }
}

impl MergeConfig {
    pub fn new(destination: impl Into<PathBuf>, kind: Kind, sources: Vec<PathBuf>) -> Self {
        Self {
            destination: destination.into(),
            kind,
            sources,
            ..Self::default()
        }
    }

    /// Check the configuration before anything is created.
    pub fn validate(&self) -> Result<()> {
        if self.sources.is_empty() {
            return Err(StoreError::Parameter("no source record stores to merge".into()));
        }
        if !self.kind.holds_data() {
            return Err(StoreError::Parameter(format!(
                "cannot merge into a {} record store",
                self.kind
            )));
        }
        match (&self.hash_subject, &self.hash_translation) {
            (Some(_), None) => {
                return Err(StoreError::Parameter(
                    "hashed keys need a hash translation store".into(),
                ))
            }
            (None, Some(_)) => {
                return Err(StoreError::Parameter(
                    "a hash translation store needs a hash subject".into(),
                ))
            }
            _ => {}
        }
        if self.sources.iter().any(|s| s == &self.destination)
            || self.hash_translation.as_ref() == Some(&self.destination)
        {
            return Err(StoreError::Parameter(
                "destination must differ from every input".into(),
            ));
        }
        Ok(())
    }

    fn hasher(&self) -> Option<KeyHasher> {
        self.hash_subject.map(|subject| KeyHasher {
            subject,
            key_format: self.key_format,
            nul_terminate: self.nul_terminate,
        })
    }
}

/// Summary of a completed merge.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Records written to the destination.
    pub records: u64,
    /// Records that replaced an earlier one under [`DuplicatePolicy::Overwrite`].
    pub overwritten: u64,
    /// Records read from each source, in source order.
    pub per_source: Vec<(PathBuf, u64)>,
}

/// Copy every record of `sources` into a new store at `destination`.
pub fn merge_record_stores(
    destination: impl AsRef<Path>,
    description: &str,
    kind: Kind,
    sources: &[PathBuf],
) -> Result<MergeReport> {
    let mut config = MergeConfig::new(destination.as_ref(), kind, sources.to_vec());
    config.description = description.to_string();
    merge(&config)
}

/// Merge with records stored under digests and translations recorded.
pub fn merge_and_hash_record_stores(config: &MergeConfig) -> Result<MergeReport> {
    if config.hash_subject.is_none() {
        return Err(StoreError::Parameter("no hash subject given".into()));
    }
    merge(config)
}

/// Run a merge as configured.
///
/// On failure the destination and translation stores are removed.
pub fn merge(config: &MergeConfig) -> Result<MergeReport> {
    config.validate()?;

    // Open every source first so a bad input fails before anything is created.
    let mut sources = config
        .sources
        .iter()
        .map(|path| open_record_store(path, Mode::ReadOnly))
        .collect::<Result<Vec<_>>>()?;

    let mut destination = create_record_store(
        &StoreConfig::new(&config.destination, config.kind).with_description(&config.description),
    )?;
    let mut translation = match &config.hash_translation {
        Some(path) => match create_record_store(
            &StoreConfig::new(path, config.kind)
                .with_description(translation_description(&store_name(&config.destination))),
        ) {
            Ok(store) => Some(store),
            Err(e) => {
                drop(destination);
                discard(&config.destination);
                return Err(e);
            }
        },
        None => None,
    };

    let result = copy_all(config, &mut sources, destination.as_mut(), translation.as_deref_mut());
    let result = result.and_then(|report| {
        destination.sync()?;
        if let Some(store) = translation.as_mut() {
            store.sync()?;
        }
        Ok(report)
    });

    match result {
        Ok(report) => {
            info!(
                destination = %config.destination.display(),
                records = report.records,
                overwritten = report.overwritten,
                sources = config.sources.len(),
                "merged record stores"
            );
            Ok(report)
        }
        Err(e) => {
            drop(destination);
            drop(translation);
            discard(&config.destination);
            if let Some(path) = &config.hash_translation {
                discard(path);
            }
            Err(e)
        }
    }
}

fn copy_all(
    config: &MergeConfig,
    sources: &mut [Box<dyn RecordStore>],
    destination: &mut dyn RecordStore,
    mut translation: Option<&mut (dyn RecordStore + 'static)>,
) -> Result<MergeReport> {
    let hasher = config.hasher();
    let mut report = MergeReport::default();

    for (path, source) in config.sources.iter().zip(sources.iter_mut()) {
        let mut copied = 0u64;
        for record in source.records() {
            let record = record?;
            copied += 1;

            let key = match (&hasher, translation.as_deref_mut()) {
                (Some(hasher), Some(translation)) => {
                    let full = format!("{}/{}", path.display(), record.key);
                    let origin = Origin {
                        name: &record.key,
                        path: &full,
                    };
                    let hashed = hasher.hashed_key(origin, &record.data);
                    store_record(
                        translation,
                        &hashed,
                        &hasher.translation(origin),
                        config.duplicates,
                    )?;
                    hashed
                }
                _ => record.key.clone(),
            };

            if store_record(destination, &key, &record.data, config.duplicates)? {
                report.overwritten += 1;
            }
            report.records += 1;
        }
        report.per_source.push((path.clone(), copied));
    }
    Ok(report)
}

/// Insert a record, applying `policy` if the key exists.
///
/// Returns whether an existing record was replaced.
pub(crate) fn store_record(
    store: &mut dyn RecordStore,
    key: &str,
    data: &[u8],
    policy: DuplicatePolicy,
) -> Result<bool> {
    match store.insert(key, data) {
        Ok(()) => Ok(false),
        Err(StoreError::ObjectExists(_)) if policy == DuplicatePolicy::Overwrite => {
            store.replace(key, data)?;
            warn!(
                store = %store.pathname().display(),
                key,
                "overwrote duplicate record"
            );
            Ok(true)
        }
        Err(e) => Err(e),
    }
}

/// Remove a half-built store, ignoring errors.
fn discard(path: &Path) {
    if path.exists() {
        let _ = fs::remove_dir_all(path);
    }
}
