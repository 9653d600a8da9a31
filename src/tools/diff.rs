//! Comparing the records of two stores.

use crate::error::{Result, StoreError};
use crate::store::RecordStore;
use crate::tools::list_keys;
use crate::types::digest;
use std::collections::HashSet;

/// How record contents are compared once their sizes agree.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum DiffMethod {
    #[default]
    ByteForByte,
    /// Compare SHA-256 digests of the two records.
    Digest,
}

/// One disagreement between two stores.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Difference {
    /// A requested key present in neither store.
    Missing(String),
    OnlyInSource(String),
    OnlyInTarget(String),
    SizeDiffers { key: String, source: u64, target: u64 },
    ContentDiffers(String),
}

/// Compare `source` and `target` over `keys`, or over every key of either
/// store when `keys` is `None`.
///
/// Differences are reported in key order of `keys` or of the source store,
/// followed by keys found only in the target.
pub fn diff_stores(
    source: &mut dyn RecordStore,
    target: &mut dyn RecordStore,
    keys: Option<&[String]>,
    method: DiffMethod,
) -> Result<Vec<Difference>> {
    for store in [&*source, &*target] {
        if store.count() == 0 {
            return Err(StoreError::ObjectDoesNotExist(format!(
                "records in empty store {}",
                store.pathname().display()
            )));
        }
    }

    let mut differences = Vec::new();
    match keys {
        Some(keys) => {
            for key in keys {
                compare(source, target, key, method, &mut differences)?;
            }
        }
        None => {
            let source_keys = list_keys(source)?;
            for key in &source_keys {
                compare(source, target, key, method, &mut differences)?;
            }
            let seen: HashSet<&str> = source_keys.iter().map(String::as_str).collect();
            for key in list_keys(target)? {
                if !seen.contains(key.as_str()) {
                    differences.push(Difference::OnlyInTarget(key));
                }
            }
        }
    }
    Ok(differences)
}

fn compare(
    source: &dyn RecordStore,
    target: &dyn RecordStore,
    key: &str,
    method: DiffMethod,
    differences: &mut Vec<Difference>,
) -> Result<()> {
    match (source.contains_key(key)?, target.contains_key(key)?) {
        (false, false) => differences.push(Difference::Missing(key.to_string())),
        (true, false) => differences.push(Difference::OnlyInSource(key.to_string())),
        (false, true) => differences.push(Difference::OnlyInTarget(key.to_string())),
        (true, true) => {
            let (source_len, target_len) = (source.length(key)?, target.length(key)?);
            if source_len != target_len {
                differences.push(Difference::SizeDiffers {
                    key: key.to_string(),
                    source: source_len,
                    target: target_len,
                });
                return Ok(());
            }
            let (a, b) = (source.read(key)?, target.read(key)?);
            let same = match method {
                DiffMethod::ByteForByte => a == b,
                DiffMethod::Digest => digest(&a) == digest(&b),
            };
            if !same {
                differences.push(Difference::ContentDiffers(key.to_string()));
            }
        }
    }
    Ok(())
}
