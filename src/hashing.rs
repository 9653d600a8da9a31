//! Hashed keys and hash translation.
//!
//! When records are stored under a digest instead of their original key, a
//! hash translation store maps each digest back to the original key. Both
//! the merge pipeline and file import use the rules here.

use crate::types::digest;

/// What a hashed key is a digest of.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HashSubject {
    /// The record data.
    Contents,
    /// The original key or file name.
    Name,
    /// The full origin: `<source store path>/<key>` or the file's path.
    Path,
}

/// What a hash translation entry records as the original key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum KeyFormat {
    /// The bare key or file name.
    #[default]
    Name,
    /// The full origin, as for [`HashSubject::Path`].
    Path,
}

/// Where a record came from, in both of the forms a key can take.
#[derive(Clone, Copy, Debug)]
pub struct Origin<'a> {
    /// Key in the source store, or file name.
    pub name: &'a str,
    /// `<source store path>/<key>`, or the file's path.
    pub path: &'a str,
}

/// Computes hashed keys and their translations.
#[derive(Clone, Copy, Debug)]
pub struct KeyHasher {
    pub subject: HashSubject,
    pub key_format: KeyFormat,
    /// Append a NUL byte to each translation value.
    pub nul_terminate: bool,
}

impl KeyHasher {
    pub fn new(subject: HashSubject, key_format: KeyFormat) -> Self {
        Self {
            subject,
            key_format,
            nul_terminate: false,
        }
    }

    /// Key a record is stored under.
    pub fn hashed_key(&self, origin: Origin<'_>, data: &[u8]) -> String {
        match self.subject {
            HashSubject::Contents => digest(data),
            HashSubject::Name => digest(origin.name.as_bytes()),
            HashSubject::Path => digest(origin.path.as_bytes()),
        }
    }

    /// Value recorded in the hash translation store.
    pub fn translation(&self, origin: Origin<'_>) -> Vec<u8> {
        let original = match self.key_format {
            KeyFormat::Name => origin.name,
            KeyFormat::Path => origin.path,
        };
        let mut value = original.as_bytes().to_vec();
        if self.nul_terminate {
            value.push(0);
        }
        value
    }
}

/// Description given to the translation store of `name`.
pub fn translation_description(name: &str) -> String {
    format!("Hash translation of {}", name)
}

/// Original key held in a translation value, without a trailing NUL.
pub fn decode_translation(value: &[u8]) -> String {
    let value = value.strip_suffix(&[0]).unwrap_or(value);
    String::from_utf8_lossy(value).into_owned()
}
