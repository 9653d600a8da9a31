//! Core types shared by every record store.

use crate::error::{Result, StoreError};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Which backend a store's control file describes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Kind {
    /// One file per record.
    File,
    /// Append-only log with an offset index.
    Archive,
    /// Embedded key/value engine (`redb`). Tagged `BerkeleyDB` on disk.
    Database,
    /// Embedded relational engine used as a key/value table.
    Sqlite,
    /// Compression decorator over another kind.
    Compressed,
    /// Virtual view over a subset of another store's keys.
    List,
}

impl Kind {
    /// Tag written to the `Type` property.
    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::File => "File",
            Kind::Archive => "Archive",
            Kind::Database => "BerkeleyDB",
            Kind::Sqlite => "SQLite",
            Kind::Compressed => "Compressed",
            Kind::List => "List",
        }
    }

    /// Kinds that physically hold record bytes.
    pub fn holds_data(&self) -> bool {
        matches!(self, Kind::File | Kind::Archive | Kind::Database | Kind::Sqlite)
    }
}

impl Default for Kind {
    fn default() -> Self {
        Kind::Archive
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Kind {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "File" => Ok(Kind::File),
            "Archive" => Ok(Kind::Archive),
            "BerkeleyDB" | "Database" => Ok(Kind::Database),
            "SQLite" | "Sqlite" => Ok(Kind::Sqlite),
            "Compressed" => Ok(Kind::Compressed),
            "List" => Ok(Kind::List),
            other => Err(StoreError::Strategy(format!(
                "unknown record store type \"{}\"",
                other
            ))),
        }
    }
}

/// How a handle was opened.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    ReadOnly,
    ReadWrite,
}

/// Cursor positioning for [`RecordStore::sequence`](crate::RecordStore::sequence).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Cursor {
    /// Restart from the first record.
    Start,
    /// Advance past the previously returned record.
    #[default]
    Next,
}

/// One stored entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Record {
    pub key: String,
    pub data: Vec<u8>,
}

impl Record {
    pub fn new(key: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            data: data.into(),
        }
    }
}

/// Compression applied by the compressed decorator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompressorKind {
    Lz4,
    Zstd,
}

impl Default for CompressorKind {
    fn default() -> Self {
        CompressorKind::Lz4
    }
}

impl fmt::Display for CompressorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompressorKind::Lz4 => f.write_str("LZ4"),
            CompressorKind::Zstd => f.write_str("Zstd"),
        }
    }
}

impl FromStr for CompressorKind {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "LZ4" | "Lz4" => Ok(CompressorKind::Lz4),
            "Zstd" | "ZSTD" => Ok(CompressorKind::Zstd),
            other => Err(StoreError::Strategy(format!(
                "unknown compressor \"{}\"",
                other
            ))),
        }
    }
}

/// Content digest (SHA-256) used for hashed keys.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Hash(pub [u8; 32]);

impl Hash {
    /// Compute hash from bytes.
    pub fn from_bytes(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Hash(hasher.finalize().into())
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex string.
    pub fn from_hex(s: &str) -> std::result::Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| hex::FromHexError::InvalidStringLength)?;
        Ok(Hash(arr))
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({}...)", &self.to_hex()[..8])
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Hex digest of `data`, the form hashed keys take inside a store.
pub fn digest(data: &[u8]) -> String {
    Hash::from_bytes(data).to_hex()
}

/// Characters a key may never contain.
const FORBIDDEN_KEY_CHARS: &[char] = &['/', '\\', '*', '&'];

/// Reject keys that cannot be stored by every backend.
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(StoreError::Parameter("key is empty".into()));
    }
    if key.trim() != key {
        return Err(StoreError::Parameter(format!(
            "key \"{}\" has leading or trailing whitespace",
            key.escape_debug()
        )));
    }
    if key == "." || key == ".." {
        return Err(StoreError::Parameter(format!("key \"{}\" is reserved", key)));
    }
    if let Some(c) = key
        .chars()
        .find(|c| FORBIDDEN_KEY_CHARS.contains(c) || c.is_control())
    {
        return Err(StoreError::Parameter(format!(
            "key \"{}\" contains invalid character {:?}",
            key.escape_debug(),
            c
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_roundtrip() {
        let hash = Hash::from_bytes(b"hello world");
        let parsed = Hash::from_hex(&hash.to_hex()).unwrap();
        assert_eq!(hash, parsed);
        assert_eq!(digest(b"hello world"), hash.to_hex());
        assert_eq!(digest(b"").len(), 64);
    }

    #[test]
    fn test_kind_tags() {
        for kind in [
            Kind::File,
            Kind::Archive,
            Kind::Database,
            Kind::Sqlite,
            Kind::Compressed,
            Kind::List,
        ] {
            assert_eq!(kind.as_str().parse::<Kind>().unwrap(), kind);
        }
        assert_eq!(Kind::Database.to_string(), "BerkeleyDB");
        assert!("Tape".parse::<Kind>().is_err());
    }

    #[test]
    fn test_validate_key() {
        assert!(validate_key("firstRec").is_ok());
        assert!(validate_key("with space.txt").is_ok());
        for bad in [
            "",
            "/Slash/",
            "\\Back\\slash",
            "*Asterisk*",
            "&Amp&",
            "new\nline",
            ".",
            "..",
            " lead",
            "trail ",
            "\u{3000}wide",
        ] {
            assert!(validate_key(bad).is_err(), "accepted {:?}", bad);
        }
    }
}
