//! Error types for record stores.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Object exists: {0}")]
    ObjectExists(String),

    #[error("Object does not exist: {0}")]
    ObjectDoesNotExist(String),

    #[error("Strategy error: {0}")]
    Strategy(String),

    #[error("File error: {0}")]
    File(String),

    #[error("Parameter error: {0}")]
    Parameter(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store is locked by another handle: {}", .0.display())]
    Locked(PathBuf),

    #[error("Store was opened read-only: {}", .0.display())]
    ReadOnly(PathBuf),
}

/// The coarse error taxonomy every [`StoreError`] folds into.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    ObjectExists,
    ObjectDoesNotExist,
    StrategyError,
    FileError,
    ParameterError,
}

impl StoreError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::ObjectExists(_) => ErrorKind::ObjectExists,
            StoreError::ObjectDoesNotExist(_) => ErrorKind::ObjectDoesNotExist,
            StoreError::File(_) => ErrorKind::FileError,
            StoreError::Parameter(_) => ErrorKind::ParameterError,
            StoreError::Strategy(_)
            | StoreError::Io(_)
            | StoreError::Locked(_)
            | StoreError::ReadOnly(_) => ErrorKind::StrategyError,
        }
    }

    pub(crate) fn missing_key(key: &str) -> Self {
        StoreError::ObjectDoesNotExist(format!("key \"{}\"", key))
    }

    pub(crate) fn duplicate_key(key: &str) -> Self {
        StoreError::ObjectExists(format!("key \"{}\"", key))
    }
}

impl From<rmp_serde::encode::Error> for StoreError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        StoreError::Strategy(format!("index encoding: {}", e))
    }
}

impl From<rmp_serde::decode::Error> for StoreError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        StoreError::Strategy(format!("index decoding: {}", e))
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Strategy(format!("SQLite: {}", e))
    }
}

macro_rules! redb_errors {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for StoreError {
                fn from(e: $ty) -> Self {
                    StoreError::Strategy(format!("redb: {}", e))
                }
            }
        )*
    };
}

redb_errors!(
    redb::Error,
    redb::DatabaseError,
    redb::TransactionError,
    redb::TableError,
    redb::StorageError,
    redb::CommitError,
);

impl From<tempfile::PersistError> for StoreError {
    fn from(e: tempfile::PersistError) -> Self {
        StoreError::File(format!("could not replace {}: {}", e.file.path().display(), e.error))
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_folding() {
        assert_eq!(
            StoreError::missing_key("a").kind(),
            ErrorKind::ObjectDoesNotExist
        );
        assert_eq!(StoreError::duplicate_key("a").kind(), ErrorKind::ObjectExists);
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk");
        assert_eq!(StoreError::from(io).kind(), ErrorKind::StrategyError);
        assert_eq!(
            StoreError::ReadOnly(PathBuf::from("x")).kind(),
            ErrorKind::StrategyError
        );
    }

    #[test]
    fn test_messages_name_the_key() {
        let msg = StoreError::missing_key("beta").to_string();
        assert!(msg.contains("\"beta\""));
    }
}
