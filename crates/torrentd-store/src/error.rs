//! Error types for the persistence store.

use std::error::Error;
use std::fmt::{self, Display, Formatter};

/// Result alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors raised by the persistence store.
#[derive(Debug)]
pub enum StoreError {
    /// Opening or migrating the database failed.
    Connect {
        /// Underlying SQL error.
        source: sqlx::Error,
    },
    /// A migration failed to apply.
    MigrationFailed {
        /// Index of the migration that failed.
        index: usize,
        /// Underlying SQL error.
        source: sqlx::Error,
    },
    /// A database operation failed.
    QueryFailed {
        /// Operation identifier.
        operation: &'static str,
        /// Underlying SQL error.
        source: sqlx::Error,
    },
    /// `Insert` was called for an info hash already present in the store.
    DuplicateKey {
        /// Conflicting key, in its canonical string form.
        info_hash: String,
    },
    /// A persisted row could not be decoded back into a `TorrentRecord`.
    Decode {
        /// Field that failed to decode.
        field: &'static str,
    },
}

impl Display for StoreError {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect { .. } => formatter.write_str("failed to open or migrate the store"),
            Self::MigrationFailed { index, .. } => {
                write!(formatter, "migration {index} failed to apply")
            }
            Self::QueryFailed { .. } => formatter.write_str("database operation failed"),
            Self::DuplicateKey { info_hash } => {
                write!(formatter, "torrent '{info_hash}' already exists")
            }
            Self::Decode { field } => write!(formatter, "could not decode field '{field}'"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Connect { source } | Self::MigrationFailed { source, .. } | Self::QueryFailed { source, .. } => {
                Some(source)
            }
            Self::DuplicateKey { .. } | Self::Decode { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_key_display_names_the_hash() {
        let err = StoreError::DuplicateKey {
            info_hash: "deadbeef".to_string(),
        };
        assert_eq!(err.to_string(), "torrent 'deadbeef' already exists");
        assert!(err.source().is_none());
    }

    #[test]
    fn query_failed_exposes_source() {
        let err = StoreError::QueryFailed {
            operation: "insert",
            source: sqlx::Error::RowNotFound,
        };
        assert!(err.source().is_some());
    }
}
