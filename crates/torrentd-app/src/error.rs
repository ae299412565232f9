//! Application-level error type for the bootstrap binary.
//!
//! # Design
//! - Centralizes bootstrap errors; operation identifiers ride along as fields rather
//!   than being interpolated into the message string.
//! - `anyhow` takes over at [`crate::bootstrap::run_app`]'s boundary and in tests; this
//!   type only carries errors surfaced by the typed crates it wires together.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result alias for application operations.
pub type AppResult<T> = Result<T, AppError>;

/// Application-level error type.
#[derive(Debug, Error)]
pub enum AppError {
    /// Configuration loading failed.
    #[error("configuration operation failed")]
    Config {
        /// Operation identifier.
        operation: &'static str,
        /// Source configuration error.
        source: torrentd_config::ConfigError,
    },
    /// Persistence store operations failed.
    #[error("persistence store operation failed")]
    Store {
        /// Operation identifier.
        operation: &'static str,
        /// Source store error.
        source: torrentd_store::StoreError,
    },
    /// Session supervisor operations failed.
    #[error("session supervisor operation failed")]
    Session {
        /// Operation identifier.
        operation: &'static str,
        /// Source session error.
        source: torrentd_session::SessionError,
    },
}

impl AppError {
    pub(crate) const fn config(operation: &'static str, source: torrentd_config::ConfigError) -> Self {
        Self::Config { operation, source }
    }

    pub(crate) const fn store(operation: &'static str, source: torrentd_store::StoreError) -> Self {
        Self::Store { operation, source }
    }

    pub(crate) const fn session(operation: &'static str, source: torrentd_session::SessionError) -> Self {
        Self::Session { operation, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_error_helpers_build_variants() {
        let config = AppError::config(
            "config.load",
            torrentd_config::ConfigError::Read {
                path: PathBuf::from("torrentd.toml"),
                source: io::Error::other("boom"),
            },
        );
        assert!(matches!(config, AppError::Config { .. }));

        let store = AppError::store(
            "store.open",
            torrentd_store::StoreError::Connect {
                source: sqlx::Error::RowNotFound,
            },
        );
        assert!(matches!(store, AppError::Store { .. }));
    }
}
