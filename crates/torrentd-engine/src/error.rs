//! Error taxonomy for engine adapters.

use crate::types::InfoHash;

/// Errors surfaced by an [`crate::EngineSession`] or [`crate::EngineTorrentHandle`].
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The engine rejected a torrent admission request.
    #[error("engine rejected torrent '{info_hash}': {reason}")]
    AddRejected {
        /// Torrent that was rejected.
        info_hash: InfoHash,
        /// Engine-reported reason.
        reason: String,
    },
    /// An operation was invoked against a handle the engine no longer recognizes.
    #[error("torrent handle '{info_hash}' is no longer valid")]
    InvalidHandle {
        /// Torrent whose handle was stale.
        info_hash: InfoHash,
    },
    /// An operation is not supported by this engine implementation.
    #[error("operation '{operation}' is not supported by this engine")]
    Unsupported {
        /// Name of the unsupported operation.
        operation: &'static str,
    },
    /// A lower-level engine failure occurred.
    #[error("engine operation failed: {0}")]
    Engine(String),
}

/// Convenience alias for engine operation results.
pub type EngineResult<T> = Result<T, EngineError>;
