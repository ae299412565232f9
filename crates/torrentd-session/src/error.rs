//! Error taxonomy for session supervisor operations.

/// Errors raised by [`crate::SessionSupervisor`] construction and lifecycle methods.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The persistence store rejected an operation.
    #[error("persistence store operation failed")]
    Store(#[source] torrentd_store::StoreError),
    /// The engine rejected an operation.
    #[error("engine operation failed")]
    Engine(#[source] torrentd_engine::EngineError),
}

/// Convenience alias for session supervisor results.
pub type SessionResult<T> = Result<T, SessionError>;
