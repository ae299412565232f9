//! Error taxonomy for workflow parsing, rendering, and execution.

/// Errors raised while parsing or running a workflow.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    /// The workflow document could not be parsed as YAML.
    #[error("failed to parse workflow document")]
    Parse(#[source] serde_yaml::Error),
    /// An action named in a step has no registered implementation.
    #[error("invalid action name: {uses}")]
    UnknownAction {
        /// The `uses` value that failed to resolve.
        uses: String,
    },
}

/// Convenience alias for workflow results.
pub type WorkflowResult<T> = Result<T, WorkflowError>;
