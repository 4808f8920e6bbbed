use thiserror::Error;

/// Errors produced by a [`crate::adapter::KanbanAdapter`] implementation.
///
/// Mirrors the five error kinds from the adapter contract: a caller's bug
/// (`InvalidInput`), a missing record (`NotFound`), a retryable network or
/// subprocess hiccup (`Transient`), an optional capability the adapter
/// doesn't implement (`Unsupported`), and a misconfiguration or security
/// failure that should never be retried (`Fatal`).
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("unsupported operation: {0}")]
    Unsupported(String),

    #[error("fatal adapter error: {0}")]
    Fatal(String),
}

impl AdapterError {
    /// Whether the executor should count this failure against `maxRetries`.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AdapterError::Transient(_))
    }
}
