//! Error types for the observability layer.

/// Errors that can occur during event log operations.
#[derive(Debug, thiserror::Error)]
pub enum ObserveError {
    /// JSON serialization failed.
    #[error("observe serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The event log lock was poisoned by a panicking writer.
    #[error("observe event log lock poisoned")]
    LockPoisoned,
}
