use std::path::PathBuf;

use thiserror::Error;

/// Outcome delivered to a batched caller whose call did not produce a value
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BatchError {
    /// The executor for this single call failed
    #[error("operation {operation} failed: {reason}")]
    Execution { operation: String, reason: String },

    /// The specialized batch path failed as a unit and fallback is disabled
    #[error("batch of {size} {operation} calls failed: {reason}")]
    BatchFailed {
        operation: String,
        size: usize,
        reason: String,
    },

    /// Still queued when the batcher was reset
    #[error("operation rejected: batcher was reset")]
    Reset,

    /// The flush that owned this call went away before settling it
    #[error("operation cancelled: {0}")]
    Cancelled(String),
}

impl BatchError {
    pub fn execution(operation: impl Into<String>, reason: impl ToString) -> Self {
        Self::Execution {
            operation: operation.into(),
            reason: reason.to_string(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, BatchError::Reset | BatchError::Cancelled(_))
    }
}

#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("failed to delete {path}: {source}")]
    Cleanup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid metadata for {key}: {reason}")]
    InvalidMetadata { key: String, reason: String },
}
