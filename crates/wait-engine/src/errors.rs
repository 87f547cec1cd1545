//! Error types for the synchronization engine

use mobisync_core_types::SyncError;
use thiserror::Error;

/// Failures surfaced by waits and condition evaluation
#[derive(Debug, Error, Clone)]
pub enum WaitError {
    /// Wait budget exhausted without the condition being met
    #[error("Wait timeout after {elapsed_ms}ms (budget {timeout_ms}ms, {attempts} checks): {message}")]
    Timeout {
        message: String,
        elapsed_ms: u64,
        timeout_ms: u64,
        attempts: u32,
    },

    /// Caller-supplied predicate or condition failed
    #[error("Predicate evaluation failed: {0}")]
    Predicate(String),

    /// Condition tree names a comparison kind that does not exist
    #[error("Unknown condition kind: {0}")]
    UnknownConditionKind(String),

    /// Condition tree is malformed (e.g. `not` without exactly one child)
    #[error("Invalid condition: {0}")]
    InvalidCondition(String),

    /// UI state before/after the wait did not match the expectation
    #[error("State verification failed: {0}")]
    StateMismatch(String),

    /// Collaborator failure while locating or reading an element
    #[error("Locator error: {0}")]
    Locator(#[from] SyncError),
}

impl WaitError {
    pub fn predicate(message: impl Into<String>) -> Self {
        WaitError::Predicate(message.into())
    }

    /// Timeout signals are never re-raised from inside a strict polling loop
    pub fn is_timeout(&self) -> bool {
        matches!(self, WaitError::Timeout { .. })
    }

    /// Malformed input, always a hard failure regardless of strict mode
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            WaitError::UnknownConditionKind(_) | WaitError::InvalidCondition(_)
        )
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            WaitError::Timeout { .. } => true,
            WaitError::Locator(err) => err.is_retryable(),
            _ => false,
        }
    }

    /// Get error severity level (0=low, 1=medium, 2=high, 3=critical)
    pub fn severity(&self) -> u8 {
        match self {
            WaitError::UnknownConditionKind(_) | WaitError::InvalidCondition(_) => 3,
            WaitError::StateMismatch(_) => 2,
            WaitError::Timeout { .. } | WaitError::Locator(_) => 1,
            WaitError::Predicate(_) => 0,
        }
    }
}
