//! Shared primitives for the mobisync synchronization core
//!
//! Holds the error type, identifiers, locator strategies and the collaborator
//! ports (element locator, UI-state snapshot service) that the wait engine and
//! the resource center consume. Concrete device drivers live outside this
//! workspace; `memory` provides in-process implementations for tests and
//! early integration.

pub mod memory;
pub mod ports;
mod strategy;

use thiserror::Error;
use uuid::Uuid;

pub use ports::*;
pub use strategy::LocatorStrategy;

/// Error surfaced by collaborator calls against the remote device driver.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// No element matched the locator
    #[error("element not found: {0}")]
    NotFound(String),

    /// A previously located element is no longer attached to the UI tree
    #[error("stale element: {0}")]
    Stale(String),

    /// The device driver rejected or failed the call
    #[error("driver error: {0}")]
    Driver(String),

    /// Local I/O failure
    #[error("io error: {0}")]
    Io(String),

    #[error("{message}")]
    Message { message: String },
}

impl SyncError {
    pub fn new(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }

    /// Transient failures that a polling loop may retry through
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::NotFound(_) | SyncError::Stale(_) | SyncError::Driver(_)
        )
    }
}

#[cfg_attr(feature = "serde-full", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct OperationId(pub String);

impl OperationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}
