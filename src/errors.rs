//! Error handling module
//!
//! Unifies the engine crates' errors with configuration and telemetry
//! failures behind one type for callers of [`crate::SyncContext`].

use std::path::PathBuf;

use mobisync_core_types::SyncError;
use mobisync_resource_center::{BatchError, ResourceError};
use mobisync_wait_engine::WaitError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MobisyncError {
    #[error("failed to read config {path}: {source}")]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to initialise logging: {0}")]
    Telemetry(String),

    #[error(transparent)]
    Wait(#[from] WaitError),

    #[error(transparent)]
    Batch(#[from] BatchError),

    #[error(transparent)]
    Resource(#[from] ResourceError),

    #[error(transparent)]
    Sync(#[from] SyncError),
}

impl MobisyncError {
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    /// Whether the failing call may succeed if issued again
    pub fn is_retryable(&self) -> bool {
        match self {
            MobisyncError::Wait(err) => err.is_retryable(),
            MobisyncError::Batch(err) => err.is_retryable(),
            MobisyncError::Sync(err) => err.is_retryable(),
            MobisyncError::ConfigIo { .. }
            | MobisyncError::InvalidConfig(_)
            | MobisyncError::Telemetry(_)
            | MobisyncError::Resource(_) => false,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, MobisyncError::Wait(err) if err.is_timeout())
    }
}

pub type Result<T> = std::result::Result<T, MobisyncError>;
