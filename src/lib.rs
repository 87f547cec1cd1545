//! mobisync
//!
//! Synchronization and resource management for remote mobile UI automation.
//! The engines live in the workspace crates; this crate loads configuration,
//! installs logging and wires everything into a [`SyncContext`].

pub mod app_context;
pub mod cli;
pub mod config;
pub mod errors;
pub mod telemetry;

pub use app_context::{ElementWaitResult, SyncContext};
pub use config::{
    default_search_paths, load_config, load_config_with_options, LoadOptions, LoggingConfig,
    SyncConfig, TimeoutSettings,
};
pub use errors::{MobisyncError, Result};
pub use telemetry::init_tracing;

pub use mobisync_core_types as core_types;
pub use mobisync_resource_center as resource_center;
pub use mobisync_wait_engine as wait_engine;
