use std::path::{Path, PathBuf};

use crate::config::SyncConfig;

use super::output::OutputFormat;

pub struct CliContext {
    config: SyncConfig,
    config_path: Option<PathBuf>,
    output: OutputFormat,
}

impl CliContext {
    pub fn new(config: SyncConfig, config_path: Option<PathBuf>, output: OutputFormat) -> Self {
        Self {
            config,
            config_path,
            output,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Explicit `--config` path, if one was given
    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    pub fn output(&self) -> OutputFormat {
        self.output
    }
}
