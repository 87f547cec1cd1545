use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, error};

use super::context::CliContext;
use super::dispatch::dispatch;
use super::env::CliArgs;
use crate::config::load_config;
use crate::telemetry::init_tracing;

pub fn run() -> Result<()> {
    let cli = CliArgs::parse();

    let mut config = load_config(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    init_tracing(&config.logging).context("Failed to initialise logging")?;
    debug!(version = env!("CARGO_PKG_VERSION"), "Starting mobisync");

    let ctx = CliContext::new(config, cli.config.clone(), cli.output);
    match dispatch(&cli, &ctx) {
        Ok(rendered) => {
            println!("{}", rendered.trim_end());
            Ok(())
        }
        Err(err) => {
            error!("Command failed: {:#}", err);
            Err(err)
        }
    }
}
