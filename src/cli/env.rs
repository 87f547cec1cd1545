use clap::Parser;
use std::path::PathBuf;

use super::commands::Commands;
use super::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct CliArgs {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Log level, overrides `logging.level` from the configuration
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "human", global = true)]
    pub output: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}
