use anyhow::Result;

use super::commands::Commands;
use super::config::cmd_config;
use super::context::CliContext;
use super::env::CliArgs;
use super::profiles::cmd_profiles;
use super::resolve::cmd_resolve;

/// Run the selected command and return what it prints
pub fn dispatch(cli: &CliArgs, ctx: &CliContext) -> Result<String> {
    match cli.command.clone() {
        Commands::Resolve(args) => cmd_resolve(args, ctx),
        Commands::Profiles(args) => cmd_profiles(args, ctx),
        Commands::Config(args) => cmd_config(args, ctx),
    }
}
