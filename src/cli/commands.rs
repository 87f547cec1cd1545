use clap::Subcommand;

use super::config::ConfigArgs;
use super::profiles::ProfilesArgs;
use super::resolve::ResolveArgs;

#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// Resolve the effective timeout for an operation
    Resolve(ResolveArgs),

    /// List the configured timeout profiles
    Profiles(ProfilesArgs),

    /// Print the effective configuration
    Config(ConfigArgs),
}
