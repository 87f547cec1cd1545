use anyhow::{anyhow, Result};
use clap::Args;
use serde_json::Value;

use super::context::CliContext;
use super::output::OutputFormat;

#[derive(Args, Clone, Debug, Default)]
pub struct ConfigArgs {
    /// Print a single section, e.g. `polling` or `batching`
    #[arg(long)]
    pub section: Option<String>,
}

pub fn cmd_config(args: ConfigArgs, ctx: &CliContext) -> Result<String> {
    let document = serde_json::to_value(ctx.config())?;
    let selected = match &args.section {
        Some(section) => document
            .get(section.as_str())
            .cloned()
            .ok_or_else(|| anyhow!("unknown configuration section '{section}'"))?,
        None => document,
    };

    let source = match ctx.config_path() {
        Some(path) => format!("# effective configuration ({})\n", path.display()),
        None => "# effective configuration\n".to_string(),
    };
    Ok(match ctx.output() {
        OutputFormat::Json => serde_json::to_string_pretty(&selected)?,
        OutputFormat::Yaml => serde_yaml::to_string(&selected)?,
        OutputFormat::Human => format!("{source}{}", serde_yaml::to_string(&selected)?),
    })
}

/// Dotted lookup into a rendered configuration, used by tests and scripts
pub fn lookup<'a>(document: &'a Value, key: &str) -> Option<&'a Value> {
    key.split('.')
        .filter(|segment| !segment.is_empty())
        .try_fold(document, |current, segment| current.get(segment))
}
