use anyhow::Result;
use clap::Args;
use serde::Serialize;

use super::context::CliContext;
use super::output::render;

#[derive(Args, Clone, Debug, Default)]
pub struct ProfilesArgs {
    /// Include every resolved timeout table
    #[arg(long)]
    pub verbose: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileSummary {
    pub name: String,
    pub active: bool,
    pub global_ms: u64,
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operations: Option<std::collections::BTreeMap<String, u64>>,
}

pub fn summarize(args: &ProfilesArgs, ctx: &CliContext) -> Vec<ProfileSummary> {
    let resolver = ctx.config().timeouts.build_resolver();
    let active = resolver.active_profile_name();
    resolver
        .profile_names()
        .into_iter()
        .filter_map(|name| resolver.profile(&name))
        .map(|profile| ProfileSummary {
            active: profile.name == active,
            global_ms: profile.config.global,
            operations: args
                .verbose
                .then(|| profile.config.operation.clone().into_iter().collect()),
            description: profile.description,
            name: profile.name,
        })
        .collect()
}

pub fn cmd_profiles(args: ProfilesArgs, ctx: &CliContext) -> Result<String> {
    let profiles = summarize(&args, ctx);
    render(ctx.output(), &profiles, |profiles| {
        let mut lines = Vec::with_capacity(profiles.len());
        for profile in profiles {
            let marker = if profile.active { "*" } else { " " };
            let mut line = format!("{marker} {} (global {}ms)", profile.name, profile.global_ms);
            if let Some(description) = &profile.description {
                line.push_str(&format!(" - {description}"));
            }
            lines.push(line);
            for (operation, ms) in profile.operations.iter().flatten() {
                lines.push(format!("    {operation}: {ms}ms"));
            }
        }
        lines.join("\n")
    })
}
