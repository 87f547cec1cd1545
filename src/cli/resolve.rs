use anyhow::{bail, Result};
use clap::Args;
use mobisync_wait_engine::TimeoutQuery;
use serde::Serialize;

use super::context::CliContext;
use super::output::render;

#[derive(Args, Clone, Debug)]
pub struct ResolveArgs {
    /// Operation kind, e.g. `click` or `waitForElement`
    #[arg(long)]
    pub operation: String,

    #[arg(long)]
    pub element_type: Option<String>,

    #[arg(long)]
    pub element_id: Option<String>,

    /// Condition kind, e.g. `visible` or `compound`
    #[arg(long)]
    pub condition: Option<String>,

    /// Resolve against this profile instead of the configured one
    #[arg(long)]
    pub profile: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Resolution {
    pub operation: String,
    pub profile: String,
    pub timeout_ms: u64,
}

pub fn resolve(args: &ResolveArgs, ctx: &CliContext) -> Result<Resolution> {
    let resolver = ctx.config().timeouts.build_resolver();
    if let Some(profile) = &args.profile {
        if !resolver.set_active_profile(profile) {
            bail!(
                "unknown timeout profile '{}' (known: {})",
                profile,
                resolver.profile_names().join(", ")
            );
        }
    }

    let query = TimeoutQuery::new(&args.operation)
        .element_type(args.element_type.as_deref())
        .element_id(args.element_id.as_deref())
        .condition(args.condition.as_deref());
    Ok(Resolution {
        operation: args.operation.clone(),
        profile: resolver.active_profile_name(),
        timeout_ms: resolver.resolve(&query),
    })
}

pub fn cmd_resolve(args: ResolveArgs, ctx: &CliContext) -> Result<String> {
    let resolution = resolve(&args, ctx)?;
    render(ctx.output(), &resolution, |r| {
        format!("{}: {}ms (profile {})", r.operation, r.timeout_ms, r.profile)
    })
}
