use anyhow::Result;
use clap::ValueEnum;
use serde::Serialize;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Human,
    Json,
    Yaml,
}

/// Render `value` for the chosen format; `human` supplies the plain-text form
pub fn render<T, F>(format: OutputFormat, value: &T, human: F) -> Result<String>
where
    T: Serialize,
    F: FnOnce(&T) -> String,
{
    Ok(match format {
        OutputFormat::Human => human(value),
        OutputFormat::Json => serde_json::to_string_pretty(value)?,
        OutputFormat::Yaml => serde_yaml::to_string(value)?,
    })
}
