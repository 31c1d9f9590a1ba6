use anyhow::{Context, Result};
use testsql::config::{Config, ConfigInput};

/// Print the effective configuration as YAML
pub async fn cmd_config(config: &Config) -> Result<()> {
    print!("{}", render_config(config)?);
    Ok(())
}

fn render_config(config: &Config) -> Result<String> {
    serde_yaml::to_string(&ConfigInput::from(config)).context("Failed to serialize configuration")
}
