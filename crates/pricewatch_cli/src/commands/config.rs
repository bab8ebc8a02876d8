use std::path::Path;

use miette::{IntoDiagnostic, Result};
use owo_colors::OwoColorize;
use pricewatch_core::config::{self, PricewatchConfig};

use crate::output::Output;

/// Copy of the config that is safe to print
fn redacted(config: &PricewatchConfig) -> PricewatchConfig {
    let mut shown = config.clone();
    if !shown.discord.token.is_empty() {
        shown.discord.token = "<redacted>".to_string();
    }
    if shown.price.api_key.is_some() {
        shown.price.api_key = Some("<redacted>".to_string());
    }
    shown
}

/// Show current configuration
pub async fn show(config: &PricewatchConfig) -> Result<()> {
    let output = Output::new();

    output.section("Current Configuration");
    println!();

    let toml_str = toml::to_string_pretty(&redacted(config)).into_diagnostic()?;
    println!("{}", toml_str);

    Ok(())
}

/// Write a configuration file, refusing to clobber an existing one
pub async fn init(config: &PricewatchConfig, path: &Path, force: bool) -> Result<()> {
    let output = Output::new();

    if path.exists() && !force {
        output.warning(&format!(
            "{} already exists; pass --force to overwrite it",
            path.display()
        ));
        return Ok(());
    }

    // Secrets belong in the environment, not in a file that may be committed
    let mut to_save = config.clone();
    to_save.discord.token.clear();
    to_save.price.api_key = None;

    config::save_config(&to_save, path).await?;

    output.success(&format!("Configuration written to {}", path.display()));
    println!();
    println!("Set DISCORD_TOKEN in the environment or a .env file, then run:");
    println!(
        "  {} --config {} run",
        "pricewatch".bright_green(),
        path.display()
    );

    Ok(())
}
