use std::path::Path;

use comfy_table::{Table, presets};
use miette::Result;
use owo_colors::OwoColorize;
use pricewatch_core::store::{JsonFileBackend, StoreBackend};
use pricewatch_core::{GuildId, GuildSettings};

use crate::output::Output;

fn settings_table(settings: &GuildSettings) -> Table {
    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_header(vec!["#", "Channel", "Coin", "Label"]);
    for (i, mapping) in settings.entries.iter().enumerate() {
        table.add_row(vec![
            (i + 1).to_string(),
            mapping.channel_id.to_string(),
            mapping.coin.clone(),
            mapping.label.clone(),
        ]);
    }
    table
}

/// Print persisted mappings without connecting to Discord
pub async fn list(store_path: &Path, guild: Option<GuildId>) -> Result<()> {
    let output = Output::new();

    if !store_path.exists() {
        output.warning(&format!("No guild store at {}", store_path.display()));
        return Ok(());
    }

    let backend = JsonFileBackend::new(store_path);
    let doc = backend.load()?;

    let guilds: Vec<_> = doc
        .guilds
        .iter()
        .filter(|(id, _)| guild.is_none_or(|g| g == **id))
        .collect();

    if guilds.is_empty() {
        output.status("No guilds configured");
        return Ok(());
    }

    for (guild_id, settings) in guilds {
        output.section(&format!("Guild {}", guild_id));
        output.kv("Interval", &format!("{} min", settings.interval_minutes));
        output.kv(
            "Status",
            &if settings.running {
                "running".bright_green().to_string()
            } else {
                "stopped".bright_red().to_string()
            },
        );
        if settings.entries.is_empty() {
            output.status("No mappings");
        } else {
            println!("{}", settings_table(settings));
        }
    }

    Ok(())
}
