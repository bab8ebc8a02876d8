//! Pricewatch Discord - gateway, slash commands and channel renames
//!
//! Wires a [`PricewatchService`] to Discord: [`SerenityPlatform`] renames
//! channels over HTTP, [`PricewatchHandler`] follows guild membership and
//! answers the slash commands.

pub mod error;
pub mod handler;
pub mod platform;
pub mod slash_commands;

use std::sync::Arc;

use serenity::Client;
use serenity::all::GatewayIntents;
use tracing::{info, warn};

use pricewatch_core::{PricewatchConfig, PricewatchService};

pub use error::{DiscordError, Result};
pub use handler::PricewatchHandler;
pub use platform::SerenityPlatform;

// Re-export serenity for convenience
pub use serenity;

/// Create the Discord client and the service it drives (without starting it)
pub async fn create_discord_client(
    config: &PricewatchConfig,
) -> Result<(Client, Arc<PricewatchService>)> {
    let token = config.discord.token.trim();
    if token.is_empty() {
        return Err(DiscordError::MissingToken);
    }

    let platform = Arc::new(SerenityPlatform::new(token));
    let service = Arc::new(PricewatchService::from_config(config, platform.clone())?);
    let handler = PricewatchHandler::new(service.clone(), platform);

    // Membership events only; renames and permission checks go over HTTP
    let intents = GatewayIntents::GUILDS;

    let mut client_builder = Client::builder(token, intents).event_handler(handler);
    if let Some(app_id) = config.discord.application_id.filter(|id| *id != 0) {
        client_builder = client_builder.application_id(app_id.into());
    }

    let client = client_builder
        .await
        .map_err(|cause| DiscordError::ClientFailed {
            cause,
            token_preview: error::token_preview(token),
        })?;

    Ok((client, service))
}

/// Create and run the bot until Ctrl-C
pub async fn run_discord_bot(config: &PricewatchConfig) -> Result<()> {
    let (mut client, service) = create_discord_client(config).await?;

    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Cannot listen for Ctrl-C: {}", e);
            return;
        }
        info!("Shutting down");
        shard_manager.shutdown_all().await;
    });

    info!("Starting Discord bot...");
    let result = client.start().await;
    service.shutdown();

    result.map_err(|cause| DiscordError::ClientFailed {
        cause,
        token_preview: error::token_preview(&config.discord.token),
    })
}
