use std::sync::Arc;

use serenity::all::Command;
use serenity::async_trait;
use serenity::client::{Context, EventHandler};
use serenity::model::application::Interaction;
use serenity::model::gateway::Ready;
use serenity::model::guild::{Guild, UnavailableGuild};
use tracing::{debug, error, info, warn};

use pricewatch_core::PricewatchService;

use crate::error::DiscordError;
use crate::platform::{SerenityPlatform, core_guild};
use crate::slash_commands;

/// Gateway event handler: keeps guild membership and timers in step and
/// serves the slash commands
pub struct PricewatchHandler {
    service: Arc<PricewatchService>,
    platform: Arc<SerenityPlatform>,
}

impl PricewatchHandler {
    pub fn new(service: Arc<PricewatchService>, platform: Arc<SerenityPlatform>) -> Self {
        Self { service, platform }
    }
}

#[async_trait]
impl EventHandler for PricewatchHandler {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!(
            "{} is connected to {} guilds",
            ready.user.name,
            ready.guilds.len()
        );

        self.platform.set_bot_user(ready.user.id);
        self.platform
            .replace_guilds(ready.guilds.iter().map(|g| core_guild(g.id)));

        for command in slash_commands::create_commands() {
            let command_name = serde_json::to_value(&command)
                .ok()
                .and_then(|v| v["name"].as_str().map(str::to_string))
                .unwrap_or_default();
            if let Err(cause) = Command::create_global_command(&ctx.http, command).await {
                let report = miette::Report::new(DiscordError::CommandRegistrationFailed {
                    command_name,
                    cause,
                });
                error!("Cannot create slash command: {:?}", report);
            }
        }

        // Also runs after a reconnect; guilds whose timers are alive are left alone
        self.service.resume();
    }

    async fn guild_create(&self, _ctx: Context, guild: Guild, is_new: Option<bool>) {
        let guild_id = core_guild(guild.id);
        let first_seen = self.platform.record_guild(guild_id);
        if is_new == Some(true) {
            info!("Joined guild {} ({})", guild.name, guild_id);
        } else if first_seen {
            debug!("Guild {} ({}) became available", guild.name, guild_id);
        }
        self.service.guild_joined(guild_id);
    }

    async fn guild_delete(&self, _ctx: Context, incomplete: UnavailableGuild, _full: Option<Guild>) {
        let guild_id = core_guild(incomplete.id);
        if incomplete.unavailable {
            // Outage, not a departure: the timer keeps running and ticks until it is back
            warn!("Guild {} is temporarily unavailable", guild_id);
            return;
        }

        info!("Removed from guild {}", guild_id);
        self.platform.forget_guild(guild_id);
        self.service.guild_left(guild_id);
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        if let Interaction::Command(command) = interaction {
            slash_commands::handle_command(&ctx, &command, &self.service).await;
        }
    }
}
