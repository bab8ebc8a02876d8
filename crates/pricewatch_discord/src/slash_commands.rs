//! Slash command definitions and handlers

use serenity::builder::{
    CreateCommand, CreateCommandOption, CreateEmbed, CreateEmbedFooter, CreateInteractionResponse,
    CreateInteractionResponseMessage, EditInteractionResponse,
};
use serenity::client::Context;
use serenity::model::application::{CommandInteraction, CommandOptionType};
use serenity::model::channel::ChannelType;
use serenity::model::colour::Colour;
use serenity::model::permissions::Permissions;
use tracing::{error, info, warn};

use pricewatch_core::store::{MAX_INTERVAL_MINUTES, MIN_INTERVAL_MINUTES};
use pricewatch_core::{
    EntryOutcome, GuildId, GuildSettings, MappingChange, PricewatchError, PricewatchService,
    TickReport, UpsertOutcome,
};

use crate::platform::{core_channel, core_guild};

pub const ADD_MAPPING: &str = "add-mapping";
pub const REMOVE_MAPPING: &str = "remove-mapping";
pub const LIST_MAPPINGS: &str = "list-mappings";
pub const SET_INTERVAL: &str = "set-interval";
pub const START: &str = "start";
pub const STOP: &str = "stop";

const GENERIC_FAILURE: &str = "⚠️ Something went wrong while handling that command. Please try again later.";

fn renamable_channel_option(description: &str) -> CreateCommandOption {
    CreateCommandOption::new(CommandOptionType::Channel, "channel", description)
        .required(true)
        .channel_types(vec![
            ChannelType::Voice,
            ChannelType::Text,
            ChannelType::Stage,
            ChannelType::News,
        ])
}

fn guild_command(name: &str, description: &str) -> CreateCommand {
    CreateCommand::new(name)
        .description(description)
        .dm_permission(false)
        .default_member_permissions(Permissions::MANAGE_GUILD)
}

/// Create all slash commands for registration
pub fn create_commands() -> Vec<CreateCommand> {
    vec![
        guild_command(ADD_MAPPING, "Show a coin's price in a channel name")
            .add_option(renamable_channel_option("Channel to rename"))
            .add_option(
                CreateCommandOption::new(
                    CommandOptionType::String,
                    "coin",
                    "Coin id from the price catalog, e.g. bitcoin",
                )
                .required(true),
            )
            .add_option(
                CreateCommandOption::new(
                    CommandOptionType::String,
                    "label",
                    "Text shown before the price, e.g. BTC",
                )
                .required(true)
                .max_length(80),
            ),
        guild_command(REMOVE_MAPPING, "Stop showing a price in a channel")
            .add_option(renamable_channel_option("Channel to stop updating")),
        guild_command(LIST_MAPPINGS, "List price channels and the update schedule"),
        guild_command(SET_INTERVAL, "Set how often prices are refreshed").add_option(
            CreateCommandOption::new(
                CommandOptionType::Integer,
                "minutes",
                "Minutes between updates",
            )
            .required(true)
            .min_int_value(u64::from(MIN_INTERVAL_MINUTES))
            .max_int_value(u64::from(MAX_INTERVAL_MINUTES)),
        ),
        guild_command(START, "Start updating price channels"),
        guild_command(STOP, "Stop updating price channels"),
    ]
}

/// Whether the invoking member may manage this server
fn is_authorized(command: &CommandInteraction) -> bool {
    command
        .member
        .as_ref()
        .and_then(|member| member.permissions)
        .map(|p| p.contains(Permissions::MANAGE_GUILD) || p.contains(Permissions::ADMINISTRATOR))
        .unwrap_or(false)
}

/// Message shown to the invoker for a failed command
pub fn failure_message(error: &PricewatchError) -> String {
    if error.is_user_facing() {
        format!("❌ {}", error)
    } else {
        GENERIC_FAILURE.to_string()
    }
}

/// Reply text for a successful add-mapping
pub fn describe_change(change: &MappingChange) -> String {
    let verb = match change.upsert {
        UpsertOutcome::Added { .. } => "Added",
        UpsertOutcome::Replaced { .. } => "Updated",
    };
    let preview = match &change.preview {
        EntryOutcome::Renamed { name } => format!("Channel renamed to `{}`.", name),
        EntryOutcome::Unchanged => "Channel is already up to date.".to_string(),
        EntryOutcome::MissingPrice => {
            "No price is available right now; the next update will retry.".to_string()
        }
        EntryOutcome::ChannelNotFound => "I can't see that channel.".to_string(),
        EntryOutcome::MissingPermission => {
            "I need the **Manage Channels** permission to rename it.".to_string()
        }
        EntryOutcome::RenameFailed { .. } => {
            "Renaming failed for now (Discord may be rate limiting); the next update will retry."
                .to_string()
        }
    };

    format!(
        "✅ {} <#{}>: `{}` as **{}**. {}",
        verb, change.mapping.channel_id, change.mapping.coin, change.mapping.label, preview
    )
}

/// One line per mapping, in processing order
pub fn mappings_description(settings: &GuildSettings) -> String {
    if settings.entries.is_empty() {
        return format!("No price channels yet. Add one with `/{}`.", ADD_MAPPING);
    }
    settings
        .entries
        .iter()
        .enumerate()
        .map(|(i, m)| format!("{}. <#{}> → `{}` as **{}**", i + 1, m.channel_id, m.coin, m.label))
        .collect::<Vec<_>>()
        .join("\n")
}

fn mappings_embed(settings: &GuildSettings, last: Option<&TickReport>) -> CreateEmbed {
    let (status, colour) = if settings.running {
        ("▶️ Running", Colour::from_rgb(100, 200, 100))
    } else {
        ("⏸️ Stopped", Colour::from_rgb(200, 100, 100))
    };

    let mut embed = CreateEmbed::new()
        .title("Price channels")
        .description(mappings_description(settings))
        .colour(colour)
        .field(
            "Interval",
            format!("{} min", settings.interval_minutes),
            true,
        )
        .field("Status", status, true);

    if let Some(report) = last {
        embed = embed
            .field(
                "Last update",
                format!("<t:{}:R>", report.started_at.timestamp()),
                true,
            )
            .footer(CreateEmbedFooter::new(format!(
                "{} renamed, {} skipped",
                report.renamed(),
                report.failed()
            )));
    }
    embed
}

async fn respond(ctx: &Context, command: &CommandInteraction, content: impl Into<String>) {
    if let Err(e) = command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(
                CreateInteractionResponseMessage::new()
                    .content(content)
                    .ephemeral(true),
            ),
        )
        .await
    {
        error!("Cannot respond to /{}: {:?}", command.data.name, e);
    }
}

fn string_option<'a>(command: &'a CommandInteraction, name: &str) -> Option<&'a str> {
    command
        .data
        .options
        .iter()
        .find(|opt| opt.name == name)
        .and_then(|opt| opt.value.as_str())
}

fn channel_option(command: &CommandInteraction) -> Option<pricewatch_core::ChannelId> {
    command
        .data
        .options
        .iter()
        .find(|opt| opt.name == "channel")
        .and_then(|opt| opt.value.as_channel_id())
        .map(core_channel)
}

/// Route a slash command to the service
pub async fn handle_command(ctx: &Context, command: &CommandInteraction, service: &PricewatchService) {
    let Some(guild_id) = command.guild_id.map(core_guild) else {
        respond(ctx, command, "This command only works inside a server.").await;
        return;
    };

    if !is_authorized(command) {
        warn!(
            "User {} tried /{} in guild {} without Manage Server",
            command.user.name, command.data.name, guild_id
        );
        respond(
            ctx,
            command,
            "🚫 You need the **Manage Server** permission to use this command.",
        )
        .await;
        return;
    }

    info!(
        "/{} from {} in guild {}",
        command.data.name, command.user.name, guild_id
    );

    match command.data.name.as_str() {
        ADD_MAPPING => handle_add_mapping(ctx, command, service, guild_id).await,
        REMOVE_MAPPING => {
            let reply = match channel_option(command) {
                Some(channel_id) if service.remove_mapping(guild_id, channel_id) => {
                    format!("🗑️ <#{}> will no longer be updated.", channel_id)
                }
                Some(channel_id) => format!("<#{}> has no price mapping.", channel_id),
                None => failure_message(&PricewatchError::validation(
                    "channel",
                    "a channel is required",
                )),
            };
            respond(ctx, command, reply).await;
        }
        LIST_MAPPINGS => {
            let settings = service.list_mappings(guild_id);
            let last = service.scheduler().last_report(guild_id);
            if let Err(e) = command
                .create_response(
                    &ctx.http,
                    CreateInteractionResponse::Message(
                        CreateInteractionResponseMessage::new()
                            .embed(mappings_embed(&settings, last.as_ref()))
                            .ephemeral(true),
                    ),
                )
                .await
            {
                error!("Cannot respond to /{}: {:?}", LIST_MAPPINGS, e);
            }
        }
        SET_INTERVAL => {
            let minutes = command
                .data
                .options
                .iter()
                .find(|opt| opt.name == "minutes")
                .and_then(|opt| opt.value.as_i64())
                .and_then(|m| u32::try_from(m).ok())
                .unwrap_or(0);
            let reply = match service.set_interval(guild_id, minutes) {
                Ok(()) => format!("⏱️ Prices will refresh every {} min.", minutes),
                Err(e) => {
                    warn!("/{} rejected: {:?}", SET_INTERVAL, e);
                    failure_message(&e)
                }
            };
            respond(ctx, command, reply).await;
        }
        START => {
            let interval = service.list_mappings(guild_id).interval_minutes;
            service.start(guild_id);
            respond(
                ctx,
                command,
                format!("▶️ Updating price channels every {} min.", interval),
            )
            .await;
        }
        STOP => {
            service.stop(guild_id);
            respond(ctx, command, "⏸️ Price updates stopped.").await;
        }
        other => {
            warn!("Unknown command: {}", other);
            respond(ctx, command, "Unknown command.").await;
        }
    }
}

async fn handle_add_mapping(
    ctx: &Context,
    command: &CommandInteraction,
    service: &PricewatchService,
    guild_id: GuildId,
) {
    // Catalog lookup and rename can take a while; defer so the interaction stays valid
    if let Err(e) = command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Defer(CreateInteractionResponseMessage::new().ephemeral(true)),
        )
        .await
    {
        error!("Cannot defer response: {:?}", e);
        return;
    }

    let result = match (
        channel_option(command),
        string_option(command, "coin"),
        string_option(command, "label"),
    ) {
        (Some(channel_id), Some(coin), Some(label)) => {
            service
                .add_or_update_mapping(guild_id, channel_id, coin, label)
                .await
        }
        _ => Err(PricewatchError::validation(
            "arguments",
            "channel, coin and label are all required",
        )),
    };

    let reply = match result {
        Ok(change) => describe_change(&change),
        Err(e) => {
            if e.is_user_facing() {
                info!("/{} rejected: {}", ADD_MAPPING, e);
            } else {
                error!("/{} failed: {:?}", ADD_MAPPING, e);
            }
            failure_message(&e)
        }
    };

    if let Err(e) = command
        .edit_response(&ctx.http, EditInteractionResponse::new().content(reply))
        .await
    {
        error!("Cannot edit deferred response: {:?}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use pricewatch_core::{ChannelId, ChannelMapping};

    fn mapping(channel: u64, coin: &str, label: &str) -> ChannelMapping {
        ChannelMapping {
            channel_id: ChannelId::new(channel),
            coin: coin.to_string(),
            label: label.to_string(),
        }
    }

    #[test]
    fn test_commands_are_guild_only_and_need_manage_server() {
        let commands = create_commands();
        let names: Vec<String> = commands
            .iter()
            .map(|c| serde_json::to_value(c).unwrap()["name"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(
            names,
            vec![ADD_MAPPING, REMOVE_MAPPING, LIST_MAPPINGS, SET_INTERVAL, START, STOP]
        );

        for command in &commands {
            let json = serde_json::to_value(command).unwrap();
            assert_eq!(json["dm_permission"], false);
            assert_eq!(
                json["default_member_permissions"],
                Permissions::MANAGE_GUILD.bits().to_string()
            );
        }
    }

    #[test]
    fn test_interval_option_is_bounded() {
        let set_interval = serde_json::to_value(&create_commands()[3]).unwrap();
        let minutes = &set_interval["options"][0];
        assert_eq!(minutes["min_value"], 1);
        assert_eq!(minutes["max_value"], 1440);
    }

    #[test]
    fn test_validation_failures_are_shown_verbatim() {
        let error = PricewatchError::validation("coin", "'dogecoin2' is not a known coin id");
        assert_eq!(
            failure_message(&error),
            "❌ Invalid coin: 'dogecoin2' is not a known coin id"
        );
    }

    #[test]
    fn test_internal_failures_are_generic() {
        let error = PricewatchError::upstream_msg("https://api.example/coins/list", "HTTP 502");
        let message = failure_message(&error);
        assert_eq!(message, GENERIC_FAILURE);
        assert!(!message.contains("api.example"));
    }

    #[test]
    fn test_describe_change() {
        let change = MappingChange {
            mapping: mapping(123, "bitcoin", "💲 BTC"),
            upsert: UpsertOutcome::Added { index: 0 },
            preview: EntryOutcome::Renamed {
                name: "💲 BTC - $68,420.00".to_string(),
            },
        };
        assert_eq!(
            describe_change(&change),
            "✅ Added <#123>: `bitcoin` as **💲 BTC**. Channel renamed to `💲 BTC - $68,420.00`."
        );

        let change = MappingChange {
            upsert: UpsertOutcome::Replaced { index: 2 },
            preview: EntryOutcome::MissingPermission,
            ..change
        };
        let text = describe_change(&change);
        assert!(text.starts_with("✅ Updated <#123>"));
        assert!(text.contains("Manage Channels"));
    }

    #[test]
    fn test_mappings_description_keeps_order() {
        let settings = GuildSettings {
            entries: vec![mapping(2, "ethereum", "ETH"), mapping(1, "bitcoin", "BTC")],
            ..Default::default()
        };
        assert_eq!(
            mappings_description(&settings),
            "1. <#2> → `ethereum` as **ETH**\n2. <#1> → `bitcoin` as **BTC**"
        );
        assert!(mappings_description(&GuildSettings::default()).contains("/add-mapping"));
    }
}
