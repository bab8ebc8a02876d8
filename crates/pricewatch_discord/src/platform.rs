//! [`ChatPlatform`] over serenity's HTTP client
//!
//! Guild membership is tracked from gateway events, everything else is asked
//! of the REST API when needed. No serenity cache is involved.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serenity::builder::EditChannel;
use serenity::http::{Http, HttpError};
use serenity::model::channel::Channel;
use serenity::model::id::{
    ChannelId as DiscordChannelId, GuildId as DiscordGuildId, RoleId, UserId,
};
use serenity::model::permissions::Permissions;
use tokio::sync::OnceCell;
use tracing::debug;

use pricewatch_core::platform::{ChannelInfo, ChatPlatform};
use pricewatch_core::{ChannelId, GuildId, PricewatchError, Result};

/// Discord's snowflakes are never zero; serenity ids panic on it
pub(crate) fn discord_guild(id: GuildId) -> Option<DiscordGuildId> {
    (id.get() != 0).then(|| DiscordGuildId::new(id.get()))
}

pub(crate) fn discord_channel(id: ChannelId) -> Option<DiscordChannelId> {
    (id.get() != 0).then(|| DiscordChannelId::new(id.get()))
}

pub(crate) fn core_guild(id: DiscordGuildId) -> GuildId {
    GuildId::new(id.get())
}

pub(crate) fn core_channel(id: DiscordChannelId) -> ChannelId {
    ChannelId::new(id.get())
}

/// HTTP status of a failed Discord request, if it got that far
fn http_status(error: &serenity::Error) -> Option<u16> {
    match error {
        serenity::Error::Http(HttpError::UnsuccessfulRequest(response)) => {
            Some(response.status_code.as_u16())
        }
        _ => None,
    }
}

/// A failed channel lookup: `Ok(None)` only when the channel does not exist
fn channel_lookup_failure(
    channel_id: ChannelId,
    status: Option<u16>,
    error: serenity::Error,
) -> Result<Option<ChannelInfo>> {
    match status {
        Some(404) => Ok(None),
        Some(403) => Err(PricewatchError::platform(
            format!("view channel {} (missing View Channel)", channel_id),
            error,
        )),
        _ => Err(PricewatchError::platform(
            format!("get channel {}", channel_id),
            error,
        )),
    }
}

/// Guild-wide permissions of a member: @everyone plus every role they hold.
///
/// Owners and administrators implicitly have everything.
pub fn guild_permissions(
    is_owner: bool,
    everyone: Permissions,
    roles: impl IntoIterator<Item = Permissions>,
) -> Permissions {
    if is_owner {
        return Permissions::all();
    }
    let permissions = roles.into_iter().fold(everyone, |acc, p| acc | p);
    if permissions.contains(Permissions::ADMINISTRATOR) {
        Permissions::all()
    } else {
        permissions
    }
}

pub struct SerenityPlatform {
    http: Arc<Http>,
    guilds: RwLock<HashSet<GuildId>>,
    bot_user: OnceCell<UserId>,
}

impl std::fmt::Debug for SerenityPlatform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerenityPlatform")
            .field("guilds", &self.guilds.read().len())
            .field("bot_user", &self.bot_user.get())
            .finish()
    }
}

impl SerenityPlatform {
    /// Own HTTP client for the given bot token
    pub fn new(token: &str) -> Self {
        Self::with_http(Arc::new(Http::new(token)))
    }

    pub fn with_http(http: Arc<Http>) -> Self {
        Self {
            http,
            guilds: RwLock::new(HashSet::new()),
            bot_user: OnceCell::new(),
        }
    }

    pub fn http(&self) -> &Arc<Http> {
        &self.http
    }

    pub fn set_bot_user(&self, user_id: UserId) {
        let _ = self.bot_user.set(user_id);
    }

    pub fn record_guild(&self, guild_id: GuildId) -> bool {
        self.guilds.write().insert(guild_id)
    }

    pub fn forget_guild(&self, guild_id: GuildId) -> bool {
        self.guilds.write().remove(&guild_id)
    }

    /// Replace the membership set, as on a fresh `ready`
    pub fn replace_guilds(&self, guilds: impl IntoIterator<Item = GuildId>) {
        *self.guilds.write() = guilds.into_iter().collect();
    }

    async fn bot_user_id(&self) -> Result<UserId> {
        self.bot_user
            .get_or_try_init(|| async {
                self.http
                    .get_current_user()
                    .await
                    .map(|user| user.id)
                    .map_err(|e| PricewatchError::platform("get current user", e))
            })
            .await
            .copied()
    }

    fn map_rename_error(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        e: serenity::Error,
    ) -> PricewatchError {
        match http_status(&e) {
            Some(404) => PricewatchError::ChannelNotFound {
                guild_id,
                channel_id,
            },
            Some(403) => PricewatchError::MissingPermission {
                permission: "Manage Channels".to_string(),
                guild_id,
            },
            _ => PricewatchError::platform(format!("rename channel {}", channel_id), e),
        }
    }
}

#[async_trait]
impl ChatPlatform for SerenityPlatform {
    fn has_guild(&self, guild_id: GuildId) -> bool {
        self.guilds.read().contains(&guild_id)
    }

    fn guild_ids(&self) -> Vec<GuildId> {
        let mut ids: Vec<_> = self.guilds.read().iter().copied().collect();
        ids.sort();
        ids
    }

    async fn resolve_channel(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<Option<ChannelInfo>> {
        let Some(channel) = discord_channel(channel_id) else {
            return Ok(None);
        };

        match self.http.get_channel(channel).await {
            Ok(Channel::Guild(channel)) if core_guild(channel.guild_id) == guild_id => {
                Ok(Some(ChannelInfo {
                    id: channel_id,
                    name: channel.name,
                }))
            }
            Ok(_) => Ok(None),
            Err(e) => channel_lookup_failure(channel_id, http_status(&e), e),
        }
    }

    async fn can_manage_channels(&self, guild_id: GuildId) -> Result<bool> {
        let Some(guild) = discord_guild(guild_id) else {
            return Ok(false);
        };
        let bot = self.bot_user_id().await?;

        let partial = self
            .http
            .get_guild(guild)
            .await
            .map_err(|e| PricewatchError::platform(format!("get guild {}", guild_id), e))?;
        let member = self
            .http
            .get_member(guild, bot)
            .await
            .map_err(|e| PricewatchError::platform(format!("get member in {}", guild_id), e))?;

        // @everyone shares its id with the guild
        let everyone = partial
            .roles
            .get(&RoleId::new(guild.get()))
            .map(|role| role.permissions)
            .unwrap_or_else(Permissions::empty);
        let permissions = guild_permissions(
            partial.owner_id == bot,
            everyone,
            member
                .roles
                .iter()
                .filter_map(|id| partial.roles.get(id))
                .map(|role| role.permissions),
        );

        debug!("Bot permissions in guild {}: {:?}", guild_id, permissions);
        Ok(permissions.contains(Permissions::MANAGE_CHANNELS))
    }

    async fn rename_channel(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        name: &str,
    ) -> Result<()> {
        let Some(channel) = discord_channel(channel_id) else {
            return Err(PricewatchError::ChannelNotFound {
                guild_id,
                channel_id,
            });
        };

        channel
            .edit(
                &self.http,
                EditChannel::new()
                    .name(name)
                    .audit_log_reason("Price update"),
            )
            .await
            .map(|_| ())
            .map_err(|e| self.map_rename_error(guild_id, channel_id, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_hidden_channel_is_not_reported_missing() {
        let channel = ChannelId::new(55);
        assert!(matches!(
            channel_lookup_failure(channel, Some(404), serenity::Error::Other("unknown channel")),
            Ok(None)
        ));

        let hidden =
            channel_lookup_failure(channel, Some(403), serenity::Error::Other("missing access"))
                .unwrap_err();
        match hidden {
            PricewatchError::Platform { operation, .. } => {
                assert_eq!(operation, "view channel 55 (missing View Channel)")
            }
            other => panic!("expected a platform error, got {:?}", other),
        }

        assert!(channel_lookup_failure(channel, None, serenity::Error::Other("timeout")).is_err());
    }

    #[test]
    fn test_permissions_union_roles_with_everyone() {
        let permissions = guild_permissions(
            false,
            Permissions::VIEW_CHANNEL,
            [Permissions::MANAGE_CHANNELS, Permissions::SEND_MESSAGES],
        );
        assert!(permissions.contains(Permissions::MANAGE_CHANNELS | Permissions::VIEW_CHANNEL));
        assert!(!permissions.contains(Permissions::MANAGE_GUILD));
    }

    #[test]
    fn test_administrator_grants_everything() {
        let permissions =
            guild_permissions(false, Permissions::empty(), [Permissions::ADMINISTRATOR]);
        assert!(permissions.contains(Permissions::MANAGE_CHANNELS));
    }

    #[test]
    fn test_owner_grants_everything() {
        let permissions = guild_permissions(true, Permissions::empty(), []);
        assert_eq!(permissions, Permissions::all());
    }

    #[test]
    fn test_no_roles_means_everyone_only() {
        let permissions = guild_permissions(false, Permissions::SEND_MESSAGES, []);
        assert!(!permissions.contains(Permissions::MANAGE_CHANNELS));
    }

    #[test]
    fn test_zero_ids_do_not_convert() {
        assert!(discord_guild(GuildId::new(0)).is_none());
        assert!(discord_channel(ChannelId::new(0)).is_none());
        assert_eq!(
            discord_channel(ChannelId::new(42)).map(core_channel),
            Some(ChannelId::new(42))
        );
    }

    #[test]
    fn test_membership_tracking() {
        let platform = SerenityPlatform::new("Bot test-token");
        assert!(platform.record_guild(GuildId::new(2)));
        assert!(!platform.record_guild(GuildId::new(2)));
        platform.replace_guilds([GuildId::new(5), GuildId::new(3)]);
        assert_eq!(platform.guild_ids(), vec![GuildId::new(3), GuildId::new(5)]);
        assert!(!platform.has_guild(GuildId::new(2)));
        assert!(platform.forget_guild(GuildId::new(3)));
        assert!(!platform.has_guild(GuildId::new(3)));
    }
}
