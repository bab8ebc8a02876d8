//! Capabilities the bot needs from the chat platform

use async_trait::async_trait;

use crate::error::Result;
use crate::id::{ChannelId, GuildId};

/// A channel as currently seen on the platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    pub id: ChannelId,
    pub name: String,
}

/// The chat platform as seen by the reconciliation loop.
///
/// Implementations map their own failures onto [`crate::PricewatchError`]:
/// `ChannelNotFound` for a channel that no longer exists, `MissingPermission`
/// when the platform refuses for lack of rights, `Platform` for the rest.
#[async_trait]
pub trait ChatPlatform: Send + Sync {
    /// Whether the bot is currently a member of `guild_id`
    fn has_guild(&self, guild_id: GuildId) -> bool;

    /// Every guild the bot is currently a member of
    fn guild_ids(&self) -> Vec<GuildId>;

    /// Look up a channel; `Ok(None)` when it does not exist in that guild
    async fn resolve_channel(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<Option<ChannelInfo>>;

    /// Whether the bot may rename channels anywhere in the guild
    async fn can_manage_channels(&self, guild_id: GuildId) -> Result<bool>;

    async fn rename_channel(&self, guild_id: GuildId, channel_id: ChannelId, name: &str)
    -> Result<()>;
}
