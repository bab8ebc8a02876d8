//! Reconciliation: make one guild's channel names match current prices

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::PricewatchError;
use crate::format::channel_name;
use crate::id::{ChannelId, GuildId};
use crate::platform::ChatPlatform;
use crate::price::{PriceSource, Prices};
use crate::store::{ChannelMapping, GuildStore};

/// What happened to one mapping during a tick
#[derive(Debug, Clone, PartialEq)]
pub enum EntryOutcome {
    /// The channel was renamed to `name`
    Renamed { name: String },
    /// The channel already showed the current price
    Unchanged,
    /// No usable price for the coin this tick
    MissingPrice,
    /// The channel no longer exists; the mapping is kept
    ChannelNotFound,
    /// The bot cannot rename channels in this guild; the tick stopped here
    MissingPermission,
    /// A platform call for this entry failed, timed out or was refused for
    /// this channel alone
    RenameFailed { reason: String },
}

impl EntryOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Renamed { .. } | Self::Unchanged)
    }
}

/// One processed entry
#[derive(Debug, Clone, PartialEq)]
pub struct EntryReport {
    pub channel_id: ChannelId,
    pub coin: String,
    pub outcome: EntryOutcome,
}

/// How a tick ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickStatus {
    /// Every entry was processed
    Completed,
    /// The bot is no longer in the guild; nothing was done
    GuildUnavailable,
    /// The guild has no mappings
    NoEntries,
    /// Processing stopped early for lack of permission
    Halted,
}

/// Outcome of one reconciliation of one guild
#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    pub guild_id: GuildId,
    pub started_at: DateTime<Utc>,
    pub status: TickStatus,
    /// Whether the batched price call itself failed
    pub price_fetch_failed: bool,
    /// Processed entries, in stored order
    pub entries: Vec<EntryReport>,
}

impl TickReport {
    fn new(guild_id: GuildId, status: TickStatus) -> Self {
        Self {
            guild_id,
            started_at: Utc::now(),
            status,
            price_fetch_failed: false,
            entries: Vec::new(),
        }
    }

    pub fn renamed(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e.outcome, EntryOutcome::Renamed { .. }))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.entries.iter().filter(|e| !e.outcome.is_success()).count()
    }

    pub fn outcome_for(&self, channel_id: ChannelId) -> Option<&EntryOutcome> {
        self.entries
            .iter()
            .find(|e| e.channel_id == channel_id)
            .map(|e| &e.outcome)
    }
}

impl fmt::Display for TickReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "guild {}: {:?}, {} processed, {} renamed, {} unchanged, {} failed",
            self.guild_id,
            self.status,
            self.entries.len(),
            self.renamed(),
            self.entries
                .iter()
                .filter(|e| e.outcome == EntryOutcome::Unchanged)
                .count(),
            self.failed()
        )
    }
}

/// Guild-wide permission, checked at most once per tick
enum PermissionState {
    Unknown,
    Granted,
    Denied,
}

/// Applies price-derived names to one guild's channels
pub struct Reconciler {
    store: Arc<GuildStore>,
    prices: Arc<dyn PriceSource>,
    platform: Arc<dyn ChatPlatform>,
    rename_timeout: Duration,
    /// Held for the whole of a guild's tick so ticks of one guild never overlap
    tick_locks: Mutex<HashMap<GuildId, Arc<tokio::sync::Mutex<()>>>>,
}

impl fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reconciler")
            .field("rename_timeout", &self.rename_timeout)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    pub fn new(
        store: Arc<GuildStore>,
        prices: Arc<dyn PriceSource>,
        platform: Arc<dyn ChatPlatform>,
        rename_timeout: Duration,
    ) -> Self {
        Self {
            store,
            prices,
            platform,
            rename_timeout,
            tick_locks: Mutex::new(HashMap::new()),
        }
    }

    fn tick_lock(&self, guild_id: GuildId) -> Arc<tokio::sync::Mutex<()>> {
        self.tick_locks.lock().entry(guild_id).or_default().clone()
    }

    /// Run one tick for `guild_id`.
    ///
    /// Never fails: every problem is logged and recorded in the report, and
    /// the mappings themselves are never modified. Waits for any tick of the
    /// same guild that is still running, such as one from a replaced timer.
    pub async fn reconcile(&self, guild_id: GuildId) -> TickReport {
        let lock = self.tick_lock(guild_id);
        let _running = lock.lock().await;

        if !self.platform.has_guild(guild_id) {
            debug!("Guild {} is not available, skipping tick", guild_id);
            return TickReport::new(guild_id, TickStatus::GuildUnavailable);
        }

        let settings = self.store.get(guild_id);
        if settings.entries.is_empty() {
            return TickReport::new(guild_id, TickStatus::NoEntries);
        }

        let coins: BTreeSet<String> = settings
            .entries
            .iter()
            .map(|m| m.coin.trim().to_lowercase())
            .collect();

        let mut report = TickReport::new(guild_id, TickStatus::Completed);
        let prices = match self.prices.fetch_prices(&coins).await {
            Ok(prices) => prices,
            Err(e) => {
                warn!("Price fetch for guild {} failed: {:?}", guild_id, e);
                report.price_fetch_failed = true;
                Prices::new()
            }
        };

        let mut permission = PermissionState::Unknown;
        for mapping in &settings.entries {
            let price = prices.get(&mapping.coin.trim().to_lowercase()).copied();
            let outcome = self
                .apply(guild_id, mapping, price, &mut permission)
                .await;

            let halted = outcome == EntryOutcome::MissingPermission;
            report.entries.push(EntryReport {
                channel_id: mapping.channel_id,
                coin: mapping.coin.clone(),
                outcome,
            });
            if halted {
                report.status = TickStatus::Halted;
                break;
            }
        }

        report
    }

    /// Best-effort immediate rename of a single mapping, outside any tick
    pub async fn preview(&self, guild_id: GuildId, mapping: &ChannelMapping) -> EntryOutcome {
        let price = self.prices.fetch_price(&mapping.coin).await;
        let mut permission = PermissionState::Unknown;
        self.apply(guild_id, mapping, price, &mut permission).await
    }

    async fn apply(
        &self,
        guild_id: GuildId,
        mapping: &ChannelMapping,
        price: Option<f64>,
        permission: &mut PermissionState,
    ) -> EntryOutcome {
        let channel_id = mapping.channel_id;

        let Some(price) = price.filter(|p| p.is_finite() && *p >= 0.0) else {
            info!(
                "No price for '{}', skipping channel {} in guild {}",
                mapping.coin, channel_id, guild_id
            );
            return EntryOutcome::MissingPrice;
        };

        let name = channel_name(&mapping.label, price);

        let channel = match self.platform.resolve_channel(guild_id, channel_id).await {
            Ok(Some(channel)) => channel,
            Ok(None) => {
                warn!(
                    "Channel {} in guild {} not found, mapping left in place",
                    channel_id, guild_id
                );
                return EntryOutcome::ChannelNotFound;
            }
            Err(e) => {
                warn!("Failed to resolve channel {}: {:?}", channel_id, e);
                return EntryOutcome::RenameFailed {
                    reason: e.to_string(),
                };
            }
        };

        if channel.name == name {
            debug!("Channel {} already shows '{}'", channel_id, name);
            return EntryOutcome::Unchanged;
        }

        if let PermissionState::Unknown = permission {
            *permission = match self.platform.can_manage_channels(guild_id).await {
                Ok(true) => PermissionState::Granted,
                Ok(false) => PermissionState::Denied,
                Err(e) => {
                    // Let the rename itself find out
                    warn!(
                        "Permission check in guild {} failed, attempting renames anyway: {:?}",
                        guild_id, e
                    );
                    PermissionState::Granted
                }
            };
        }
        if let PermissionState::Denied = permission {
            warn!(
                "Missing Manage Channels in guild {}, stopping this tick",
                guild_id
            );
            return EntryOutcome::MissingPermission;
        }

        let rename = self.platform.rename_channel(guild_id, channel_id, &name);
        match tokio::time::timeout(self.rename_timeout, rename).await {
            Ok(Ok(())) => {
                debug!("Renamed channel {} to '{}'", channel_id, name);
                EntryOutcome::Renamed { name }
            }
            Ok(Err(PricewatchError::ChannelNotFound { .. })) => {
                warn!("Channel {} disappeared before rename", channel_id);
                EntryOutcome::ChannelNotFound
            }
            Ok(Err(e @ PricewatchError::MissingPermission { .. })) => {
                // A channel-level overwrite; other channels may still be renamable
                warn!(
                    "Rename of channel {} refused for lack of permission",
                    channel_id
                );
                EntryOutcome::RenameFailed {
                    reason: e.to_string(),
                }
            }
            Ok(Err(e)) => {
                warn!("Rename of channel {} failed: {:?}", channel_id, e);
                EntryOutcome::RenameFailed {
                    reason: e.to_string(),
                }
            }
            Err(_) => {
                warn!(
                    "Rename of channel {} timed out after {:?}",
                    channel_id, self.rename_timeout
                );
                EntryOutcome::RenameFailed {
                    reason: format!("timed out after {:?}", self.rename_timeout),
                }
            }
        }
    }
}
