use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::config::PricewatchConfig;
use crate::error::{PricewatchError, Result};
use crate::id::{ChannelId, GuildId};
use crate::platform::ChatPlatform;
use crate::price::{CoinGeckoClient, PriceSource};
use crate::reconcile::{EntryOutcome, Reconciler, TickReport};
use crate::scheduler::Scheduler;
use crate::store::{ChannelMapping, GuildSettings, GuildStore, JsonFileBackend, UpsertOutcome};

/// Result of `add_or_update_mapping`
#[derive(Debug, Clone, PartialEq)]
pub struct MappingChange {
    pub mapping: ChannelMapping,
    pub upsert: UpsertOutcome,
    /// What the immediate preview rename did
    pub preview: EntryOutcome,
}

/// Operations behind the command surface, plus guild lifecycle hooks
pub struct PricewatchService {
    store: Arc<GuildStore>,
    prices: Arc<dyn PriceSource>,
    platform: Arc<dyn ChatPlatform>,
    reconciler: Arc<Reconciler>,
    scheduler: Scheduler,
}

impl std::fmt::Debug for PricewatchService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PricewatchService")
            .field("store", &self.store)
            .field("scheduler", &self.scheduler)
            .finish_non_exhaustive()
    }
}

impl PricewatchService {
    pub fn new(
        store: Arc<GuildStore>,
        prices: Arc<dyn PriceSource>,
        platform: Arc<dyn ChatPlatform>,
        rename_timeout: Duration,
    ) -> Self {
        let reconciler = Arc::new(Reconciler::new(
            store.clone(),
            prices.clone(),
            platform.clone(),
            rename_timeout,
        ));
        let scheduler = Scheduler::new(store.clone(), reconciler.clone());
        Self {
            store,
            prices,
            platform,
            reconciler,
            scheduler,
        }
    }

    /// Production wiring: CoinGecko prices and the JSON file store
    pub fn from_config(config: &PricewatchConfig, platform: Arc<dyn ChatPlatform>) -> Result<Self> {
        let prices = Arc::new(CoinGeckoClient::new(&config.price)?);
        let store = Arc::new(GuildStore::open(Arc::new(JsonFileBackend::new(
            &config.store.path,
        )))?);
        info!(
            "Guild store at {} holds {} guilds",
            config.store.path.display(),
            store.guild_ids().len()
        );
        Ok(Self::new(
            store,
            prices,
            platform,
            config.schedule.rename_timeout(),
        ))
    }

    pub fn store(&self) -> &Arc<GuildStore> {
        &self.store
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TickReport> {
        self.scheduler.subscribe()
    }

    /// Validate `coin`, upsert the mapping and try one immediate rename.
    ///
    /// Nothing is stored when validation fails or the catalog cannot be
    /// fetched. The preview never fails the call.
    pub async fn add_or_update_mapping(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        coin: &str,
        label: &str,
    ) -> Result<MappingChange> {
        let coin = coin.trim().to_lowercase();
        if coin.is_empty() {
            return Err(PricewatchError::validation("coin", "coin id must not be empty"));
        }
        if label.trim().is_empty() {
            return Err(PricewatchError::validation("label", "label must not be empty"));
        }

        if !self.prices.validate_id(&coin).await? {
            return Err(PricewatchError::validation(
                "coin",
                format!("'{}' is not a known coin id", coin),
            ));
        }

        let upsert = self.store.upsert_mapping(guild_id, channel_id, &coin, label);
        let mapping = ChannelMapping {
            channel_id,
            coin,
            label: label.to_string(),
        };
        debug!("Guild {} mapping {:?}: {:?}", guild_id, upsert, mapping);

        let preview = self.reconciler.preview(guild_id, &mapping).await;
        Ok(MappingChange {
            mapping,
            upsert,
            preview,
        })
    }

    pub fn remove_mapping(&self, guild_id: GuildId, channel_id: ChannelId) -> bool {
        self.store.remove_mapping(guild_id, channel_id)
    }

    /// Ordered mappings together with the interval and running flag
    pub fn list_mappings(&self, guild_id: GuildId) -> GuildSettings {
        self.store.get(guild_id)
    }

    /// Update the interval and re-arm an active timer with it
    pub fn set_interval(&self, guild_id: GuildId, minutes: u32) -> Result<()> {
        self.store.set_interval(guild_id, minutes)?;
        if self.scheduler.is_running(guild_id) {
            self.scheduler.start(guild_id);
        }
        Ok(())
    }

    pub fn start(&self, guild_id: GuildId) -> bool {
        self.store.set_running(guild_id, true);
        self.scheduler.start(guild_id)
    }

    pub fn stop(&self, guild_id: GuildId) -> bool {
        self.store.set_running(guild_id, false);
        self.scheduler.stop(guild_id)
    }

    /// The bot joined a guild, or saw it again after a restart
    pub fn guild_joined(&self, guild_id: GuildId) -> bool {
        if self.scheduler.is_running(guild_id) {
            return true;
        }
        // Creates the default record on first contact
        self.store.get(guild_id);
        self.scheduler.start(guild_id)
    }

    /// The bot left a guild; its configuration stays dormant
    pub fn guild_left(&self, guild_id: GuildId) {
        if self.scheduler.stop(guild_id) {
            info!("Left guild {}, timer stopped", guild_id);
        }
    }

    /// Arm timers for every guild the platform reports, returning how many run
    pub fn resume(&self) -> usize {
        let guilds = self.platform.guild_ids();
        let started = guilds
            .iter()
            .filter(|guild_id| self.guild_joined(**guild_id))
            .count();
        info!(
            "Resumed {} of {} guilds ({} stopped)",
            started,
            guilds.len(),
            guilds.len() - started
        );
        started
    }

    /// Run one tick now, outside the timer
    pub async fn reconcile_now(&self, guild_id: GuildId) -> TickReport {
        self.reconciler.reconcile(guild_id).await
    }

    pub fn shutdown(&self) {
        self.scheduler.stop_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::price::MockPriceSource;
    use crate::store::MemoryBackend;
    use crate::test_helpers::platform::RecordingPlatform;
    use crate::test_helpers::prices::{catalog, prices};
    use pretty_assertions::assert_eq;

    const GUILD: GuildId = GuildId::new(3);

    fn service(
        source: MockPriceSource,
        platform: Arc<RecordingPlatform>,
    ) -> (PricewatchService, Arc<MemoryBackend>) {
        let backend = Arc::new(MemoryBackend::new());
        let store = Arc::new(GuildStore::open(backend.clone()).unwrap());
        let service =
            PricewatchService::new(store, Arc::new(source), platform, Duration::from_secs(30));
        (service, backend)
    }

    fn catalog_source() -> MockPriceSource {
        let mut source = MockPriceSource::new();
        source
            .expect_validate_id()
            .returning(|id| Ok(catalog(&["bitcoin", "ethereum"]).contains(id)));
        source
    }

    #[tokio::test]
    async fn test_add_mapping_validates_then_previews() {
        let mut source = catalog_source();
        source
            .expect_fetch_price()
            .times(1)
            .returning(|_| Some(68420.004));
        let platform = Arc::new(RecordingPlatform::with_guild(GUILD, &[30]));
        let (service, backend) = service(source, platform.clone());

        let change = service
            .add_or_update_mapping(GUILD, ChannelId::new(30), " Bitcoin ", "💲 BTC")
            .await
            .unwrap();

        assert_eq!(change.upsert, UpsertOutcome::Added { index: 0 });
        assert_eq!(change.mapping.coin, "bitcoin");
        assert_eq!(
            change.preview,
            EntryOutcome::Renamed {
                name: "💲 BTC - $68,420.00".to_string()
            }
        );
        assert_eq!(backend.snapshot().guilds[&GUILD].entries.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_coin_is_rejected_without_mutation() {
        let mut source = catalog_source();
        source.expect_fetch_price().never();
        let platform = Arc::new(RecordingPlatform::with_guild(GUILD, &[30]));
        let (service, _) = service(source, platform.clone());

        let err = service
            .add_or_update_mapping(GUILD, ChannelId::new(30), "dogecoin2", "DOGE")
            .await
            .unwrap_err();

        assert!(err.is_user_facing());
        assert!(service.list_mappings(GUILD).entries.is_empty());
        assert!(platform.renames().is_empty());
    }

    #[tokio::test]
    async fn test_catalog_outage_rejects_without_mutation() {
        let mut source = MockPriceSource::new();
        source
            .expect_validate_id()
            .returning(|_| Err(PricewatchError::upstream_msg("coins/list", "HTTP 502")));
        let platform = Arc::new(RecordingPlatform::with_guild(GUILD, &[30]));
        let (service, _) = service(source, platform);

        let err = service
            .add_or_update_mapping(GUILD, ChannelId::new(30), "bitcoin", "BTC")
            .await
            .unwrap_err();
        assert!(matches!(err, PricewatchError::Upstream { .. }));
        assert!(service.list_mappings(GUILD).entries.is_empty());
    }

    #[tokio::test]
    async fn test_preview_failure_keeps_mapping() {
        let mut source = catalog_source();
        source.expect_fetch_price().returning(|_| None);
        let platform = Arc::new(RecordingPlatform::with_guild(GUILD, &[30]));
        let (service, _) = service(source, platform);

        let change = service
            .add_or_update_mapping(GUILD, ChannelId::new(30), "ethereum", "ETH")
            .await
            .unwrap();
        assert_eq!(change.preview, EntryOutcome::MissingPrice);
        assert_eq!(service.list_mappings(GUILD).entries.len(), 1);
    }

    #[tokio::test]
    async fn test_blank_label_is_rejected() {
        let platform = Arc::new(RecordingPlatform::with_guild(GUILD, &[30]));
        let (service, _) = service(MockPriceSource::new(), platform);
        let err = service
            .add_or_update_mapping(GUILD, ChannelId::new(30), "bitcoin", "   ")
            .await
            .unwrap_err();
        assert!(err.is_user_facing());
    }

    #[tokio::test]
    async fn test_start_stop_and_interval() {
        let mut source = MockPriceSource::new();
        source
            .expect_fetch_prices()
            .returning(|_| Ok(prices(&[("bitcoin", 1.0)])));
        let platform = Arc::new(RecordingPlatform::with_guild(GUILD, &[30]));
        let (service, backend) = service(source, platform);

        assert!(service.start(GUILD));
        assert!(service.scheduler().is_running(GUILD));

        service.set_interval(GUILD, 15).unwrap();
        assert_eq!(
            service.scheduler().period(GUILD),
            Some(Duration::from_secs(900))
        );
        assert!(service.set_interval(GUILD, 0).is_err());
        assert_eq!(service.list_mappings(GUILD).interval_minutes, 15);

        service.stop(GUILD);
        assert!(!service.scheduler().is_running(GUILD));
        assert!(!backend.snapshot().guilds[&GUILD].running);

        // A stopped guild keeps its new interval but gets no timer
        service.set_interval(GUILD, 20).unwrap();
        assert!(!service.scheduler().is_running(GUILD));
    }

    #[tokio::test]
    async fn test_resume_respects_running_flag() {
        let mut source = MockPriceSource::new();
        source.expect_fetch_prices().returning(|_| Ok(prices(&[])));
        let platform = Arc::new(RecordingPlatform::with_guild(GUILD, &[]));
        let stopped = GuildId::new(4);
        platform.join(stopped);
        let (service, _) = service(source, platform);
        service.store().set_running(stopped, false);

        assert_eq!(service.resume(), 1);
        assert_eq!(service.scheduler().active_guilds(), vec![GUILD]);

        service.guild_left(GUILD);
        assert!(service.scheduler().active_guilds().is_empty());
        // Configuration survives departure
        assert!(service.store().peek(GUILD).is_some());
    }
}
