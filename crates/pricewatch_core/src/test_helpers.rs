#![cfg(test)]

pub mod platform {
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use crate::error::{PricewatchError, Result};
    use crate::id::{ChannelId, GuildId};
    use crate::platform::{ChannelInfo, ChatPlatform};

    /// In-memory platform that records every rename it is asked for
    #[derive(Default)]
    pub struct RecordingPlatform {
        guilds: Mutex<HashSet<GuildId>>,
        channels: Mutex<HashMap<ChannelId, String>>,
        failing: Mutex<HashSet<ChannelId>>,
        forbidden: Mutex<HashSet<ChannelId>>,
        can_manage: Mutex<bool>,
        rename_delay: Mutex<Option<Duration>>,
        renames: Mutex<Vec<(ChannelId, String)>>,
        permission_checks: AtomicUsize,
    }

    impl RecordingPlatform {
        /// Member of `guild_id` with rename permission and the given channels
        pub fn with_guild(guild_id: GuildId, channels: &[u64]) -> Self {
            let platform = Self::default();
            platform.join(guild_id);
            for id in channels {
                platform.add_channel(ChannelId::new(*id), format!("channel-{}", id));
            }
            platform.set_can_manage(true);
            platform
        }

        pub fn join(&self, guild_id: GuildId) {
            self.guilds.lock().insert(guild_id);
        }

        pub fn leave(&self, guild_id: GuildId) {
            self.guilds.lock().remove(&guild_id);
        }

        pub fn add_channel(&self, channel_id: ChannelId, name: impl Into<String>) {
            self.channels.lock().insert(channel_id, name.into());
        }

        pub fn fail_renames_of(&self, channel_id: ChannelId) {
            self.failing.lock().insert(channel_id);
        }

        /// Renames of `channel_id` are refused as if by a channel overwrite
        pub fn forbid_renames_of(&self, channel_id: ChannelId) {
            self.forbidden.lock().insert(channel_id);
        }

        pub fn set_can_manage(&self, can_manage: bool) {
            *self.can_manage.lock() = can_manage;
        }

        pub fn set_rename_delay(&self, delay: Duration) {
            *self.rename_delay.lock() = Some(delay);
        }

        pub fn renames(&self) -> Vec<(ChannelId, String)> {
            self.renames.lock().clone()
        }

        pub fn channel_name(&self, channel_id: ChannelId) -> Option<String> {
            self.channels.lock().get(&channel_id).cloned()
        }

        pub fn permission_checks(&self) -> usize {
            self.permission_checks.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ChatPlatform for RecordingPlatform {
        fn has_guild(&self, guild_id: GuildId) -> bool {
            self.guilds.lock().contains(&guild_id)
        }

        fn guild_ids(&self) -> Vec<GuildId> {
            let mut ids: Vec<_> = self.guilds.lock().iter().copied().collect();
            ids.sort();
            ids
        }

        async fn resolve_channel(
            &self,
            _guild_id: GuildId,
            channel_id: ChannelId,
        ) -> Result<Option<ChannelInfo>> {
            Ok(self
                .channels
                .lock()
                .get(&channel_id)
                .map(|name| ChannelInfo {
                    id: channel_id,
                    name: name.clone(),
                }))
        }

        async fn can_manage_channels(&self, _guild_id: GuildId) -> Result<bool> {
            self.permission_checks.fetch_add(1, Ordering::SeqCst);
            Ok(*self.can_manage.lock())
        }

        async fn rename_channel(
            &self,
            guild_id: GuildId,
            channel_id: ChannelId,
            name: &str,
        ) -> Result<()> {
            let delay = *self.rename_delay.lock();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }

            self.renames.lock().push((channel_id, name.to_string()));
            if self.forbidden.lock().contains(&channel_id) {
                return Err(PricewatchError::MissingPermission {
                    permission: "Manage Channels".to_string(),
                    guild_id,
                });
            }
            if self.failing.lock().contains(&channel_id) {
                return Err(PricewatchError::platform_msg(
                    "rename channel",
                    "429 Too Many Requests",
                ));
            }
            self.channels.lock().insert(channel_id, name.to_string());
            Ok(())
        }
    }
}

pub mod prices {
    use std::sync::Arc;

    use crate::error::PricewatchError;
    use crate::price::{CoinCatalog, MockPriceSource, Prices};

    pub fn prices(pairs: &[(&str, f64)]) -> Prices {
        pairs.iter().map(|(id, p)| (id.to_string(), *p)).collect()
    }

    /// Mock that answers every batch with `pairs`, any number of times
    pub fn always(pairs: &[(&str, f64)]) -> MockPriceSource {
        let answer = prices(pairs);
        let mut mock = MockPriceSource::new();
        mock.expect_fetch_prices()
            .returning(move |_| Ok(answer.clone()));
        mock
    }

    /// Mock whose batch calls all fail
    pub fn failing() -> MockPriceSource {
        let mut mock = MockPriceSource::new();
        mock.expect_fetch_prices()
            .returning(|_| Err(PricewatchError::upstream_msg("simple/price", "HTTP 503")));
        mock
    }

    pub fn catalog(ids: &[&str]) -> Arc<CoinCatalog> {
        Arc::new(CoinCatalog::new(ids.iter().map(|s| s.to_string())))
    }
}
