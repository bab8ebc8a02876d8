//! Pricewatch Core - price-driven channel renaming
//!
//! This crate holds everything that does not depend on a particular chat
//! platform: the price client, the guild configuration store, the
//! reconciliation engine and the per-guild scheduler.

pub mod config;
pub mod error;
pub mod format;
pub mod id;
pub mod platform;
pub mod price;
pub mod reconcile;
pub mod scheduler;
pub mod service;
pub mod store;

#[cfg(test)]
mod test_helpers;

pub use config::PricewatchConfig;
pub use error::{PricewatchError, Result};
pub use id::{ChannelId, GuildId};
pub use platform::{ChannelInfo, ChatPlatform};
pub use price::{CoinCatalog, CoinGeckoClient, PriceSource, Prices};
pub use reconcile::{EntryOutcome, EntryReport, Reconciler, TickReport, TickStatus};
pub use scheduler::Scheduler;
pub use service::{MappingChange, PricewatchService};
pub use store::{ChannelMapping, GuildSettings, GuildStore, StoreBackend, UpsertOutcome};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::{
        ChannelId, ChannelInfo, ChannelMapping, ChatPlatform, EntryOutcome, GuildId,
        GuildSettings, GuildStore, MappingChange, PriceSource, PricewatchConfig, PricewatchError,
        PricewatchService, Result, TickReport, TickStatus,
    };
}
