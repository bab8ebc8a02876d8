//! Guild configuration store
//!
//! One document holds every guild's settings. The store keeps it in memory,
//! serialises all read-modify-write operations behind a single lock and hands
//! the whole document to a [`StoreBackend`] after every mutation.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::error::{PricewatchError, Result};
use crate::id::{ChannelId, GuildId};

pub const MIN_INTERVAL_MINUTES: u32 = 1;
pub const MAX_INTERVAL_MINUTES: u32 = 1440;
pub const DEFAULT_INTERVAL_MINUTES: u32 = 10;

/// One channel showing one coin's price
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelMapping {
    pub channel_id: ChannelId,
    pub coin: String,
    pub label: String,
}

/// Everything configured for one guild
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuildSettings {
    #[serde(default = "default_interval")]
    pub interval_minutes: u32,

    #[serde(default = "default_running")]
    pub running: bool,

    /// Processing and display order
    #[serde(default)]
    pub entries: Vec<ChannelMapping>,
}

fn default_interval() -> u32 {
    DEFAULT_INTERVAL_MINUTES
}

fn default_running() -> bool {
    true
}

impl Default for GuildSettings {
    fn default() -> Self {
        Self {
            interval_minutes: DEFAULT_INTERVAL_MINUTES,
            running: true,
            entries: Vec::new(),
        }
    }
}

impl GuildSettings {
    pub fn mapping(&self, channel_id: ChannelId) -> Option<&ChannelMapping> {
        self.entries.iter().find(|m| m.channel_id == channel_id)
    }
}

/// The persisted document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreDocument {
    #[serde(default)]
    pub guilds: BTreeMap<GuildId, GuildSettings>,
}

/// Where the document is kept between runs
pub trait StoreBackend: Send + Sync {
    /// Read the document; a missing document is an empty one
    fn load(&self) -> Result<StoreDocument>;

    /// Replace the stored document with `doc`
    fn save(&self, doc: &StoreDocument) -> Result<()>;

    /// Human-readable location for log messages
    fn describe(&self) -> String;
}

/// Backend that keeps the document in memory only
#[derive(Debug, Default)]
pub struct MemoryBackend {
    doc: Mutex<StoreDocument>,
    fail_writes: Mutex<bool>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_document(doc: StoreDocument) -> Self {
        Self {
            doc: Mutex::new(doc),
            fail_writes: Mutex::new(false),
        }
    }

    /// The last document that was successfully saved
    pub fn snapshot(&self) -> StoreDocument {
        self.doc.lock().clone()
    }

    /// Make subsequent saves fail, to exercise persistence error handling
    pub fn set_fail_writes(&self, fail: bool) {
        *self.fail_writes.lock() = fail;
    }
}

impl StoreBackend for MemoryBackend {
    fn load(&self) -> Result<StoreDocument> {
        Ok(self.doc.lock().clone())
    }

    fn save(&self, doc: &StoreDocument) -> Result<()> {
        if *self.fail_writes.lock() {
            return Err(PricewatchError::persistence(
                self.describe(),
                std::io::Error::other("writes disabled"),
            ));
        }
        *self.doc.lock() = doc.clone();
        Ok(())
    }

    fn describe(&self) -> String {
        "in-memory store".to_string()
    }
}

/// Backend that keeps the document in a pretty-printed JSON file
#[derive(Debug, Clone)]
pub struct JsonFileBackend {
    path: PathBuf,
}

impl JsonFileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl StoreBackend for JsonFileBackend {
    fn load(&self) -> Result<StoreDocument> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(
                    "No guild store at {}, creating an empty one",
                    self.path.display()
                );
                let doc = StoreDocument::default();
                self.save(&doc)?;
                return Ok(doc);
            }
            Err(e) => return Err(PricewatchError::persistence(self.describe(), e)),
        };

        if content.trim().is_empty() {
            return Ok(StoreDocument::default());
        }

        serde_json::from_str(&content).map_err(|e| PricewatchError::persistence(self.describe(), e))
    }

    fn save(&self, doc: &StoreDocument) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| PricewatchError::persistence(self.describe(), e))?;
        }

        let content = serde_json::to_string_pretty(doc)
            .map_err(|e| PricewatchError::persistence(self.describe(), e))?;

        // Write a sibling and rename it over the target so readers never see half a document
        let tmp = self.temp_path();
        std::fs::write(&tmp, content)
            .map_err(|e| PricewatchError::persistence(tmp.display().to_string(), e))?;
        std::fs::rename(&tmp, &self.path)
            .map_err(|e| PricewatchError::persistence(self.describe(), e))?;

        Ok(())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Result of an upsert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// A new mapping was appended at this index
    Added { index: usize },
    /// The existing mapping at this index was replaced
    Replaced { index: usize },
}

/// Check an interval against the allowed range
pub fn validate_interval(minutes: u32) -> Result<()> {
    if (MIN_INTERVAL_MINUTES..=MAX_INTERVAL_MINUTES).contains(&minutes) {
        Ok(())
    } else {
        Err(PricewatchError::validation(
            "interval",
            format!(
                "{} minutes is outside {}-{}",
                minutes, MIN_INTERVAL_MINUTES, MAX_INTERVAL_MINUTES
            ),
        ))
    }
}

/// Process-wide guild configuration
pub struct GuildStore {
    doc: RwLock<StoreDocument>,
    backend: Arc<dyn StoreBackend>,
}

impl std::fmt::Debug for GuildStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuildStore")
            .field("backend", &self.backend.describe())
            .field("guilds", &self.doc.read().guilds.len())
            .finish()
    }
}

impl GuildStore {
    /// Load the document from `backend`
    pub fn open(backend: Arc<dyn StoreBackend>) -> Result<Self> {
        let doc = backend.load()?;
        debug!(
            "Loaded {} guild records from {}",
            doc.guilds.len(),
            backend.describe()
        );
        Ok(Self {
            doc: RwLock::new(doc),
            backend,
        })
    }

    /// A store that never touches the filesystem
    pub fn in_memory() -> Self {
        Self {
            doc: RwLock::new(StoreDocument::default()),
            backend: Arc::new(MemoryBackend::new()),
        }
    }

    /// Persist the document. Failures are logged, never returned: the
    /// in-memory copy stays authoritative for the rest of the process.
    fn persist(&self, doc: &StoreDocument) {
        if let Err(e) = self.backend.save(doc) {
            error!(
                "Failed to persist guild configuration to {}: {:?}",
                self.backend.describe(),
                e
            );
        }
    }

    fn mutate<T>(&self, guild_id: GuildId, f: impl FnOnce(&mut GuildSettings) -> T) -> T {
        let mut doc = self.doc.write();
        let result = f(doc.guilds.entry(guild_id).or_default());
        self.persist(&doc);
        result
    }

    /// Settings for a guild, creating and persisting defaults the first time
    pub fn get(&self, guild_id: GuildId) -> GuildSettings {
        if let Some(settings) = self.doc.read().guilds.get(&guild_id) {
            return settings.clone();
        }

        let mut doc = self.doc.write();
        if let Some(settings) = doc.guilds.get(&guild_id) {
            return settings.clone();
        }
        info!("Creating default settings for guild {}", guild_id);
        let settings = GuildSettings::default();
        doc.guilds.insert(guild_id, settings.clone());
        self.persist(&doc);
        settings
    }

    /// Settings for a guild if it has a record, without creating one
    pub fn peek(&self, guild_id: GuildId) -> Option<GuildSettings> {
        self.doc.read().guilds.get(&guild_id).cloned()
    }

    /// Ids of every guild with a record
    pub fn guild_ids(&self) -> Vec<GuildId> {
        self.doc.read().guilds.keys().copied().collect()
    }

    /// Replace the mapping for `channel_id` in place, or append a new one
    pub fn upsert_mapping(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        coin: &str,
        label: &str,
    ) -> UpsertOutcome {
        let mapping = ChannelMapping {
            channel_id,
            coin: coin.trim().to_lowercase(),
            label: label.to_string(),
        };

        self.mutate(guild_id, |settings| {
            match settings
                .entries
                .iter()
                .position(|m| m.channel_id == channel_id)
            {
                Some(index) => {
                    settings.entries[index] = mapping;
                    UpsertOutcome::Replaced { index }
                }
                None => {
                    settings.entries.push(mapping);
                    UpsertOutcome::Added {
                        index: settings.entries.len() - 1,
                    }
                }
            }
        })
    }

    /// Remove the mapping for `channel_id`; returns whether one existed
    pub fn remove_mapping(&self, guild_id: GuildId, channel_id: ChannelId) -> bool {
        let mut doc = self.doc.write();
        let Some(settings) = doc.guilds.get_mut(&guild_id) else {
            return false;
        };
        let before = settings.entries.len();
        settings.entries.retain(|m| m.channel_id != channel_id);
        let removed = settings.entries.len() != before;
        if removed {
            self.persist(&doc);
        }
        removed
    }

    /// Set the refresh interval; out-of-range values are rejected unchanged
    pub fn set_interval(&self, guild_id: GuildId, minutes: u32) -> Result<()> {
        validate_interval(minutes)?;
        self.mutate(guild_id, |settings| settings.interval_minutes = minutes);
        Ok(())
    }

    pub fn set_running(&self, guild_id: GuildId, running: bool) {
        self.mutate(guild_id, |settings| settings.running = running);
    }

    /// Copy of the whole document
    pub fn snapshot(&self) -> StoreDocument {
        self.doc.read().clone()
    }
}
