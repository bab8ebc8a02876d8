//! Configuration system for pricewatch
//!
//! Settings live in a TOML file. Secrets can also come from the environment
//! (`DISCORD_TOKEN`, `COINGECKO_API_KEY`) so the file can be committed.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, PricewatchError, Result};

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PricewatchConfig {
    /// Discord connection settings
    #[serde(default)]
    pub discord: DiscordConfig,

    /// Price API settings
    #[serde(default)]
    pub price: PriceSourceConfig,

    /// Guild configuration store settings
    #[serde(default)]
    pub store: StoreConfig,

    /// Scheduler settings
    #[serde(default)]
    pub schedule: ScheduleConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiscordConfig {
    /// Bot token
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub token: String,

    /// Application id, needed only when the token belongs to another application
    #[serde(skip_serializing_if = "Option::is_none")]
    pub application_id: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceSourceConfig {
    /// Base URL of a CoinGecko-compatible API
    #[serde(default = "default_price_base_url")]
    pub base_url: String,

    /// Currency prices are quoted in
    #[serde(default = "default_quote_currency")]
    pub quote_currency: String,

    /// How long a fetched coin catalog stays fresh
    #[serde(default = "default_catalog_ttl_secs")]
    pub catalog_ttl_secs: u64,

    /// Timeout for a single HTTP request to the price API
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Optional demo API key
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path of the JSON document holding every guild's settings
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Upper bound for a single channel rename, including time spent queued
    /// behind the platform's rate limiter
    #[serde(default = "default_rename_timeout_secs")]
    pub rename_timeout_secs: u64,
}

fn default_price_base_url() -> String {
    "https://api.coingecko.com/api/v3".to_string()
}

fn default_quote_currency() -> String {
    "usd".to_string()
}

fn default_catalog_ttl_secs() -> u64 {
    6 * 60 * 60
}

fn default_request_timeout_secs() -> u64 {
    15
}

fn default_store_path() -> PathBuf {
    PathBuf::from("pricewatch.json")
}

fn default_rename_timeout_secs() -> u64 {
    30
}

impl Default for PriceSourceConfig {
    fn default() -> Self {
        Self {
            base_url: default_price_base_url(),
            quote_currency: default_quote_currency(),
            catalog_ttl_secs: default_catalog_ttl_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            api_key: None,
        }
    }
}

impl PriceSourceConfig {
    pub fn catalog_ttl(&self) -> Duration {
        Duration::from_secs(self.catalog_ttl_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            rename_timeout_secs: default_rename_timeout_secs(),
        }
    }
}

impl ScheduleConfig {
    pub fn rename_timeout(&self) -> Duration {
        Duration::from_secs(self.rename_timeout_secs.max(1))
    }
}

impl PricewatchConfig {
    /// Fill secrets from the environment when the file leaves them empty
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(token) = lookup("DISCORD_TOKEN").filter(|t| !t.trim().is_empty()) {
            self.discord.token = token.trim().to_string();
        }
        if let Some(app_id) = lookup("DISCORD_APPLICATION_ID").and_then(|v| v.trim().parse().ok())
        {
            self.discord.application_id = Some(app_id);
        }
        if let Some(key) = lookup("COINGECKO_API_KEY").filter(|k| !k.trim().is_empty()) {
            self.price.api_key = Some(key.trim().to_string());
        }
    }

    /// Check values that serde cannot check on its own
    pub fn validate(&self, config_path: &str) -> Result<()> {
        url::Url::parse(&self.price.base_url).map_err(|e| PricewatchError::Configuration {
            config_path: config_path.to_string(),
            field: "price.base_url".to_string(),
            expected: "an absolute http(s) URL".to_string(),
            cause: ConfigError::InvalidValue(e.to_string()),
        })?;

        if self.price.quote_currency.trim().is_empty() {
            return Err(PricewatchError::Configuration {
                config_path: config_path.to_string(),
                field: "price.quote_currency".to_string(),
                expected: "a currency code such as \"usd\"".to_string(),
                cause: ConfigError::InvalidValue("empty".to_string()),
            });
        }

        Ok(())
    }
}

/// Load configuration from a TOML file
pub async fn load_config(path: &Path) -> Result<PricewatchConfig> {
    let content = tokio::fs::read_to_string(path).await.map_err(|e| {
        PricewatchError::Configuration {
            config_path: path.display().to_string(),
            field: "file".to_string(),
            expected: "readable TOML file".to_string(),
            cause: ConfigError::Io(e.to_string()),
        }
    })?;

    let mut config: PricewatchConfig =
        toml::from_str(&content).map_err(|e| PricewatchError::Configuration {
            config_path: path.display().to_string(),
            field: "content".to_string(),
            expected: "valid TOML configuration".to_string(),
            cause: ConfigError::TomlParse(e.to_string()),
        })?;

    // Relative store paths are relative to the config file, not the working directory
    if config.store.path.is_relative() {
        if let Some(base_dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            config.store.path = base_dir.join(&config.store.path);
        }
    }

    config.validate(&path.display().to_string())?;
    Ok(config)
}

/// Save configuration to a TOML file
pub async fn save_config(config: &PricewatchConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| PricewatchError::Configuration {
                config_path: parent.display().to_string(),
                field: "directory".to_string(),
                expected: "writable directory".to_string(),
                cause: ConfigError::Io(e.to_string()),
            })?;
    }

    let content =
        toml::to_string_pretty(config).map_err(|e| PricewatchError::Configuration {
            config_path: path.display().to_string(),
            field: "serialization".to_string(),
            expected: "serializable config structure".to_string(),
            cause: ConfigError::TomlSerialize(e.to_string()),
        })?;

    tokio::fs::write(path, content)
        .await
        .map_err(|e| PricewatchError::Configuration {
            config_path: path.display().to_string(),
            field: "file".to_string(),
            expected: "writable file location".to_string(),
            cause: ConfigError::Io(e.to_string()),
        })?;

    Ok(())
}

/// Standard config file locations, most specific first
pub fn config_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("pricewatch.toml")];

    if let Some(config_dir) = dirs::config_dir() {
        paths.push(config_dir.join("pricewatch").join("config.toml"));
    }

    if let Some(home_dir) = dirs::home_dir() {
        paths.push(home_dir.join(".pricewatch").join("config.toml"));
    }

    paths
}

/// Load configuration from the first standard location that exists
pub async fn load_config_from_standard_locations() -> Result<PricewatchConfig> {
    for path in config_paths() {
        if path.exists() {
            tracing::debug!("Loading config from {}", path.display());
            return load_config(&path).await;
        }
    }

    Ok(PricewatchConfig::default())
}
