//! Price source client
//!
//! Spot prices and coin id validation against a CoinGecko-compatible API. The
//! full coin catalog is cached process-wide and refetched once it goes stale.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::{Client, Url};
use serde::Deserialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::PriceSourceConfig;
use crate::error::{PricewatchError, Result};

/// Prices keyed by lowercase coin id, in the configured quote currency
pub type Prices = HashMap<String, f64>;

/// The set of coin ids the price API knows about
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoinCatalog {
    ids: HashSet<String>,
}

impl CoinCatalog {
    pub fn new(ids: impl IntoIterator<Item = String>) -> Self {
        Self {
            ids: ids.into_iter().map(|id| id.to_lowercase()).collect(),
        }
    }

    /// Case-insensitive membership test
    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(&id.trim().to_lowercase())
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Source of coin prices and of the coin catalog
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PriceSource: Send + Sync {
    /// The full catalog, served from cache while it is fresh
    async fn fetch_catalog(&self) -> Result<Arc<CoinCatalog>>;

    /// Prices for every id in one upstream call.
    ///
    /// Ids without a price are absent from the map. `Err` means the call as a
    /// whole failed; callers that only care about the prices treat both cases
    /// the same way.
    async fn fetch_prices(&self, ids: &BTreeSet<String>) -> Result<Prices>;

    /// Case-insensitive check of `id` against the catalog
    async fn validate_id(&self, id: &str) -> Result<bool> {
        Ok(self.fetch_catalog().await?.contains(id))
    }

    /// Best-effort single lookup. Never fails: transport errors are logged and
    /// reported as `None`, the same as an id without a price.
    async fn fetch_price(&self, id: &str) -> Option<f64> {
        let id = id.trim().to_lowercase();
        let ids = BTreeSet::from([id.clone()]);
        match self.fetch_prices(&ids).await {
            Ok(prices) => prices.get(&id).copied(),
            Err(e) => {
                warn!("Price lookup for '{}' failed: {:?}", id, e);
                None
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct CatalogEntry {
    id: String,
}

#[derive(Debug, Clone)]
struct CachedCatalog {
    catalog: Arc<CoinCatalog>,
    fetched_at: Instant,
}

/// CoinGecko-backed price source
pub struct CoinGeckoClient {
    client: Client,
    base_url: Url,
    quote_currency: String,
    api_key: Option<String>,
    catalog_ttl: Duration,
    catalog: RwLock<Option<CachedCatalog>>,
    /// Serialises catalog refreshes so concurrent validations fetch once
    refresh: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for CoinGeckoClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoinGeckoClient")
            .field("base_url", &self.base_url.as_str())
            .field("quote_currency", &self.quote_currency)
            .field("catalog_ttl", &self.catalog_ttl)
            .field("has_api_key", &self.api_key.is_some())
            .finish()
    }
}

impl CoinGeckoClient {
    pub fn new(config: &PriceSourceConfig) -> Result<Self> {
        // Url::join drops the last path segment unless the base ends in '/'
        let mut base = config.base_url.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base).map_err(|e| {
            PricewatchError::validation("price.base_url", format!("'{}': {}", config.base_url, e))
        })?;

        let client = Client::builder()
            .timeout(config.request_timeout())
            .user_agent(concat!("pricewatch/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PricewatchError::upstream(base_url.as_str(), e))?;

        Ok(Self {
            client,
            base_url,
            quote_currency: config.quote_currency.trim().to_lowercase(),
            api_key: config.api_key.clone(),
            catalog_ttl: config.catalog_ttl(),
            catalog: RwLock::new(None),
            refresh: tokio::sync::Mutex::new(()),
        })
    }

    pub fn quote_currency(&self) -> &str {
        &self.quote_currency
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| PricewatchError::upstream(self.base_url.as_str(), e))
    }

    fn fresh_catalog(&self) -> Option<Arc<CoinCatalog>> {
        let cached = self.catalog.read();
        cached
            .as_ref()
            .filter(|c| c.fetched_at.elapsed() < self.catalog_ttl)
            .map(|c| c.catalog.clone())
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, url: Url) -> Result<T> {
        let endpoint = url.to_string();
        let mut request = self.client.get(url).header("accept", "application/json");
        if let Some(key) = &self.api_key {
            request = request.header("x-cg-demo-api-key", key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| PricewatchError::upstream(&endpoint, e))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(PricewatchError::upstream_msg(
                &endpoint,
                format!("API request failed: {} - {}", status, text),
            ));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| PricewatchError::upstream(&endpoint, e))
    }

    async fn download_catalog(&self) -> Result<CoinCatalog> {
        let url = self.endpoint("coins/list")?;
        let entries: Vec<CatalogEntry> = self.get_json(url).await?;
        Ok(CoinCatalog::new(entries.into_iter().map(|e| e.id)))
    }
}

#[async_trait]
impl PriceSource for CoinGeckoClient {
    async fn fetch_catalog(&self) -> Result<Arc<CoinCatalog>> {
        if let Some(catalog) = self.fresh_catalog() {
            return Ok(catalog);
        }

        let _guard = self.refresh.lock().await;
        // Another caller may have refreshed while we waited for the lock
        if let Some(catalog) = self.fresh_catalog() {
            return Ok(catalog);
        }

        match self.download_catalog().await {
            Ok(catalog) => {
                info!("Fetched coin catalog with {} ids", catalog.len());
                let catalog = Arc::new(catalog);
                *self.catalog.write() = Some(CachedCatalog {
                    catalog: catalog.clone(),
                    fetched_at: Instant::now(),
                });
                Ok(catalog)
            }
            Err(e) => {
                let stale = self.catalog.read().as_ref().map(|c| c.catalog.clone());
                match stale {
                    Some(catalog) => {
                        warn!("Catalog refresh failed, serving stale catalog: {:?}", e);
                        Ok(catalog)
                    }
                    None => Err(e),
                }
            }
        }
    }

    async fn fetch_prices(&self, ids: &BTreeSet<String>) -> Result<Prices> {
        let ids: BTreeSet<String> = ids
            .iter()
            .map(|id| id.trim().to_lowercase())
            .filter(|id| !id.is_empty())
            .collect();
        if ids.is_empty() {
            return Ok(Prices::new());
        }

        let mut url = self.endpoint("simple/price")?;
        url.query_pairs_mut()
            .append_pair("ids", &ids.iter().cloned().collect::<Vec<_>>().join(","))
            .append_pair("vs_currencies", &self.quote_currency);

        // Parse like: { "bitcoin": {"usd": 12345.6}, ... }
        let body: HashMap<String, HashMap<String, serde_json::Value>> = self.get_json(url).await?;

        let mut prices = Prices::new();
        for (id, quotes) in body {
            let id = id.to_lowercase();
            if !ids.contains(&id) {
                continue;
            }
            match quotes.get(&self.quote_currency).and_then(|v| v.as_f64()) {
                Some(price) if price.is_finite() && price >= 0.0 => {
                    prices.insert(id, price);
                }
                _ => debug!("No usable {} price for '{}'", self.quote_currency, id),
            }
        }

        Ok(prices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn client_for(server: &MockServer, ttl_secs: u64) -> CoinGeckoClient {
        let config = PriceSourceConfig {
            base_url: server.base_url(),
            catalog_ttl_secs: ttl_secs,
            ..Default::default()
        };
        CoinGeckoClient::new(&config).unwrap()
    }

    #[test]
    fn test_catalog_membership_is_case_insensitive() {
        let catalog = CoinCatalog::new(["bitcoin".to_string(), "Ethereum".to_string()]);
        assert!(catalog.contains("BITCOIN"));
        assert!(catalog.contains(" ethereum "));
        assert!(!catalog.contains("dogecoin"));
        assert_eq!(catalog.len(), 2);
    }

    #[tokio::test]
    async fn test_fetch_prices_batches_ids_into_one_call() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/simple/price")
                    .query_param("ids", "bitcoin,ethereum")
                    .query_param("vs_currencies", "usd");
                then.status(200).json_body(json!({
                    "bitcoin": { "usd": 68420.004 },
                    "ethereum": { "usd": 3120.5 }
                }));
            })
            .await;

        let client = client_for(&server, 60);
        let ids = BTreeSet::from(["Ethereum".to_string(), "bitcoin".to_string()]);
        let prices = client.fetch_prices(&ids).await.unwrap();

        mock.assert_async().await;
        assert_eq!(prices.get("bitcoin"), Some(&68420.004));
        assert_eq!(prices.get("ethereum"), Some(&3120.5));
    }

    #[tokio::test]
    async fn test_fetch_prices_omits_ids_without_price() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/simple/price");
                then.status(200).json_body(json!({
                    "bitcoin": { "usd": 1.5 },
                    "tether": { "eur": 0.92 },
                    "weird": { "usd": "n/a" }
                }));
            })
            .await;

        let client = client_for(&server, 60);
        let ids = BTreeSet::from([
            "bitcoin".to_string(),
            "tether".to_string(),
            "weird".to_string(),
            "ghost".to_string(),
        ]);
        let prices = client.fetch_prices(&ids).await.unwrap();
        assert_eq!(prices.len(), 1);
        assert_eq!(prices.get("bitcoin"), Some(&1.5));
    }

    #[tokio::test]
    async fn test_fetch_prices_reports_failed_call_as_upstream_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/simple/price");
                then.status(429).body("rate limited");
            })
            .await;

        let client = client_for(&server, 60);
        let ids = BTreeSet::from(["bitcoin".to_string()]);
        let err = client.fetch_prices(&ids).await.unwrap_err();
        assert!(matches!(err, PricewatchError::Upstream { .. }));

        // The single lookup swallows the same failure
        assert_eq!(client.fetch_price("bitcoin").await, None);
    }

    #[tokio::test]
    async fn test_fetch_price_single_lookup() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/simple/price")
                    .query_param("ids", "solana");
                then.status(200)
                    .json_body(json!({ "solana": { "usd": 142.25 } }));
            })
            .await;

        let client = client_for(&server, 60);
        assert_eq!(client.fetch_price("SOLANA").await, Some(142.25));
    }

    #[tokio::test]
    async fn test_catalog_is_cached_while_fresh() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/coins/list");
                then.status(200).json_body(json!([
                    { "id": "bitcoin", "symbol": "btc", "name": "Bitcoin" },
                    { "id": "ethereum", "symbol": "eth", "name": "Ethereum" }
                ]));
            })
            .await;

        let client = client_for(&server, 3600);
        assert!(client.validate_id("Bitcoin").await.unwrap());
        assert!(!client.validate_id("bitcoin-cash").await.unwrap());
        assert!(client.validate_id("ethereum").await.unwrap());

        mock.assert_hits_async(1).await;
    }

    #[tokio::test]
    async fn test_stale_catalog_is_refetched() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/coins/list");
                then.status(200)
                    .json_body(json!([{ "id": "bitcoin", "symbol": "btc", "name": "Bitcoin" }]));
            })
            .await;

        // Zero freshness window: every request refetches
        let client = client_for(&server, 0);
        client.fetch_catalog().await.unwrap();
        client.fetch_catalog().await.unwrap();

        mock.assert_hits_async(2).await;
    }

    #[tokio::test]
    async fn test_failed_refresh_serves_stale_catalog() {
        let server = MockServer::start_async().await;
        let mut ok = server
            .mock_async(|when, then| {
                when.method(GET).path("/coins/list");
                then.status(200)
                    .json_body(json!([{ "id": "bitcoin", "symbol": "btc", "name": "Bitcoin" }]));
            })
            .await;

        let client = client_for(&server, 0);
        let first = client.fetch_catalog().await.unwrap();
        ok.delete_async().await;

        server
            .mock_async(|when, then| {
                when.method(GET).path("/coins/list");
                then.status(500);
            })
            .await;

        let second = client.fetch_catalog().await.unwrap();
        assert_eq!(first, second);
        assert!(second.contains("bitcoin"));
    }

    #[tokio::test]
    async fn test_catalog_failure_without_cache_is_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/coins/list");
                then.status(503);
            })
            .await;

        let client = client_for(&server, 3600);
        let err = client.validate_id("bitcoin").await.unwrap_err();
        assert!(matches!(err, PricewatchError::Upstream { .. }));
    }

    #[tokio::test]
    async fn test_api_key_header_is_sent() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/simple/price")
                    .header("x-cg-demo-api-key", "demo-key");
                then.status(200).json_body(json!({}));
            })
            .await;

        let config = PriceSourceConfig {
            base_url: server.base_url(),
            api_key: Some("demo-key".to_string()),
            ..Default::default()
        };
        let client = CoinGeckoClient::new(&config).unwrap();
        let prices = client
            .fetch_prices(&BTreeSet::from(["bitcoin".to_string()]))
            .await
            .unwrap();

        mock.assert_async().await;
        assert!(prices.is_empty());
    }
}
