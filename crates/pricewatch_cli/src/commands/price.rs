use std::collections::BTreeSet;

use miette::Result;
use owo_colors::OwoColorize;
use pricewatch_core::config::PricewatchConfig;
use pricewatch_core::format::format_price;
use pricewatch_core::{CoinGeckoClient, PriceSource};

use crate::output::Output;

fn normalize(coins: &[String]) -> BTreeSet<String> {
    coins
        .iter()
        .map(|c| c.trim().to_lowercase())
        .filter(|c| !c.is_empty())
        .collect()
}

/// Fetch and print current prices, formatted as they would appear in a channel name
pub async fn show(config: &PricewatchConfig, coins: &[String]) -> Result<()> {
    let output = Output::new();
    let ids = normalize(coins);
    if ids.is_empty() {
        output.warning("No coin ids given");
        return Ok(());
    }

    let client = CoinGeckoClient::new(&config.price)?;
    let prices = client.fetch_prices(&ids).await?;

    output.section(&format!("Prices ({})", client.quote_currency()));
    for id in &ids {
        match prices.get(id) {
            Some(price) => output.kv(id, &format_price(*price).bright_green().to_string()),
            None => output.kv(id, &"no price".dimmed().to_string()),
        }
    }

    Ok(())
}

/// Check a coin id against the catalog
pub async fn validate(config: &PricewatchConfig, coin: &str) -> Result<()> {
    let output = Output::new();
    let client = CoinGeckoClient::new(&config.price)?;

    let id = coin.trim().to_lowercase();
    if client.validate_id(&id).await? {
        output.success(&format!("'{}' is a known coin id", id));
    } else {
        output.error(&format!("'{}' is not a known coin id", id));
    }

    Ok(())
}
