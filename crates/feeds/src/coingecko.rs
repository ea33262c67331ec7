//! CoinGecko REST client.
//!
//! Single-pair quotes go through `/simple/price`; richer market data for
//! the command layer (current price, 24h change, market cap) comes from
//! `/coins/markets`.

use crate::error::FeedError;
use crate::source::PriceSource;
use async_trait::async_trait;
use compact_str::CompactString;
use pricebot_core::{FixedPoint, PairKey, PriceQuote};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::debug;

/// Market summary for one coin, as returned by `/coins/markets`.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketInfo {
    pub id: CompactString,
    pub name: String,
    pub current_price: FixedPoint,
    /// 24h change in percent, when the provider reports one.
    pub change_24h_pct: Option<f64>,
    pub market_cap: Option<f64>,
}

/// CoinGecko price source.
pub struct CoinGeckoSource {
    client: reqwest::Client,
    base_url: String,
}

impl CoinGeckoSource {
    pub const DEFAULT_BASE_URL: &'static str = "https://api.coingecko.com/api/v3";

    /// Create a client with a per-request timeout.
    pub fn new(timeout: Duration) -> Result<Self, FeedError> {
        Self::with_base_url(timeout, Self::DEFAULT_BASE_URL)
    }

    /// Create a client against a non-default endpoint.
    pub fn with_base_url(timeout: Duration, base_url: &str) -> Result<Self, FeedError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FeedError::Http(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get_json(&self, url: &str) -> Result<serde_json::Value, FeedError> {
        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            debug!(url, status = %response.status(), "provider request failed");
            return Err(FeedError::Status(response.status().as_u16()));
        }

        Ok(response.json::<serde_json::Value>().await?)
    }

    /// Fetch the spot price for one pair via `/simple/price`.
    pub async fn simple_price(&self, pair: &PairKey) -> Result<FixedPoint, FeedError> {
        let url = format!(
            "{}/simple/price?ids={}&vs_currencies={}",
            self.base_url, pair.coin, pair.currency
        );

        let json = self.get_json(&url).await?;
        parse_simple_price(&json, pair)
            .map(FixedPoint::from_f64)
            .ok_or_else(|| FeedError::MissingPrice(pair.label()))
    }

    /// Fetch market info for one coin. `Ok(None)` means the provider does
    /// not know the coin id in that currency.
    pub async fn market_info(
        &self,
        coin: &str,
        currency: &str,
    ) -> Result<Option<MarketInfo>, FeedError> {
        let url = format!(
            "{}/coins/markets?vs_currency={}&ids={}&order=market_cap_desc&per_page=1&page=1&price_change_percentage=24h",
            self.base_url,
            currency.to_lowercase(),
            coin.to_lowercase()
        );

        let json = self.get_json(&url).await?;
        let entries = json
            .as_array()
            .ok_or_else(|| FeedError::Parse("expected market array".to_string()))?;

        Ok(entries.first().and_then(parse_market_info))
    }

    /// List the top `n` coins by market cap.
    pub async fn top_coins(&self, n: usize, currency: &str) -> Result<Vec<MarketInfo>, FeedError> {
        let url = format!(
            "{}/coins/markets?vs_currency={}&order=market_cap_desc&per_page={}&page=1&price_change_percentage=24h",
            self.base_url,
            currency.to_lowercase(),
            n
        );

        let json = self.get_json(&url).await?;
        let entries = json
            .as_array()
            .ok_or_else(|| FeedError::Parse("expected market array".to_string()))?;

        Ok(entries.iter().filter_map(parse_market_info).collect())
    }
}

#[async_trait]
impl PriceSource for CoinGeckoSource {
    async fn quote(&self, pair: &PairKey) -> Result<PriceQuote, FeedError> {
        let price = self.simple_price(pair).await?;
        let fetched_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs() as i64;

        Ok(PriceQuote::new(pair.clone(), price, fetched_at))
    }
}

/// Extract the price for `pair` from a `/simple/price` response:
/// `{"bitcoin":{"usd":50000.0}}`.
fn parse_simple_price(json: &serde_json::Value, pair: &PairKey) -> Option<f64> {
    json.get(pair.coin.as_str())?
        .get(pair.currency.as_str())?
        .as_f64()
}

/// Extract one entry of a `/coins/markets` response.
fn parse_market_info(entry: &serde_json::Value) -> Option<MarketInfo> {
    let id = entry["id"].as_str()?;
    let current_price = entry["current_price"].as_f64()?;

    Some(MarketInfo {
        id: CompactString::new(id),
        name: entry["name"].as_str().unwrap_or(id).to_string(),
        current_price: FixedPoint::from_f64(current_price),
        change_24h_pct: entry["price_change_percentage_24h"].as_f64(),
        market_cap: entry["market_cap"].as_f64(),
    })
}
