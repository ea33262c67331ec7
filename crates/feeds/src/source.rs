//! The price source boundary.

use crate::error::FeedError;
use async_trait::async_trait;
use pricebot_core::{FixedPoint, PairKey, PriceQuote};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

/// Trait for live price lookups.
///
/// Implementations are timeout-bounded: a call that exceeds its deadline
/// fails with `FeedError::Timeout` rather than hanging the caller.
#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Fetch the current price for one (coin, currency) pair.
    async fn quote(&self, pair: &PairKey) -> Result<PriceQuote, FeedError>;
}

/// Mock price source for testing.
#[derive(Default)]
pub struct MockPriceSource {
    prices: Mutex<HashMap<PairKey, FixedPoint>>,
    failing: Mutex<HashSet<PairKey>>,
    calls: Mutex<HashMap<PairKey, u32>>,
}

impl MockPriceSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set (or update) the price returned for a pair.
    pub fn set_price(&self, coin: &str, currency: &str, price: f64) {
        self.prices
            .lock()
            .unwrap()
            .insert(PairKey::new(coin, currency), FixedPoint::from_f64(price));
    }

    /// Make lookups for a pair fail with a transient error.
    pub fn set_failing(&self, coin: &str, currency: &str) {
        self.failing
            .lock()
            .unwrap()
            .insert(PairKey::new(coin, currency));
    }

    /// Stop failing lookups for a pair.
    pub fn clear_failing(&self, coin: &str, currency: &str) {
        self.failing
            .lock()
            .unwrap()
            .remove(&PairKey::new(coin, currency));
    }

    /// Number of quote calls made for a pair.
    pub fn calls_for(&self, coin: &str, currency: &str) -> u32 {
        self.calls
            .lock()
            .unwrap()
            .get(&PairKey::new(coin, currency))
            .copied()
            .unwrap_or(0)
    }

    /// Total quote calls across all pairs.
    pub fn total_calls(&self) -> u32 {
        self.calls.lock().unwrap().values().sum()
    }
}

#[async_trait]
impl PriceSource for MockPriceSource {
    async fn quote(&self, pair: &PairKey) -> Result<PriceQuote, FeedError> {
        *self.calls.lock().unwrap().entry(pair.clone()).or_insert(0) += 1;

        if self.failing.lock().unwrap().contains(pair) {
            return Err(FeedError::Timeout);
        }

        let price = self
            .prices
            .lock()
            .unwrap()
            .get(pair)
            .copied()
            .ok_or_else(|| FeedError::MissingPrice(pair.label()))?;

        Ok(PriceQuote::new(pair.clone(), price, 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_mock_source_returns_set_price() {
        let source = MockPriceSource::new();
        source.set_price("bitcoin", "usd", 50000.0);

        let quote = source.quote(&PairKey::new("bitcoin", "usd")).await.unwrap();
        assert_eq!(quote.price.to_f64(), 50000.0);
        assert_eq!(source.calls_for("bitcoin", "usd"), 1);
    }

    #[tokio::test]
    async fn test_mock_source_unknown_pair() {
        let source = MockPriceSource::new();
        let result = source.quote(&PairKey::new("unknown", "usd")).await;
        assert!(matches!(result, Err(FeedError::MissingPrice(_))));
    }

    #[tokio::test]
    async fn test_mock_source_failure_injection() {
        let source = MockPriceSource::new();
        source.set_price("bitcoin", "usd", 50000.0);
        source.set_failing("bitcoin", "usd");

        let result = source.quote(&PairKey::new("bitcoin", "usd")).await;
        assert!(matches!(result, Err(FeedError::Timeout)));

        source.clear_failing("bitcoin", "usd");
        assert!(source.quote(&PairKey::new("bitcoin", "usd")).await.is_ok());
        assert_eq!(source.calls_for("bitcoin", "usd"), 2);
    }
}
