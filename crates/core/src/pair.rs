//! Coin/currency pair identifiers.

use compact_str::CompactString;
use serde::{Deserialize, Serialize};

/// Telegram chat identifier, the addressing unit for all notifications.
pub type ChatId = i64;

/// A (coin, currency) pair, the batching unit for price lookups.
///
/// Coin ids and currency codes are stored lowercase, matching the
/// market-data provider's identifiers (e.g. "bitcoin", "usd").
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PairKey {
    /// Provider coin id (e.g. "bitcoin", "ethereum")
    pub coin: CompactString,
    /// Fiat/vs currency code (e.g. "usd", "eur")
    pub currency: CompactString,
}

impl PairKey {
    /// Create a pair key, normalizing both parts to lowercase.
    pub fn new(coin: &str, currency: &str) -> Self {
        Self {
            coin: CompactString::new(coin.to_lowercase()),
            currency: CompactString::new(currency.to_lowercase()),
        }
    }

    /// Human-readable label (e.g. "bitcoin/usd") for logs.
    pub fn label(&self) -> String {
        format!("{}/{}", self.coin, self.currency)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_pair_key_normalizes_case() {
        let pair = PairKey::new("Bitcoin", "USD");
        assert_eq!(pair.coin.as_str(), "bitcoin");
        assert_eq!(pair.currency.as_str(), "usd");
    }

    #[test]
    fn test_pair_key_equality() {
        let a = PairKey::new("bitcoin", "usd");
        let b = PairKey::new("BITCOIN", "Usd");
        assert_eq!(a, b);

        let c = PairKey::new("bitcoin", "eur");
        assert_ne!(a, c);
    }

    #[test]
    fn test_pair_key_label() {
        let pair = PairKey::new("ethereum", "usd");
        assert_eq!(pair.label(), "ethereum/usd");
    }
}
