//! Price representation and per-cycle quotes.

use crate::PairKey;
use serde::{Deserialize, Serialize};

/// Fixed-point number with 8 decimal places.
/// Used for precise price representation without floating-point errors;
/// threshold comparisons are exact integer comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FixedPoint(pub u64);

impl FixedPoint {
    /// Number of decimal places (8 for price precision)
    pub const DECIMALS: u32 = 8;
    /// Scale factor: 10^8 (fits comfortably in u64 for most prices)
    pub const SCALE: u64 = 100_000_000;

    /// Create from f64 (user input, provider JSON).
    pub fn from_f64(value: f64) -> Self {
        Self((value * Self::SCALE as f64) as u64)
    }

    /// Convert to f64 (for display).
    pub fn to_f64(self) -> f64 {
        self.0 as f64 / Self::SCALE as f64
    }
}

/// A single price observation for a (coin, currency) pair.
/// Ephemeral: owned by one evaluation cycle, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceQuote {
    pub pair: PairKey,
    pub price: FixedPoint,
    /// Unix timestamp (seconds) of retrieval.
    pub fetched_at: i64,
}

impl PriceQuote {
    pub fn new(pair: PairKey, price: FixedPoint, fetched_at: i64) -> Self {
        Self {
            pair,
            price,
            fetched_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_fixed_point_conversion() {
        let one = FixedPoint::from_f64(1.0);
        assert_eq!(one.0, 100_000_000u64);

        let price = FixedPoint::from_f64(50000.5);
        assert_eq!(price.to_f64(), 50000.5);
    }

    #[test]
    fn test_fixed_point_ordering() {
        let low = FixedPoint::from_f64(99.99);
        let threshold = FixedPoint::from_f64(100.0);
        let high = FixedPoint::from_f64(100.01);

        assert!(low < threshold);
        assert!(high > threshold);
        assert!(threshold >= FixedPoint::from_f64(100.0));
        assert!(threshold <= FixedPoint::from_f64(100.0));
    }

    #[test]
    fn test_price_quote_new() {
        let quote = PriceQuote::new(
            PairKey::new("bitcoin", "usd"),
            FixedPoint::from_f64(50000.0),
            1_700_000_000,
        );
        assert_eq!(quote.pair.coin.as_str(), "bitcoin");
        assert_eq!(quote.price.to_f64(), 50000.0);
        assert_eq!(quote.fetched_at, 1_700_000_000);
    }
}
