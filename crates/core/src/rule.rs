//! Standing rules: periodic subscriptions and threshold alerts.

use crate::{ChatId, FixedPoint, PairKey};
use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Which side of the threshold triggers an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Above,
    Below,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Above => "above",
            Direction::Below => "below",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("direction must be 'above' or 'below', got '{0}'")]
pub struct ParseDirectionError(pub String);

impl FromStr for Direction {
    type Err = ParseDirectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "above" => Ok(Direction::Above),
            "below" => Ok(Direction::Below),
            other => Err(ParseDirectionError(other.to_string())),
        }
    }
}

/// A standing request from a chat to receive periodic price updates
/// for one coin in one currency.
///
/// At most one active subscription exists per (chat, coin, currency)
/// triple; the store enforces this with a unique index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    /// Database id
    pub id: i64,
    pub chat_id: ChatId,
    pub coin: CompactString,
    pub currency: CompactString,
    /// Update interval in seconds
    pub interval_secs: i64,
    /// Unix timestamp of the last sent update; None = never sent
    pub last_sent_at: Option<i64>,
}

impl Subscription {
    pub fn pair(&self) -> PairKey {
        PairKey::new(&self.coin, &self.currency)
    }

    /// Record a successfully delivered update.
    pub fn mark_sent(&mut self, now: i64) {
        self.last_sent_at = Some(now);
    }
}

/// A standing request from a chat to be notified once when a coin's
/// price crosses a threshold in a given direction.
///
/// Edge-triggered: after firing, `armed` is false until the price is
/// observed on the opposite side of the threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    /// Database id
    pub id: i64,
    pub chat_id: ChatId,
    pub coin: CompactString,
    pub currency: CompactString,
    pub threshold: FixedPoint,
    pub direction: Direction,
    /// Eligible to fire; restored only by an opposite-side observation
    pub armed: bool,
    /// Unix timestamp of the last firing; None = never fired
    pub last_fired_at: Option<i64>,
}

impl AlertRule {
    pub fn pair(&self) -> PairKey {
        PairKey::new(&self.coin, &self.currency)
    }

    /// Record a delivered firing: disarm until the price returns to the
    /// opposite side of the threshold.
    pub fn mark_fired(&mut self, now: i64) {
        self.armed = false;
        self.last_fired_at = Some(now);
    }

    /// Restore eligibility to fire.
    pub fn rearm(&mut self) {
        self.armed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_direction_parse() {
        assert_eq!("above".parse::<Direction>().unwrap(), Direction::Above);
        assert_eq!("BELOW".parse::<Direction>().unwrap(), Direction::Below);
        assert!("sideways".parse::<Direction>().is_err());
    }

    #[test]
    fn test_direction_round_trip() {
        for dir in [Direction::Above, Direction::Below] {
            assert_eq!(dir.as_str().parse::<Direction>().unwrap(), dir);
        }
    }

    #[test]
    fn test_subscription_mark_sent() {
        let mut sub = Subscription {
            id: 1,
            chat_id: 42,
            coin: CompactString::new("bitcoin"),
            currency: CompactString::new("usd"),
            interval_secs: 300,
            last_sent_at: None,
        };
        sub.mark_sent(1_700_000_000);
        assert_eq!(sub.last_sent_at, Some(1_700_000_000));
    }

    #[test]
    fn test_alert_rule_fire_and_rearm() {
        let mut rule = AlertRule {
            id: 1,
            chat_id: 42,
            coin: CompactString::new("bitcoin"),
            currency: CompactString::new("usd"),
            threshold: FixedPoint::from_f64(100.0),
            direction: Direction::Above,
            armed: true,
            last_fired_at: None,
        };

        rule.mark_fired(1_700_000_000);
        assert!(!rule.armed);
        assert_eq!(rule.last_fired_at, Some(1_700_000_000));

        rule.rearm();
        assert!(rule.armed);
        // last_fired_at is history, re-arming does not clear it
        assert_eq!(rule.last_fired_at, Some(1_700_000_000));
    }

    #[test]
    fn test_rule_pair() {
        let sub = Subscription {
            id: 1,
            chat_id: 42,
            coin: CompactString::new("Ethereum"),
            currency: CompactString::new("EUR"),
            interval_secs: 60,
            last_sent_at: None,
        };
        assert_eq!(sub.pair(), PairKey::new("ethereum", "eur"));
    }
}
