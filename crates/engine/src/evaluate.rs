//! Pure decision logic for subscriptions and alert rules.
//!
//! Nothing here performs I/O or mutates its inputs: callers get a
//! description of what should happen and apply the state changes
//! themselves after delivery.

use pricebot_core::{AlertRule, Direction, FixedPoint, PriceQuote, Subscription};

/// True when the price sits on the triggering side of the threshold.
/// A price exactly at the threshold counts as crossed.
pub fn crosses(direction: Direction, threshold: FixedPoint, price: FixedPoint) -> bool {
    match direction {
        Direction::Above => price >= threshold,
        Direction::Below => price <= threshold,
    }
}

/// True when the price sits strictly on the non-triggering side, which
/// restores a fired rule's eligibility.
pub fn opposite_side(direction: Direction, threshold: FixedPoint, price: FixedPoint) -> bool {
    match direction {
        Direction::Above => price < threshold,
        Direction::Below => price > threshold,
    }
}

/// True when a subscription's interval has elapsed (or it never sent).
pub fn subscription_due(sub: &Subscription, now: i64) -> bool {
    match sub.last_sent_at {
        None => true,
        Some(last) => now - last >= sub.interval_secs,
    }
}

/// What the scheduler should do with an alert rule this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertDecision {
    /// Deliver the alert, then disarm.
    Fire,
    /// Restore eligibility; no notification.
    Rearm,
    /// Nothing to do.
    Hold,
}

/// Decide an alert rule against a quote.
///
/// An unarmed rule can only re-arm this tick: it must observe a crossing
/// from the armed state on a later tick to fire again. This hysteresis
/// keeps a price oscillating near the threshold from firing repeatedly.
pub fn decide_alert(rule: &AlertRule, quote: &PriceQuote) -> AlertDecision {
    if !rule.armed {
        if opposite_side(rule.direction, rule.threshold, quote.price) {
            return AlertDecision::Rearm;
        }
        return AlertDecision::Hold;
    }

    if crosses(rule.direction, rule.threshold, quote.price) {
        return AlertDecision::Fire;
    }

    AlertDecision::Hold
}

#[cfg(test)]
mod tests {
    use super::*;
    use compact_str::CompactString;
    use pretty_assertions::assert_eq;
    use pricebot_core::PairKey;

    fn rule(direction: Direction, threshold: f64, armed: bool) -> AlertRule {
        AlertRule {
            id: 1,
            chat_id: 42,
            coin: CompactString::new("bitcoin"),
            currency: CompactString::new("usd"),
            threshold: FixedPoint::from_f64(threshold),
            direction,
            armed,
            last_fired_at: None,
        }
    }

    fn quote(price: f64) -> PriceQuote {
        PriceQuote::new(
            PairKey::new("bitcoin", "usd"),
            FixedPoint::from_f64(price),
            0,
        )
    }

    fn sub(interval_secs: i64, last_sent_at: Option<i64>) -> Subscription {
        Subscription {
            id: 1,
            chat_id: 42,
            coin: CompactString::new("bitcoin"),
            currency: CompactString::new("usd"),
            interval_secs,
            last_sent_at,
        }
    }

    #[test]
    fn test_crosses_inclusive_at_threshold() {
        let t = FixedPoint::from_f64(100.0);
        assert!(crosses(Direction::Above, t, FixedPoint::from_f64(100.0)));
        assert!(crosses(Direction::Below, t, FixedPoint::from_f64(100.0)));
        assert!(!opposite_side(Direction::Above, t, FixedPoint::from_f64(100.0)));
        assert!(!opposite_side(Direction::Below, t, FixedPoint::from_f64(100.0)));
    }

    #[test]
    fn test_armed_rule_fires_on_crossing() {
        assert_eq!(
            decide_alert(&rule(Direction::Above, 100.0, true), &quote(101.0)),
            AlertDecision::Fire
        );
        assert_eq!(
            decide_alert(&rule(Direction::Below, 100.0, true), &quote(99.0)),
            AlertDecision::Fire
        );
    }

    #[test]
    fn test_armed_rule_holds_without_crossing() {
        assert_eq!(
            decide_alert(&rule(Direction::Above, 100.0, true), &quote(99.0)),
            AlertDecision::Hold
        );
        assert_eq!(
            decide_alert(&rule(Direction::Below, 100.0, true), &quote(101.0)),
            AlertDecision::Hold
        );
    }

    #[test]
    fn test_unarmed_rule_never_fires() {
        // Even a clear crossing cannot fire a rule that is not armed.
        assert_eq!(
            decide_alert(&rule(Direction::Above, 100.0, false), &quote(150.0)),
            AlertDecision::Hold
        );
        assert_eq!(
            decide_alert(&rule(Direction::Below, 100.0, false), &quote(50.0)),
            AlertDecision::Hold
        );
    }

    #[test]
    fn test_unarmed_rule_rearms_on_opposite_side() {
        assert_eq!(
            decide_alert(&rule(Direction::Above, 100.0, false), &quote(99.0)),
            AlertDecision::Rearm
        );
        assert_eq!(
            decide_alert(&rule(Direction::Below, 100.0, false), &quote(101.0)),
            AlertDecision::Rearm
        );
    }

    #[test]
    fn test_rearm_and_fire_mutually_exclusive() {
        // The tick that re-arms cannot also fire: an unarmed rule with a
        // price on the triggering side holds.
        let r = rule(Direction::Above, 100.0, false);
        assert_eq!(decide_alert(&r, &quote(100.0)), AlertDecision::Hold);
        assert_eq!(decide_alert(&r, &quote(101.0)), AlertDecision::Hold);
    }

    #[test]
    fn test_decide_is_idempotent() {
        let r = rule(Direction::Above, 100.0, true);
        let q = quote(101.0);
        assert_eq!(decide_alert(&r, &q), decide_alert(&r, &q));

        let unarmed = rule(Direction::Above, 100.0, false);
        let low = quote(98.0);
        assert_eq!(decide_alert(&unarmed, &low), decide_alert(&unarmed, &low));
    }

    #[test]
    fn test_hysteresis_sequence() {
        // 99 -> no action; 101 -> fire; 102 -> hold; 98 -> rearm; 101 -> fire
        let mut r = rule(Direction::Above, 100.0, true);

        assert_eq!(decide_alert(&r, &quote(99.0)), AlertDecision::Hold);

        assert_eq!(decide_alert(&r, &quote(101.0)), AlertDecision::Fire);
        r.mark_fired(10);

        assert_eq!(decide_alert(&r, &quote(102.0)), AlertDecision::Hold);

        assert_eq!(decide_alert(&r, &quote(98.0)), AlertDecision::Rearm);
        r.rearm();

        assert_eq!(decide_alert(&r, &quote(101.0)), AlertDecision::Fire);
    }

    #[test]
    fn test_subscription_due() {
        // Never sent: due immediately
        assert!(subscription_due(&sub(60, None), 0));

        // Interval not elapsed
        assert!(!subscription_due(&sub(60, Some(0)), 30));

        // Elapsed (and past-elapsed) is due
        assert!(subscription_due(&sub(60, Some(0)), 60));
        assert!(subscription_due(&sub(60, Some(0)), 61));
    }
}
