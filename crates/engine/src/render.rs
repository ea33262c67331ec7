//! Rendering of outbound notification messages (HTML parse mode).

use pricebot_core::fmt::format_price;
use pricebot_core::{AlertRule, PriceQuote, Subscription};

/// Scheduled subscription update.
pub fn render_update(sub: &Subscription, quote: &PriceQuote) -> String {
    format!(
        "🔄 Scheduled update\n<b>{}</b> — {} {}",
        sub.coin,
        format_price(quote.price),
        sub.currency.to_uppercase()
    )
}

/// Threshold alert firing.
pub fn render_alert(rule: &AlertRule, quote: &PriceQuote) -> String {
    format!(
        "🚨 <b>Price alert</b>\n\n<b>{}</b> is {} {} {}\nCurrent: {} {}",
        rule.coin,
        rule.direction,
        format_price(rule.threshold),
        rule.currency.to_uppercase(),
        format_price(quote.price),
        rule.currency.to_uppercase()
    )
}
