//! Display helpers for prices and rules.

use crate::FixedPoint;

/// Format a price with precision appropriate to its magnitude.
pub fn format_price(price: FixedPoint) -> String {
    let value = price.to_f64();
    if value == 0.0 {
        return "0".to_string();
    }
    let abs = value.abs();
    if abs >= 1000.0 {
        format!("{:.2}", value)
    } else if abs >= 1.0 {
        format!("{:.4}", value)
    } else if abs >= 0.01 {
        format!("{:.6}", value)
    } else {
        format!("{:.8}", value)
    }
}

/// One-line price summary, e.g. "bitcoin — 50000.00 USD".
pub fn format_price_line(coin: &str, price: FixedPoint, currency: &str) -> String {
    format!(
        "{} — {} {}",
        coin,
        format_price(price),
        currency.to_uppercase()
    )
}
