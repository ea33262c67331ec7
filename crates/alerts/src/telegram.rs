//! Telegram bot commands and handlers.
//!
//! Thin pass-throughs to the store: the scheduler picks up created or
//! changed rules on its next cycle. On-demand lookups (/price, /coins)
//! go straight to the price source, outside the cycle.

use crate::db::{DbError, SqliteStore};
use pricebot_core::fmt::{format_price, format_price_line};
use pricebot_core::{Direction, FixedPoint};
use pricebot_feeds::{CoinGeckoSource, MarketInfo};
use std::str::FromStr;
use std::sync::Arc;
use teloxide::prelude::*;
use teloxide::types::ParseMode;
use teloxide::utils::command::BotCommands;
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug)]
pub enum TelegramError {
    #[error("Telegram API error: {0}")]
    Api(#[from] teloxide::RequestError),
    #[error("Database error: {0}")]
    Db(#[from] DbError),
}

/// Bot commands.
#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase", description = "Available commands:")]
pub enum Command {
    #[command(description = "Register this chat and show help")]
    Start,
    #[command(description = "Current price. Usage: /price <coin> [currency]")]
    Price(String),
    #[command(description = "Top coins by market cap. Usage: /coins [n]")]
    Coins(String),
    #[command(description = "Periodic updates. Usage: /subscribe <coin> [interval_secs] [currency]")]
    Subscribe(String),
    #[command(description = "Stop updates for a coin. Usage: /unsubscribe <coin>")]
    Unsubscribe(String),
    #[command(description = "List your subscriptions")]
    List,
    #[command(description = "Create a price alert. Usage: /alert <coin> <above|below> <price> [currency]")]
    Alert(String),
    #[command(description = "List your alerts")]
    Alerts,
    #[command(description = "Delete an alert. Usage: /delalert <alert_id>")]
    DelAlert(String),
    #[command(description = "Show help")]
    Help,
}

/// Defaults applied when a command omits optional arguments.
#[derive(Debug, Clone)]
pub struct BotDefaults {
    pub default_interval_secs: i64,
    /// Shortest accepted update interval; smaller requests are clamped.
    pub min_interval_secs: i64,
    pub currency: String,
}

impl Default for BotDefaults {
    fn default() -> Self {
        Self {
            default_interval_secs: 300,
            min_interval_secs: 10,
            currency: "usd".to_string(),
        }
    }
}

/// Telegram bot wrapper handling user commands.
pub struct PriceBot {
    bot: Bot,
    store: SqliteStore,
    source: Arc<CoinGeckoSource>,
    defaults: BotDefaults,
}

impl PriceBot {
    pub fn new(
        bot: Bot,
        store: SqliteStore,
        source: Arc<CoinGeckoSource>,
        defaults: BotDefaults,
    ) -> Self {
        Self {
            bot,
            store,
            source,
            defaults,
        }
    }

    /// Get the underlying bot for sending messages.
    pub fn bot(&self) -> &Bot {
        &self.bot
    }

    /// Run the bot command handler until shut down (ctrl-c).
    pub async fn run(self: Arc<Self>) {
        let bot = self.bot.clone();
        let handler = Update::filter_message().filter_command::<Command>().endpoint(
            move |bot: Bot, msg: Message, cmd: Command| {
                let this = Arc::clone(&self);
                async move { this.handle_command(bot, msg, cmd).await }
            },
        );

        Dispatcher::builder(bot, handler)
            .enable_ctrlc_handler()
            .build()
            .dispatch()
            .await;
    }

    async fn handle_command(
        &self,
        bot: Bot,
        msg: Message,
        cmd: Command,
    ) -> Result<(), TelegramError> {
        let chat = msg.chat.id;
        self.store.get_or_create_chat(chat.0).await?;

        match cmd {
            Command::Start => {
                let text = format!(
                    "Welcome! I track cryptocurrency prices.\n\n{}",
                    Command::descriptions()
                );
                bot.send_message(chat, text).await?;
            }

            Command::Help => {
                bot.send_message(chat, Command::descriptions().to_string())
                    .await?;
            }

            Command::Price(args) => {
                let mut parts = args.split_whitespace();
                let Some(coin) = parts.next() else {
                    bot.send_message(chat, "Usage: /price <coin> [currency]")
                        .await?;
                    return Ok(());
                };
                let currency = parts.next().unwrap_or(&self.defaults.currency).to_lowercase();

                if let Some(info) = self.lookup_coin(&bot, chat, coin, &currency).await? {
                    bot.send_message(chat, format_market_reply(&info, &currency))
                        .parse_mode(ParseMode::Html)
                        .await?;
                }
            }

            Command::Coins(args) => {
                let n = args
                    .split_whitespace()
                    .next()
                    .and_then(|s| s.parse::<usize>().ok())
                    .map(|n| n.clamp(1, 50))
                    .unwrap_or(10);

                match self.source.top_coins(n, &self.defaults.currency).await {
                    Ok(coins) if !coins.is_empty() => {
                        let lines: Vec<String> = coins
                            .iter()
                            .map(|c| format_price_line(&c.id, c.current_price, &self.defaults.currency))
                            .collect();
                        bot.send_message(chat, lines.join("\n")).await?;
                    }
                    Ok(_) => {
                        bot.send_message(chat, "Could not fetch the coins list.")
                            .await?;
                    }
                    Err(e) => {
                        warn!(error = %e, "top coins lookup failed");
                        bot.send_message(chat, SOURCE_UNAVAILABLE).await?;
                    }
                }
            }

            Command::Subscribe(args) => {
                let mut parts = args.split_whitespace();
                let Some(coin) = parts.next() else {
                    bot.send_message(chat, "Usage: /subscribe <coin> [interval_secs] [currency]")
                        .await?;
                    return Ok(());
                };
                let interval = parts
                    .next()
                    .and_then(|s| s.parse::<i64>().ok())
                    .map(|v| v.max(self.defaults.min_interval_secs))
                    .unwrap_or(self.defaults.default_interval_secs);
                let currency = parts.next().unwrap_or(&self.defaults.currency).to_lowercase();

                let Some(info) = self.lookup_coin(&bot, chat, coin, &currency).await? else {
                    return Ok(());
                };

                let sub = self
                    .store
                    .upsert_subscription(chat.0, coin, &currency, interval)
                    .await?;
                bot.send_message(
                    chat,
                    format!(
                        "Subscribed to {} updates every {}s ({}). Current: {} {}",
                        sub.coin,
                        sub.interval_secs,
                        sub.currency.to_uppercase(),
                        format_price(info.current_price),
                        sub.currency.to_uppercase(),
                    ),
                )
                .await?;
            }

            Command::Unsubscribe(args) => {
                let Some(coin) = args.split_whitespace().next() else {
                    bot.send_message(chat, "Usage: /unsubscribe <coin>").await?;
                    return Ok(());
                };
                let removed = self.store.remove_subscriptions(chat.0, coin).await?;
                let reply = if removed > 0 {
                    format!("Unsubscribed from {}.", coin.to_lowercase())
                } else {
                    format!("You were not subscribed to {}.", coin.to_lowercase())
                };
                bot.send_message(chat, reply).await?;
            }

            Command::List => {
                let subs = self.store.subscriptions_for_chat(chat.0).await?;
                if subs.is_empty() {
                    bot.send_message(chat, "No subscriptions.").await?;
                } else {
                    let lines: Vec<String> = subs
                        .iter()
                        .map(|s| {
                            format!(
                                "{} — every {}s ({})",
                                s.coin,
                                s.interval_secs,
                                s.currency.to_uppercase()
                            )
                        })
                        .collect();
                    bot.send_message(chat, format!("Subscriptions:\n{}", lines.join("\n")))
                        .await?;
                }
            }

            Command::Alert(args) => {
                let (coin, direction, threshold, currency) =
                    match parse_alert_args(&args, &self.defaults.currency) {
                        Ok(parsed) => parsed,
                        Err(reply) => {
                            bot.send_message(chat, reply).await?;
                            return Ok(());
                        }
                    };

                if self.lookup_coin(&bot, chat, &coin, &currency).await?.is_none() {
                    return Ok(());
                }

                let rule = self
                    .store
                    .create_alert(chat.0, &coin, &currency, threshold, direction)
                    .await?;
                bot.send_message(
                    chat,
                    format!(
                        "Alert #{} created: {} {} {} {}",
                        rule.id,
                        rule.coin,
                        rule.direction,
                        format_price(rule.threshold),
                        rule.currency.to_uppercase(),
                    ),
                )
                .await?;
            }

            Command::Alerts => {
                let rules = self.store.alerts_for_chat(chat.0).await?;
                if rules.is_empty() {
                    bot.send_message(chat, "No alerts.").await?;
                } else {
                    let lines: Vec<String> = rules
                        .iter()
                        .map(|r| {
                            format!(
                                "#{} {} {} {} {} ({})",
                                r.id,
                                r.coin,
                                r.direction,
                                format_price(r.threshold),
                                r.currency.to_uppercase(),
                                if r.armed { "armed" } else { "waiting to re-arm" },
                            )
                        })
                        .collect();
                    bot.send_message(chat, format!("Your alerts:\n{}", lines.join("\n")))
                        .await?;
                }
            }

            Command::DelAlert(args) => {
                let id = match args.trim().parse::<i64>() {
                    Ok(id) => id,
                    Err(_) => {
                        bot.send_message(chat, "Usage: /delalert <alert_id>").await?;
                        return Ok(());
                    }
                };
                let reply = if self.store.delete_alert(chat.0, id).await? {
                    format!("Alert #{} deleted.", id)
                } else {
                    format!("Alert #{} not found.", id)
                };
                bot.send_message(chat, reply).await?;
            }
        }

        Ok(())
    }

    /// Fetch market info for a coin, replying to the chat when the coin
    /// is unknown or the source is down. `Ok(None)` means a reply was
    /// already sent.
    async fn lookup_coin(
        &self,
        bot: &Bot,
        chat: ChatId,
        coin: &str,
        currency: &str,
    ) -> Result<Option<MarketInfo>, TelegramError> {
        match self.source.market_info(coin, currency).await {
            Ok(Some(info)) => Ok(Some(info)),
            Ok(None) => {
                bot.send_message(
                    chat,
                    format!(
                        "Could not find coin '{}' in {}.",
                        coin.to_lowercase(),
                        currency.to_uppercase()
                    ),
                )
                .await?;
                Ok(None)
            }
            Err(e) => {
                warn!(coin, error = %e, "market lookup failed");
                bot.send_message(chat, SOURCE_UNAVAILABLE).await?;
                Ok(None)
            }
        }
    }
}

const SOURCE_UNAVAILABLE: &str = "The price source is unavailable right now, try again later.";

/// Parse "/alert <coin> <above|below> <price> [currency]" arguments.
/// The error is the reply to send back to the user.
fn parse_alert_args(
    args: &str,
    default_currency: &str,
) -> Result<(String, Direction, FixedPoint, String), String> {
    let mut parts = args.split_whitespace();
    let (Some(coin), Some(direction), Some(price)) = (parts.next(), parts.next(), parts.next())
    else {
        return Err("Usage: /alert <coin> <above|below> <price> [currency]".to_string());
    };

    let direction = Direction::from_str(direction).map_err(|e| e.to_string())?;
    let price: f64 = price.parse().map_err(|_| "Invalid price value".to_string())?;
    if !price.is_finite() || price <= 0.0 {
        return Err("Invalid price value".to_string());
    }
    let currency = parts.next().unwrap_or(default_currency).to_lowercase();

    Ok((
        coin.to_lowercase(),
        direction,
        FixedPoint::from_f64(price),
        currency,
    ))
}

/// Format a /price reply with 24h change and market cap when available.
fn format_market_reply(info: &MarketInfo, currency: &str) -> String {
    let mut text = format!(
        "<b>{}</b> — {} {}",
        info.id,
        format_price(info.current_price),
        currency.to_uppercase()
    );
    match info.change_24h_pct {
        Some(change) => text.push_str(&format!("\n24h: {:+.2}%", change)),
        None => text.push_str("\n24h: N/A"),
    }
    if let Some(cap) = info.market_cap {
        text.push_str(&format!(" • Mkt cap: {:.0} {}", cap, currency.to_uppercase()));
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use compact_str::CompactString;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_alert_args() {
        let (coin, direction, threshold, currency) =
            parse_alert_args("Bitcoin above 100000 EUR", "usd").unwrap();
        assert_eq!(coin, "bitcoin");
        assert_eq!(direction, Direction::Above);
        assert_eq!(threshold, FixedPoint::from_f64(100000.0));
        assert_eq!(currency, "eur");
    }

    #[test]
    fn test_parse_alert_args_default_currency() {
        let (_, _, _, currency) = parse_alert_args("bitcoin below 90000", "usd").unwrap();
        assert_eq!(currency, "usd");
    }

    #[test]
    fn test_parse_alert_args_rejects_bad_input() {
        assert!(parse_alert_args("", "usd").is_err());
        assert!(parse_alert_args("bitcoin above", "usd").is_err());
        assert!(parse_alert_args("bitcoin sideways 100", "usd").is_err());
        assert!(parse_alert_args("bitcoin above lots", "usd").is_err());
        assert!(parse_alert_args("bitcoin above -5", "usd").is_err());
    }

    #[test]
    fn test_format_market_reply() {
        let info = MarketInfo {
            id: CompactString::new("bitcoin"),
            name: "Bitcoin".to_string(),
            current_price: FixedPoint::from_f64(50000.0),
            change_24h_pct: Some(-1.25),
            market_cap: Some(900000000.0),
        };

        let text = format_market_reply(&info, "usd");
        assert!(text.contains("<b>bitcoin</b> — 50000.00 USD"));
        assert!(text.contains("24h: -1.25%"));
        assert!(text.contains("Mkt cap: 900000000 USD"));
    }

    #[test]
    fn test_format_market_reply_sparse_data() {
        let info = MarketInfo {
            id: CompactString::new("obscurecoin"),
            name: "Obscure".to_string(),
            current_price: FixedPoint::from_f64(0.002),
            change_24h_pct: None,
            market_cap: None,
        };

        let text = format_market_reply(&info, "usd");
        assert!(text.contains("24h: N/A"));
        assert!(!text.contains("Mkt cap"));
    }
}
