//! Durable storage and Telegram transport for the price bot.
//!
//! This crate provides:
//! - SQLite-backed storage for chats, subscriptions and alert rules
//! - Telegram bot command handling
//! - The outbound notifier the scheduler delivers through

pub mod db;
pub mod notifier;
pub mod telegram;

pub use db::{DbError, SqliteStore};
pub use notifier::TelegramNotifier;
pub use telegram::{BotDefaults, Command, PriceBot, TelegramError};
