//! Price data sources.
//!
//! This crate provides:
//! - The `PriceSource` boundary the scheduler fetches quotes through
//! - A CoinGecko REST implementation
//! - A mock source for tests

pub mod coingecko;
pub mod error;
pub mod source;

pub use coingecko::{CoinGeckoSource, MarketInfo};
pub use error::FeedError;
pub use source::{MockPriceSource, PriceSource};
