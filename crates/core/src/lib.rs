//! Core data types for the price bot.

pub mod fmt;
pub mod pair;
pub mod price;
pub mod rule;

pub use pair::*;
pub use price::*;
pub use rule::*;
