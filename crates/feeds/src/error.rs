//! Error types for price source operations.

use thiserror::Error;

/// Errors that can occur while fetching price data.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("provider returned HTTP {0}")]
    Status(u16),

    #[error("failed to parse response: {0}")]
    Parse(String),

    #[error("no price in response for {0}")]
    MissingPrice(String),

    #[error("request timed out")]
    Timeout,
}

impl From<reqwest::Error> for FeedError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FeedError::Timeout
        } else if err.is_decode() {
            FeedError::Parse(err.to_string())
        } else {
            FeedError::Http(err.to_string())
        }
    }
}

impl From<serde_json::Error> for FeedError {
    fn from(err: serde_json::Error) -> Self {
        FeedError::Parse(err.to_string())
    }
}

impl FeedError {
    /// Returns true if this error is transient and likely to succeed on
    /// a later cycle. A missing price usually means an unknown coin id
    /// and will not fix itself.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FeedError::Http(_) | FeedError::Status(_) | FeedError::Timeout
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(FeedError::Timeout.is_transient());
        assert!(FeedError::Status(503).is_transient());
        assert!(FeedError::Http("connection refused".to_string()).is_transient());
        assert!(!FeedError::MissingPrice("dogecoin/usd".to_string()).is_transient());
        assert!(!FeedError::Parse("bad json".to_string()).is_transient());
    }
}
