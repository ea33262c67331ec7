//! Application configuration.

use pricebot_alerts::BotDefaults;
use serde::{Deserialize, Serialize};

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Scheduler settings.
    pub scheduler: SchedulerSettings,
    /// Subscription defaults.
    pub subscriptions: SubscriptionSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerSettings::default(),
            subscriptions: SubscriptionSettings::default(),
        }
    }
}

impl AppConfig {
    /// Defaults with environment overrides applied.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(secs) = std::env::var("DEFAULT_UPDATE_INTERVAL")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            config.subscriptions.default_interval_secs = secs;
        }
        config
    }
}

/// Scheduler settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSettings {
    /// Seconds between evaluation cycles.
    pub tick_secs: u64,
    /// Per-request price source timeout in milliseconds.
    pub source_timeout_ms: u64,
    /// Per-message delivery timeout in milliseconds.
    pub notify_timeout_ms: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            tick_secs: 30,
            source_timeout_ms: 10_000,
            notify_timeout_ms: 10_000,
        }
    }
}

/// Subscription defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionSettings {
    /// Interval used when /subscribe omits one.
    pub default_interval_secs: i64,
    /// Shortest accepted interval; smaller requests are clamped.
    pub min_interval_secs: i64,
    /// Currency used when a command omits one.
    pub default_currency: String,
}

impl Default for SubscriptionSettings {
    fn default() -> Self {
        Self {
            default_interval_secs: 300,
            min_interval_secs: 10,
            default_currency: "usd".to_string(),
        }
    }
}

impl From<&SubscriptionSettings> for BotDefaults {
    fn from(settings: &SubscriptionSettings) -> Self {
        BotDefaults {
            default_interval_secs: settings.default_interval_secs,
            min_interval_secs: settings.min_interval_secs,
            currency: settings.default_currency.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_app_config_default() {
        let config = AppConfig::default();
        assert_eq!(config.scheduler.tick_secs, 30);
        assert_eq!(config.subscriptions.default_interval_secs, 300);
        assert_eq!(config.subscriptions.default_currency, "usd");
    }

    #[test]
    fn test_subscription_settings_to_defaults() {
        let settings = SubscriptionSettings::default();
        let defaults: BotDefaults = (&settings).into();
        assert_eq!(defaults.default_interval_secs, settings.default_interval_secs);
        assert_eq!(defaults.min_interval_secs, settings.min_interval_secs);
    }

    #[test]
    fn test_config_serialization() {
        let config = AppConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: AppConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.scheduler.tick_secs, config.scheduler.tick_secs);
    }
}
