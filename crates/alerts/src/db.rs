//! SQLite persistence for chats, subscriptions and alert rules.

use async_trait::async_trait;
use compact_str::CompactString;
use pricebot_core::{AlertRule, ChatId, Direction, FixedPoint, Subscription};
use pricebot_engine::{Store, StoreError};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

type SubscriptionRow = (i64, i64, String, String, i64, Option<i64>);
type AlertRow = (i64, i64, String, String, i64, String, bool, Option<i64>);

/// Database connection for rule storage.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connect to the SQLite database at the given URL, creating and
    /// migrating it as needed.
    pub async fn connect(database_url: &str) -> Result<Self, DbError> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), DbError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chats (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                chat_id INTEGER NOT NULL UNIQUE,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS subscriptions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                chat_id INTEGER NOT NULL,
                coin TEXT NOT NULL,
                currency TEXT NOT NULL DEFAULT 'usd',
                interval_secs INTEGER NOT NULL DEFAULT 300,
                last_sent_at INTEGER,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                UNIQUE(chat_id, coin, currency)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS alerts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                chat_id INTEGER NOT NULL,
                coin TEXT NOT NULL,
                currency TEXT NOT NULL DEFAULT 'usd',
                threshold INTEGER NOT NULL,
                direction TEXT NOT NULL,
                armed INTEGER NOT NULL DEFAULT 1,
                last_fired_at INTEGER,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_subscriptions_chat ON subscriptions(chat_id)")
            .execute(&self.pool)
            .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_alerts_chat ON alerts(chat_id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Register a chat if it isn't known yet.
    pub async fn get_or_create_chat(&self, chat_id: ChatId) -> Result<(), DbError> {
        sqlx::query("INSERT OR IGNORE INTO chats (chat_id) VALUES (?)")
            .bind(chat_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Create a subscription, or update the interval of an existing one
    /// for the same (chat, coin, currency) triple.
    pub async fn upsert_subscription(
        &self,
        chat_id: ChatId,
        coin: &str,
        currency: &str,
        interval_secs: i64,
    ) -> Result<Subscription, DbError> {
        let coin = coin.to_lowercase();
        let currency = currency.to_lowercase();

        sqlx::query(
            r#"
            INSERT INTO subscriptions (chat_id, coin, currency, interval_secs)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(chat_id, coin, currency)
            DO UPDATE SET interval_secs = excluded.interval_secs
            "#,
        )
        .bind(chat_id)
        .bind(&coin)
        .bind(&currency)
        .bind(interval_secs)
        .execute(&self.pool)
        .await?;

        let row = sqlx::query_as::<_, SubscriptionRow>(
            "SELECT id, chat_id, coin, currency, interval_secs, last_sent_at
             FROM subscriptions WHERE chat_id = ? AND coin = ? AND currency = ?",
        )
        .bind(chat_id)
        .bind(&coin)
        .bind(&currency)
        .fetch_one(&self.pool)
        .await?;

        Ok(row_to_subscription(row))
    }

    /// Remove a chat's subscriptions for a coin (all currencies).
    /// Returns the number of removed rows.
    pub async fn remove_subscriptions(&self, chat_id: ChatId, coin: &str) -> Result<u64, DbError> {
        let result = sqlx::query("DELETE FROM subscriptions WHERE chat_id = ? AND coin = ?")
            .bind(chat_id)
            .bind(coin.to_lowercase())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    pub async fn subscriptions_for_chat(
        &self,
        chat_id: ChatId,
    ) -> Result<Vec<Subscription>, DbError> {
        let rows = sqlx::query_as::<_, SubscriptionRow>(
            "SELECT id, chat_id, coin, currency, interval_secs, last_sent_at
             FROM subscriptions WHERE chat_id = ? ORDER BY coin, currency",
        )
        .bind(chat_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(row_to_subscription).collect())
    }

    pub async fn create_alert(
        &self,
        chat_id: ChatId,
        coin: &str,
        currency: &str,
        threshold: FixedPoint,
        direction: Direction,
    ) -> Result<AlertRule, DbError> {
        let coin = coin.to_lowercase();
        let currency = currency.to_lowercase();

        let result = sqlx::query(
            "INSERT INTO alerts (chat_id, coin, currency, threshold, direction) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(chat_id)
        .bind(&coin)
        .bind(&currency)
        .bind(threshold.0 as i64)
        .bind(direction.as_str())
        .execute(&self.pool)
        .await?;

        Ok(AlertRule {
            id: result.last_insert_rowid(),
            chat_id,
            coin: CompactString::new(coin),
            currency: CompactString::new(currency),
            threshold,
            direction,
            armed: true,
            last_fired_at: None,
        })
    }

    pub async fn alerts_for_chat(&self, chat_id: ChatId) -> Result<Vec<AlertRule>, DbError> {
        let rows = sqlx::query_as::<_, AlertRow>(
            "SELECT id, chat_id, coin, currency, threshold, direction, armed, last_fired_at
             FROM alerts WHERE chat_id = ? ORDER BY id",
        )
        .bind(chat_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().filter_map(row_to_rule).collect())
    }

    /// Delete one of the chat's alerts by id. Returns false when the id
    /// does not exist or belongs to another chat.
    pub async fn delete_alert(&self, chat_id: ChatId, alert_id: i64) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM alerts WHERE id = ? AND chat_id = ?")
            .bind(alert_id)
            .bind(chat_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn all_subscriptions(&self) -> Result<Vec<Subscription>, DbError> {
        let rows = sqlx::query_as::<_, SubscriptionRow>(
            "SELECT id, chat_id, coin, currency, interval_secs, last_sent_at FROM subscriptions",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(row_to_subscription).collect())
    }

    async fn all_alert_rules(&self) -> Result<Vec<AlertRule>, DbError> {
        let rows = sqlx::query_as::<_, AlertRow>(
            "SELECT id, chat_id, coin, currency, threshold, direction, armed, last_fired_at FROM alerts",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().filter_map(row_to_rule).collect())
    }
}

fn row_to_subscription(row: SubscriptionRow) -> Subscription {
    let (id, chat_id, coin, currency, interval_secs, last_sent_at) = row;
    Subscription {
        id,
        chat_id,
        coin: CompactString::new(coin),
        currency: CompactString::new(currency),
        interval_secs,
        last_sent_at,
    }
}

/// Convert an alert row, skipping rows whose direction column no longer
/// parses: a malformed rule must never take down a whole cycle.
fn row_to_rule(row: AlertRow) -> Option<AlertRule> {
    let (id, chat_id, coin, currency, threshold, direction, armed, last_fired_at) = row;

    let direction = match Direction::from_str(&direction) {
        Ok(d) => d,
        Err(e) => {
            warn!(alert = id, error = %e, "skipping malformed alert row");
            return None;
        }
    };

    Some(AlertRule {
        id,
        chat_id,
        coin: CompactString::new(coin),
        currency: CompactString::new(currency),
        threshold: FixedPoint(threshold as u64),
        direction,
        armed,
        last_fired_at,
    })
}

fn backend(err: DbError) -> StoreError {
    StoreError::Backend(err.to_string())
}

#[async_trait]
impl Store for SqliteStore {
    async fn load_active_subscriptions(&self) -> Result<Vec<Subscription>, StoreError> {
        self.all_subscriptions().await.map_err(backend)
    }

    async fn load_alert_rules(&self) -> Result<Vec<AlertRule>, StoreError> {
        self.all_alert_rules().await.map_err(backend)
    }

    async fn save_subscription(&self, sub: &Subscription) -> Result<(), StoreError> {
        // Only the scheduler-owned field; user-set fields stay untouched.
        sqlx::query("UPDATE subscriptions SET last_sent_at = ? WHERE id = ?")
            .bind(sub.last_sent_at)
            .bind(sub.id)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn save_alert_rule(&self, rule: &AlertRule) -> Result<(), StoreError> {
        sqlx::query("UPDATE alerts SET armed = ?, last_fired_at = ? WHERE id = ?")
            .bind(rule.armed)
            .bind(rule.last_fired_at)
            .bind(rule.id)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn remove_chat(&self, chat_id: ChatId) -> Result<(), StoreError> {
        for table in ["subscriptions", "alerts", "chats"] {
            sqlx::query(&format!("DELETE FROM {table} WHERE chat_id = ?"))
                .bind(chat_id)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_store_connect() {
        let store = SqliteStore::connect("sqlite::memory:").await.unwrap();
        store.get_or_create_chat(123).await.unwrap();
        // Registering twice is fine
        store.get_or_create_chat(123).await.unwrap();
    }

    #[tokio::test]
    async fn test_upsert_subscription_updates_in_place() {
        let store = SqliteStore::connect("sqlite::memory:").await.unwrap();

        let sub = store
            .upsert_subscription(42, "Bitcoin", "USD", 300)
            .await
            .unwrap();
        assert_eq!(sub.coin.as_str(), "bitcoin");
        assert_eq!(sub.currency.as_str(), "usd");
        assert_eq!(sub.interval_secs, 300);
        assert_eq!(sub.last_sent_at, None);

        // Subscribing again changes the interval, not the identity
        let updated = store
            .upsert_subscription(42, "bitcoin", "usd", 60)
            .await
            .unwrap();
        assert_eq!(updated.id, sub.id);
        assert_eq!(updated.interval_secs, 60);

        let subs = store.subscriptions_for_chat(42).await.unwrap();
        assert_eq!(subs.len(), 1);
    }

    #[tokio::test]
    async fn test_save_subscription_touches_only_last_sent() {
        let store = SqliteStore::connect("sqlite::memory:").await.unwrap();
        let mut sub = store
            .upsert_subscription(42, "bitcoin", "usd", 300)
            .await
            .unwrap();

        // A buggy caller mutating user-set fields must not leak them into
        // the database through the scheduler save path.
        sub.mark_sent(1_700_000_000);
        sub.interval_secs = 1;
        Store::save_subscription(&store, &sub).await.unwrap();

        let stored = &store.subscriptions_for_chat(42).await.unwrap()[0];
        assert_eq!(stored.last_sent_at, Some(1_700_000_000));
        assert_eq!(stored.interval_secs, 300);
    }

    #[tokio::test]
    async fn test_alert_round_trip() {
        let store = SqliteStore::connect("sqlite::memory:").await.unwrap();

        let rule = store
            .create_alert(42, "bitcoin", "usd", FixedPoint::from_f64(100.5), Direction::Above)
            .await
            .unwrap();
        assert!(rule.armed);

        let loaded = &store.alerts_for_chat(42).await.unwrap()[0];
        assert_eq!(loaded, &rule);
        // Threshold survives exactly (stored as raw fixed-point)
        assert_eq!(loaded.threshold, FixedPoint::from_f64(100.5));
    }

    #[tokio::test]
    async fn test_save_alert_rule_persists_state_machine() {
        let store = SqliteStore::connect("sqlite::memory:").await.unwrap();
        let mut rule = store
            .create_alert(42, "bitcoin", "usd", FixedPoint::from_f64(100.0), Direction::Above)
            .await
            .unwrap();

        rule.mark_fired(1_700_000_000);
        Store::save_alert_rule(&store, &rule).await.unwrap();

        let loaded = &Store::load_alert_rules(&store).await.unwrap()[0];
        assert!(!loaded.armed);
        assert_eq!(loaded.last_fired_at, Some(1_700_000_000));

        rule.rearm();
        Store::save_alert_rule(&store, &rule).await.unwrap();
        let loaded = &Store::load_alert_rules(&store).await.unwrap()[0];
        assert!(loaded.armed);
    }

    #[tokio::test]
    async fn test_delete_alert_scoped_to_chat() {
        let store = SqliteStore::connect("sqlite::memory:").await.unwrap();
        let rule = store
            .create_alert(42, "bitcoin", "usd", FixedPoint::from_f64(100.0), Direction::Above)
            .await
            .unwrap();

        // Another chat cannot delete it
        assert!(!store.delete_alert(7, rule.id).await.unwrap());
        assert_eq!(store.alerts_for_chat(42).await.unwrap().len(), 1);

        assert!(store.delete_alert(42, rule.id).await.unwrap());
        assert!(store.alerts_for_chat(42).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_direction_row_is_skipped() {
        let store = SqliteStore::connect("sqlite::memory:").await.unwrap();
        store
            .create_alert(42, "bitcoin", "usd", FixedPoint::from_f64(100.0), Direction::Above)
            .await
            .unwrap();

        // Simulate a row written by an older or broken version
        sqlx::query(
            "INSERT INTO alerts (chat_id, coin, currency, threshold, direction) VALUES (42, 'doge', 'usd', 1, 'sideways')",
        )
        .execute(&store.pool)
        .await
        .unwrap();

        let rules = Store::load_alert_rules(&store).await.unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].coin.as_str(), "bitcoin");
    }

    #[tokio::test]
    async fn test_remove_chat_cascades() {
        let store = SqliteStore::connect("sqlite::memory:").await.unwrap();
        store.get_or_create_chat(42).await.unwrap();
        store
            .upsert_subscription(42, "bitcoin", "usd", 300)
            .await
            .unwrap();
        store
            .create_alert(42, "bitcoin", "usd", FixedPoint::from_f64(100.0), Direction::Above)
            .await
            .unwrap();
        store
            .upsert_subscription(7, "bitcoin", "usd", 300)
            .await
            .unwrap();

        Store::remove_chat(&store, 42).await.unwrap();

        assert!(store.subscriptions_for_chat(42).await.unwrap().is_empty());
        assert!(store.alerts_for_chat(42).await.unwrap().is_empty());
        // Other chats untouched
        assert_eq!(store.subscriptions_for_chat(7).await.unwrap().len(), 1);
    }
}
