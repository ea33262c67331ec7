//! The scheduler: periodic evaluation cycles over all standing rules.
//!
//! One driver issues cycles strictly sequentially. Within a cycle,
//! price lookups for distinct pairs and deliveries for distinct rules
//! run concurrently; they touch disjoint state. State for a rule is
//! persisted only after its notification was delivered, so a delivery
//! failure leaves the rule eligible to retry on the next cycle.

use crate::evaluate::{decide_alert, subscription_due, AlertDecision};
use crate::render::{render_alert, render_update};
use async_trait::async_trait;
use futures_util::future::join_all;
use pricebot_core::{AlertRule, ChatId, PairKey, PriceQuote, Subscription};
use pricebot_feeds::PriceSource;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store backend error: {0}")]
    Backend(String),
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("chat has blocked the bot or no longer exists")]
    Blocked,
    #[error("delivery timed out")]
    Timeout,
    #[error("delivery failed: {0}")]
    Send(String),
}

/// Durable storage for subscriptions and alert rules.
///
/// Each save is atomic for a single entity and writes only the fields
/// the scheduler owns (timestamps and the armed flag), never
/// user-configured fields like threshold or interval.
#[async_trait]
pub trait Store: Send + Sync {
    async fn load_active_subscriptions(&self) -> Result<Vec<Subscription>, StoreError>;

    /// All alert rules, armed or not: unarmed rules still need the
    /// re-arm check every cycle.
    async fn load_alert_rules(&self) -> Result<Vec<AlertRule>, StoreError>;

    async fn save_subscription(&self, sub: &Subscription) -> Result<(), StoreError>;

    async fn save_alert_rule(&self, rule: &AlertRule) -> Result<(), StoreError>;

    /// Remove a chat and everything it owns (the chat blocked the bot
    /// or no longer exists).
    async fn remove_chat(&self, chat_id: ChatId) -> Result<(), StoreError>;
}

/// Outbound message delivery; timeout-bounded by the implementation.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, chat_id: ChatId, text: &str) -> Result<(), NotifyError>;
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Wall-clock interval between cycles.
    pub tick: Duration,
}

impl SchedulerConfig {
    /// Lower bound on the tick; anything shorter hammers the provider
    /// without improving staleness for minute-scale rule intervals.
    pub const MIN_TICK: Duration = Duration::from_secs(5);

    pub fn new(tick: Duration) -> Self {
        Self {
            tick: tick.max(Self::MIN_TICK),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(30),
        }
    }
}

/// What happened during one cycle.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub subscriptions: usize,
    pub alerts: usize,
    /// Distinct (coin, currency) pairs looked up.
    pub pairs: usize,
    pub pairs_failed: usize,
    pub updates_sent: usize,
    pub alerts_fired: usize,
    pub rearmed: usize,
    pub delivery_failures: usize,
    /// Deliveries that succeeded but whose state write failed; those
    /// rules may notify again next cycle.
    pub persist_failures: usize,
    pub chats_removed: usize,
}

impl CycleReport {
    pub fn has_failures(&self) -> bool {
        self.pairs_failed > 0 || self.delivery_failures > 0 || self.persist_failures > 0
    }
}

enum Task {
    Update(Subscription, PriceQuote),
    Fire(AlertRule, PriceQuote),
    Rearm(AlertRule),
}

enum Outcome {
    UpdateSent { persisted: bool },
    AlertFired { persisted: bool },
    Rearmed { persisted: bool },
    DeliveryFailed,
    ChatRemoved,
}

/// Drives periodic evaluation cycles and turns decisions into durable
/// state changes and outbound notifications.
pub struct Scheduler {
    store: Arc<dyn Store>,
    source: Arc<dyn PriceSource>,
    notifier: Arc<dyn Notifier>,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn Store>,
        source: Arc<dyn PriceSource>,
        notifier: Arc<dyn Notifier>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            store,
            source,
            notifier,
            config,
        }
    }

    /// Run cycles until the shutdown flag is set. Shutdown is observed
    /// only between cycles: an in-flight cycle always completes, so a
    /// stop never leaves a tick half-committed.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.config.tick);
        info!(tick_secs = self.config.tick.as_secs(), "scheduler started");

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown.changed() => {}
            }
            if *shutdown.borrow() {
                break;
            }

            let now = chrono::Utc::now().timestamp();
            match self.run_cycle(now).await {
                Ok(report) if report.has_failures() => {
                    warn!(?report, "cycle completed with failures");
                }
                Ok(report) => {
                    debug!(?report, "cycle completed");
                }
                Err(e) => {
                    // Nothing was evaluated; the next tick retries.
                    warn!(error = %e, "cycle skipped: rule set could not be loaded");
                }
            }
        }

        info!("scheduler stopped");
    }

    /// One evaluation pass over all rules at time `now`.
    pub async fn run_cycle(&self, now: i64) -> Result<CycleReport, StoreError> {
        let subscriptions = self.store.load_active_subscriptions().await?;
        let rules = self.store.load_alert_rules().await?;

        let mut report = CycleReport {
            subscriptions: subscriptions.len(),
            alerts: rules.len(),
            ..Default::default()
        };

        // One lookup per distinct pair, regardless of how many rules
        // reference it.
        let mut pairs: HashSet<PairKey> = HashSet::new();
        pairs.extend(subscriptions.iter().map(Subscription::pair));
        pairs.extend(rules.iter().map(AlertRule::pair));
        report.pairs = pairs.len();

        let quotes = self.fetch_quotes(pairs).await;
        report.pairs_failed = report.pairs - quotes.len();

        // Rules whose pair has no quote this cycle are skipped: no
        // action, no error, re-evaluated next tick.
        let mut tasks = Vec::new();
        for sub in subscriptions {
            let Some(quote) = quotes.get(&sub.pair()) else {
                continue;
            };
            if subscription_due(&sub, now) {
                tasks.push(Task::Update(sub, quote.clone()));
            }
        }
        for rule in rules {
            let Some(quote) = quotes.get(&rule.pair()) else {
                continue;
            };
            match decide_alert(&rule, quote) {
                AlertDecision::Fire => tasks.push(Task::Fire(rule, quote.clone())),
                AlertDecision::Rearm => tasks.push(Task::Rearm(rule)),
                AlertDecision::Hold => {}
            }
        }

        let outcomes = join_all(tasks.into_iter().map(|task| self.dispatch(task, now))).await;
        for outcome in outcomes {
            match outcome {
                Outcome::UpdateSent { persisted } => {
                    report.updates_sent += 1;
                    if !persisted {
                        report.persist_failures += 1;
                    }
                }
                Outcome::AlertFired { persisted } => {
                    report.alerts_fired += 1;
                    if !persisted {
                        report.persist_failures += 1;
                    }
                }
                Outcome::Rearmed { persisted } => {
                    if persisted {
                        report.rearmed += 1;
                    } else {
                        report.persist_failures += 1;
                    }
                }
                Outcome::DeliveryFailed => report.delivery_failures += 1,
                Outcome::ChatRemoved => report.chats_removed += 1,
            }
        }

        Ok(report)
    }

    /// Fetch quotes for all pairs concurrently. A failed pair is
    /// missing from the result; the others proceed.
    async fn fetch_quotes(&self, pairs: HashSet<PairKey>) -> HashMap<PairKey, PriceQuote> {
        let futures: Vec<_> = pairs
            .into_iter()
            .map(|pair| {
                let source = Arc::clone(&self.source);
                async move {
                    match source.quote(&pair).await {
                        Ok(quote) => Some((pair, quote)),
                        Err(e) => {
                            warn!(pair = %pair.label(), error = %e, "price lookup failed; skipping pair this cycle");
                            None
                        }
                    }
                }
            })
            .collect();

        join_all(futures).await.into_iter().flatten().collect()
    }

    /// Deliver one action, then persist its state change. Delivery comes
    /// first: a failed send leaves the rule unchanged for retry, while a
    /// failed write after a successful send risks one duplicate.
    async fn dispatch(&self, task: Task, now: i64) -> Outcome {
        match task {
            Task::Update(mut sub, quote) => {
                let text = render_update(&sub, &quote);
                match self.notifier.send(sub.chat_id, &text).await {
                    Ok(()) => {}
                    Err(NotifyError::Blocked) => return self.purge_chat(sub.chat_id).await,
                    Err(e) => {
                        warn!(chat = sub.chat_id, coin = %sub.coin, error = %e, "update delivery failed; retrying next cycle");
                        return Outcome::DeliveryFailed;
                    }
                }

                sub.mark_sent(now);
                let persisted = match self.store.save_subscription(&sub).await {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(subscription = sub.id, error = %e, "state write failed after delivery; duplicate update possible next cycle");
                        false
                    }
                };
                Outcome::UpdateSent { persisted }
            }

            Task::Fire(mut rule, quote) => {
                let text = render_alert(&rule, &quote);
                match self.notifier.send(rule.chat_id, &text).await {
                    Ok(()) => {}
                    Err(NotifyError::Blocked) => return self.purge_chat(rule.chat_id).await,
                    Err(e) => {
                        warn!(chat = rule.chat_id, rule = rule.id, error = %e, "alert delivery failed; retrying next cycle");
                        return Outcome::DeliveryFailed;
                    }
                }

                rule.mark_fired(now);
                let persisted = match self.store.save_alert_rule(&rule).await {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(rule = rule.id, error = %e, "state write failed after delivery; duplicate alert possible next cycle");
                        false
                    }
                };
                Outcome::AlertFired { persisted }
            }

            Task::Rearm(mut rule) => {
                rule.rearm();
                let persisted = match self.store.save_alert_rule(&rule).await {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(rule = rule.id, error = %e, "re-arm write failed; retrying next cycle");
                        false
                    }
                };
                Outcome::Rearmed { persisted }
            }
        }
    }

    async fn purge_chat(&self, chat_id: ChatId) -> Outcome {
        info!(chat = chat_id, "chat is gone; removing its subscriptions and alerts");
        if let Err(e) = self.store.remove_chat(chat_id).await {
            warn!(chat = chat_id, error = %e, "failed to remove dead chat");
        }
        Outcome::ChatRemoved
    }
}

/// In-memory store for tests.
#[derive(Default)]
pub struct MemoryStore {
    subscriptions: Mutex<Vec<Subscription>>,
    rules: Mutex<Vec<AlertRule>>,
    fail_loads: AtomicBool,
    fail_saves: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_subscription(&self, sub: Subscription) {
        self.subscriptions.lock().unwrap().push(sub);
    }

    pub fn insert_rule(&self, rule: AlertRule) {
        self.rules.lock().unwrap().push(rule);
    }

    pub fn subscription(&self, id: i64) -> Option<Subscription> {
        self.subscriptions
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.id == id)
            .cloned()
    }

    pub fn rule(&self, id: i64) -> Option<AlertRule> {
        self.rules.lock().unwrap().iter().find(|r| r.id == id).cloned()
    }

    pub fn set_fail_loads(&self, fail: bool) {
        self.fail_loads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn load_active_subscriptions(&self) -> Result<Vec<Subscription>, StoreError> {
        if self.fail_loads.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("load failure injected".to_string()));
        }
        Ok(self.subscriptions.lock().unwrap().clone())
    }

    async fn load_alert_rules(&self) -> Result<Vec<AlertRule>, StoreError> {
        if self.fail_loads.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("load failure injected".to_string()));
        }
        Ok(self.rules.lock().unwrap().clone())
    }

    async fn save_subscription(&self, sub: &Subscription) -> Result<(), StoreError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("save failure injected".to_string()));
        }
        let mut subs = self.subscriptions.lock().unwrap();
        if let Some(existing) = subs.iter_mut().find(|s| s.id == sub.id) {
            existing.last_sent_at = sub.last_sent_at;
        }
        Ok(())
    }

    async fn save_alert_rule(&self, rule: &AlertRule) -> Result<(), StoreError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("save failure injected".to_string()));
        }
        let mut rules = self.rules.lock().unwrap();
        if let Some(existing) = rules.iter_mut().find(|r| r.id == rule.id) {
            existing.armed = rule.armed;
            existing.last_fired_at = rule.last_fired_at;
        }
        Ok(())
    }

    async fn remove_chat(&self, chat_id: ChatId) -> Result<(), StoreError> {
        self.subscriptions
            .lock()
            .unwrap()
            .retain(|s| s.chat_id != chat_id);
        self.rules.lock().unwrap().retain(|r| r.chat_id != chat_id);
        Ok(())
    }
}

/// Notifier double that records deliveries.
#[derive(Default)]
pub struct MockNotifier {
    sent: Mutex<Vec<(ChatId, String)>>,
    fail_all: AtomicBool,
    blocked_chats: Mutex<HashSet<ChatId>>,
}

impl MockNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail_all.store(fail, Ordering::SeqCst);
    }

    pub fn block_chat(&self, chat_id: ChatId) {
        self.blocked_chats.lock().unwrap().insert(chat_id);
    }

    pub fn sent(&self) -> Vec<(ChatId, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl Notifier for MockNotifier {
    async fn send(&self, chat_id: ChatId, text: &str) -> Result<(), NotifyError> {
        if self.blocked_chats.lock().unwrap().contains(&chat_id) {
            return Err(NotifyError::Blocked);
        }
        if self.fail_all.load(Ordering::SeqCst) {
            return Err(NotifyError::Send("delivery failure injected".to_string()));
        }
        self.sent.lock().unwrap().push((chat_id, text.to_string()));
        Ok(())
    }
}
