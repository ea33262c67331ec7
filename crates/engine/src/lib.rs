//! Evaluation and scheduling of subscription updates and price alerts.
//!
//! This crate provides:
//! - Pure decision functions over rules and quotes
//! - The scheduler loop that turns decisions into deliveries and
//!   durable state changes
//! - The `Store` and `Notifier` seams the scheduler drives, with
//!   in-memory doubles for tests

pub mod evaluate;
pub mod render;
pub mod scheduler;

pub use evaluate::{crosses, decide_alert, opposite_side, subscription_due, AlertDecision};
pub use render::{render_alert, render_update};
pub use scheduler::{
    CycleReport, MemoryStore, MockNotifier, Notifier, NotifyError, Scheduler, SchedulerConfig,
    Store, StoreError,
};
