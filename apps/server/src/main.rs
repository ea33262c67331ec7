//! Pricebot - Telegram crypto price notifier.
//!
//! Sends scheduled price updates and threshold alerts to subscribed chats.

mod config;

use clap::Parser;
use config::AppConfig;
use pricebot_alerts::{PriceBot, SqliteStore, TelegramNotifier};
use pricebot_engine::{Notifier, Scheduler, SchedulerConfig, Store};
use pricebot_feeds::{CoinGeckoSource, PriceSource};
use std::sync::Arc;
use std::time::Duration;
use teloxide::Bot;
use tokio::sync::watch;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

/// Pricebot CLI
#[derive(Parser, Debug)]
#[command(name = "pricebot")]
#[command(about = "Telegram bot for crypto price updates and alerts", long_about = None)]
struct Args {
    /// SQLite database URL
    #[arg(short, long, default_value = "sqlite:pricebot.db")]
    database_url: String,

    /// Scheduler tick interval in seconds
    #[arg(short, long, default_value_t = 30)]
    tick_secs: u64,

    /// Log level: trace, debug, info, warn, error
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

fn init_logging(level: &str) {
    let level = match level {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    init_logging(&args.log_level);

    let mut config = AppConfig::from_env();
    config.scheduler.tick_secs = args.tick_secs;

    let Ok(token) = std::env::var("TELEGRAM_TOKEN") else {
        error!("TELEGRAM_TOKEN is not set");
        std::process::exit(1);
    };

    let store = match SqliteStore::connect(&args.database_url).await {
        Ok(store) => store,
        Err(e) => {
            error!(url = %args.database_url, error = %e, "failed to open database");
            std::process::exit(1);
        }
    };
    info!(url = %args.database_url, "database ready");

    let source = match CoinGeckoSource::new(Duration::from_millis(config.scheduler.source_timeout_ms)) {
        Ok(source) => Arc::new(source),
        Err(e) => {
            error!(error = %e, "failed to build price source client");
            std::process::exit(1);
        }
    };

    let bot = Bot::new(token);
    let notifier = Arc::new(TelegramNotifier::new(
        bot.clone(),
        Duration::from_millis(config.scheduler.notify_timeout_ms),
    ));

    let scheduler = Arc::new(Scheduler::new(
        Arc::new(store.clone()) as Arc<dyn Store>,
        Arc::clone(&source) as Arc<dyn PriceSource>,
        notifier as Arc<dyn Notifier>,
        SchedulerConfig::new(Duration::from_secs(config.scheduler.tick_secs)),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler_task = tokio::spawn({
        let scheduler = Arc::clone(&scheduler);
        async move { scheduler.run(shutdown_rx).await }
    });

    let pricebot = Arc::new(PriceBot::new(
        bot,
        store,
        source,
        (&config.subscriptions).into(),
    ));

    info!("bot started; press ctrl-c to stop");
    pricebot.run().await;

    // The dispatcher returned (ctrl-c). Stop the scheduler between
    // cycles: an in-flight cycle finishes before the task exits.
    info!("dispatcher stopped; waiting for the scheduler");
    let _ = shutdown_tx.send(true);
    if let Err(e) = scheduler_task.await {
        error!(error = %e, "scheduler task failed");
    }
    info!("shutdown complete");
}
