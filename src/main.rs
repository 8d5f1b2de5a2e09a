//! Pagewatch daemon binary
//!
//! Loads the configuration, opens the database, schedules every active
//! target and runs until Ctrl+C.

use pagewatch::{
    AllowAllPolicy, CheckSettings, Checker, Classifier, Config, HttpFetcher, HttpRobotsPolicy,
    LogNotifier, Notifier, RobotsPolicy, Scheduler, Storage, WebhookNotifier,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load();

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| config.general.log_level.clone()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let db_path = config.db_path();
    info!("Opening database at {:?}", db_path);
    let store = Arc::new(Mutex::new(Storage::open(&db_path)?));

    let fetch_timeout = Duration::from_secs(config.fetch.timeout_seconds);
    let fetcher = Arc::new(HttpFetcher::new(&config.fetch.user_agent, fetch_timeout)?);

    let robots: Arc<dyn RobotsPolicy> = if config.fetch.respect_robots {
        Arc::new(HttpRobotsPolicy::new(&config.fetch.user_agent, fetch_timeout)?)
    } else {
        Arc::new(AllowAllPolicy)
    };

    let notifier: Arc<dyn Notifier> = match &config.notify.webhook_url {
        Some(url) => {
            info!("Notifying via webhook");
            Arc::new(WebhookNotifier::new(url)?)
        }
        None => {
            info!("No webhook configured, notifying via log");
            Arc::new(LogNotifier)
        }
    };

    let checker = Arc::new(Checker::new(
        fetcher,
        store.clone(),
        robots,
        notifier,
        Classifier::from_config(&config.classifier, None),
        CheckSettings::from(&config),
    ));

    let scheduler = Scheduler::new(checker, store, &config.scheduler);
    let scheduled = scheduler.load_from_store().await;
    scheduler.start_cleanup().await;
    info!("Watching {} targets. Press Ctrl+C to stop", scheduled);

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");
    scheduler.shutdown().await;

    Ok(())
}
