//! Per-target check scheduling.
//!
//! Each scheduled target owns one task driving a `tokio::time::interval`
//! with `MissedTickBehavior::Delay`: ticks that pile up behind a slow check
//! collapse into exactly one catch-up run. A global semaphore bounds how
//! many checks run at once. Cancellation is only observed between runs, so
//! an in-flight check always completes and commits.

use crate::checker::CheckRunner;
use crate::config::SchedulerConfig;
use crate::storage::Storage;
use crate::types::TargetId;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

struct ScheduleHandle {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// One lock per target. Scheduled and on-demand runs both take it around
/// `run_check`, so runs for the same target never interleave and baseline
/// reads and writes stay serialized.
#[derive(Default)]
struct TargetLocks {
    inner: Mutex<HashMap<TargetId, Arc<Mutex<()>>>>,
}

impl TargetLocks {
    async fn for_target(&self, target_id: TargetId) -> Arc<Mutex<()>> {
        let mut map = self.inner.lock().await;
        map.entry(target_id).or_default().clone()
    }
}

pub struct Scheduler {
    runner: Arc<dyn CheckRunner>,
    store: Arc<Mutex<Storage>>,
    semaphore: Arc<Semaphore>,
    locks: Arc<TargetLocks>,
    tasks: Mutex<HashMap<TargetId, ScheduleHandle>>,
    cleanup: Mutex<Option<JoinHandle<()>>>,
    shutdown: CancellationToken,
    retention_days: u32,
    cleanup_interval: Duration,
}

impl Scheduler {
    pub fn new(
        runner: Arc<dyn CheckRunner>,
        store: Arc<Mutex<Storage>>,
        config: &SchedulerConfig,
    ) -> Self {
        Self {
            runner,
            store,
            semaphore: Arc::new(Semaphore::new(config.max_concurrent_checks.max(1))),
            locks: Arc::new(TargetLocks::default()),
            tasks: Mutex::new(HashMap::new()),
            cleanup: Mutex::new(None),
            shutdown: CancellationToken::new(),
            retention_days: config.retention_days,
            cleanup_interval: Duration::from_secs(u64::from(config.cleanup_interval_hours) * 3600),
        }
    }

    /// Start (or restart) the recurring check task for a target
    pub async fn schedule(
        &self,
        target_id: TargetId,
        interval: Duration,
        first_run_immediately: bool,
    ) {
        let token = self.shutdown.child_token();
        let task = check_loop(
            self.runner.clone(),
            self.semaphore.clone(),
            self.locks.clone(),
            token.clone(),
            target_id,
            interval,
            first_run_immediately,
        );
        let handle = tokio::spawn(task);

        let mut tasks = self.tasks.lock().await;
        if let Some(old) = tasks.insert(target_id, ScheduleHandle { token, handle }) {
            old.token.cancel();
        }
        info!(
            "Scheduled target {} every {}s (immediate: {})",
            target_id,
            interval.as_secs(),
            first_run_immediately
        );
    }

    /// Stop future runs for a target. An in-flight check finishes.
    pub async fn unschedule(&self, target_id: TargetId) -> bool {
        let mut tasks = self.tasks.lock().await;
        match tasks.remove(&target_id) {
            Some(handle) => {
                handle.token.cancel();
                info!("Unscheduled target {}", target_id);
                true
            }
            None => false,
        }
    }

    /// One off-schedule check, bounded by the concurrency limit and
    /// serialized against the target's scheduled runs
    pub async fn run_now(&self, target_id: TargetId) {
        let runner = self.runner.clone();
        let semaphore = self.semaphore.clone();
        let locks = self.locks.clone();
        tokio::spawn(async move {
            let Ok(_permit) = semaphore.acquire().await else {
                return;
            };
            let lock = locks.for_target(target_id).await;
            let _guard = lock.lock().await;
            if let Err(e) = runner.run_check(target_id).await {
                error!("On-demand check for target {} failed: {}", target_id, e);
            }
        });
    }

    /// Schedule every active target from the store. Targets never checked
    /// before run immediately; the rest wait out their first interval.
    pub async fn load_from_store(&self) -> usize {
        let targets = {
            let store = self.store.lock().await;
            match store.list_targets(true) {
                Ok(targets) => targets,
                Err(e) => {
                    error!("Failed to list targets: {}", e);
                    return 0;
                }
            }
        };

        let count = targets.len();
        for target in targets {
            let interval = Duration::from_secs(u64::from(target.interval_minutes) * 60);
            self.schedule(target.id, interval, target.last_checked_at.is_none())
                .await;
        }
        count
    }

    /// Start the periodic history-cleanup task
    pub async fn start_cleanup(&self) {
        let store = self.store.clone();
        let token = self.shutdown.child_token();
        let retention_days = self.retention_days;
        let cleanup_interval = self.cleanup_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(cleanup_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // skip the immediate first tick
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let store = store.lock().await;
                match store.cleanup_old_results(retention_days) {
                    Ok(0) => {}
                    Ok(deleted) => info!("Cleaned up {} old check results", deleted),
                    Err(e) => warn!("History cleanup failed: {}", e),
                }
            }
        });

        let mut cleanup = self.cleanup.lock().await;
        if let Some(old) = cleanup.replace(handle) {
            old.abort();
        }
    }

    pub async fn scheduled_count(&self) -> usize {
        self.tasks.lock().await.len()
    }

    /// Cancel everything and wait for in-flight checks to finish
    pub async fn shutdown(&self) {
        self.shutdown.cancel();

        let handles: Vec<ScheduleHandle> = {
            let mut tasks = self.tasks.lock().await;
            tasks.drain().map(|(_, h)| h).collect()
        };
        for handle in handles {
            if let Err(e) = handle.handle.await {
                warn!("Schedule task panicked: {}", e);
            }
        }

        let cleanup = { self.cleanup.lock().await.take() };
        if let Some(handle) = cleanup {
            let _ = handle.await;
        }
        info!("Scheduler stopped");
    }
}

async fn check_loop(
    runner: Arc<dyn CheckRunner>,
    semaphore: Arc<Semaphore>,
    locks: Arc<TargetLocks>,
    token: CancellationToken,
    target_id: TargetId,
    interval: Duration,
    first_run_immediately: bool,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    if !first_run_immediately {
        // consume the tick an interval yields immediately on creation
        tokio::select! {
            _ = token.cancelled() => return,
            _ = ticker.tick() => {}
        }
    }

    loop {
        tokio::select! {
            _ = token.cancelled() => return,
            _ = ticker.tick() => {}
        }
        let permit = tokio::select! {
            _ = token.cancelled() => return,
            permit = semaphore.acquire() => permit,
        };
        let Ok(_permit) = permit else {
            return;
        };
        let lock = locks.for_target(target_id).await;
        let guard = tokio::select! {
            _ = token.cancelled() => return,
            guard = lock.lock() => guard,
        };
        // no cancellation below this point; the run commits or fails whole
        if let Err(e) = runner.run_check(target_id).await {
            error!("Check for target {} failed: {}", target_id, e);
        }
        drop(guard);
    }
}
