//! Check orchestration.
//!
//! One `run_check` drives the whole pipeline for a target: robots gate,
//! fetch, extract, fingerprint, diff, relevance filter, classify, persist,
//! notify. Failures inside a check are recorded on the check row and never
//! touch the target's baseline; only storage faults propagate to the
//! caller.

use crate::classify::Classifier;
use crate::config::Config;
use crate::diff::{diff_blocks, diff_preview, text_change_ratio};
use crate::extract;
use crate::fetch::{FetchError, FetchRequest, Fetcher};
use crate::fingerprint::{hamming_distance, text_fingerprint, visual_fingerprint};
use crate::notify::{ChangeNotification, Notifier};
use crate::relevance::filter_relevant;
use crate::robots::RobotsPolicy;
use crate::storage::{Storage, StorageError};
use crate::types::{BaselineUpdate, BlockDiff, CheckReport, Severity, TargetId, Verdict};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum CheckError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// How one check ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
    /// Target missing or inactive
    Skipped,
    /// robots.txt disallowed the fetch; recorded, baseline untouched
    Blocked,
    /// Fetch failed; recorded, baseline untouched
    FetchFailed,
    /// Pipeline ran to completion and the check was recorded
    Completed { changed: bool, notified: bool },
}

/// The slice of configuration a check needs
#[derive(Debug, Clone)]
pub struct CheckSettings {
    pub user_agent: String,
    pub fetch_timeout: Duration,
    pub respect_robots: bool,
    /// Hamming distance at or above which screenshots count as changed
    pub hash_sensitivity: u32,
    pub keep_max_blocks: usize,
}

impl From<&Config> for CheckSettings {
    fn from(config: &Config) -> Self {
        Self {
            user_agent: config.fetch.user_agent.clone(),
            fetch_timeout: Duration::from_secs(config.fetch.timeout_seconds),
            respect_robots: config.fetch.respect_robots,
            hash_sensitivity: config.change_detection.hash_sensitivity,
            keep_max_blocks: config.change_detection.keep_max_blocks,
        }
    }
}

/// Executes checks; the scheduler only knows this much
#[async_trait]
pub trait CheckRunner: Send + Sync {
    async fn run_check(&self, target_id: TargetId) -> Result<CheckOutcome, CheckError>;
}

pub struct Checker {
    fetcher: Arc<dyn Fetcher>,
    store: Arc<Mutex<Storage>>,
    robots: Arc<dyn RobotsPolicy>,
    notifier: Arc<dyn Notifier>,
    classifier: Classifier,
    settings: CheckSettings,
}

impl Checker {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        store: Arc<Mutex<Storage>>,
        robots: Arc<dyn RobotsPolicy>,
        notifier: Arc<dyn Notifier>,
        classifier: Classifier,
        settings: CheckSettings,
    ) -> Self {
        Self {
            fetcher,
            store,
            robots,
            notifier,
            classifier,
            settings,
        }
    }

    async fn record(
        &self,
        target_id: TargetId,
        report: &CheckReport,
        baseline: Option<&BaselineUpdate>,
    ) -> Result<(), CheckError> {
        let mut store = self.store.lock().await;
        store.record_check(target_id, report, baseline)?;
        Ok(())
    }
}

#[async_trait]
impl CheckRunner for Checker {
    async fn run_check(&self, target_id: TargetId) -> Result<CheckOutcome, CheckError> {
        let target = {
            let store = self.store.lock().await;
            store.get_target(target_id)?
        };
        let Some(target) = target else {
            warn!("Check requested for unknown target {}", target_id);
            return Ok(CheckOutcome::Skipped);
        };
        if !target.is_active {
            debug!("Skipping check for paused target {}", target_id);
            return Ok(CheckOutcome::Skipped);
        }

        if self.settings.respect_robots
            && !target.ignore_robots
            && !self
                .robots
                .is_allowed(&target.url, &self.settings.user_agent)
                .await
        {
            info!("robots.txt disallows {} for {}", target.url, self.settings.user_agent);
            let report = CheckReport::with_note("blocked by robots.txt");
            self.record(target.id, &report, None).await?;
            return Ok(CheckOutcome::Blocked);
        }

        let request = FetchRequest {
            url: target.url.clone(),
            render_mode: target.render_mode,
            wait_selector: target.wait_selector.clone(),
            timeout: self.settings.fetch_timeout,
        };
        let response = match self.fetcher.fetch(&request).await {
            Ok(response) => response,
            Err(e) => {
                warn!("Fetch failed for {}: {}", target.url, e);
                let mut report = CheckReport::with_note(format!("fetch failed: {}", e));
                if let FetchError::Status(code) = e {
                    report.status_code = code;
                }
                self.record(target.id, &report, None).await?;
                return Ok(CheckOutcome::FetchFailed);
            }
        };

        let extraction = extract::extract(&response.html, &target.selectors);
        let text_hash = text_fingerprint(&extraction.text);
        let visual_hash = response.screenshot.as_deref().and_then(|bytes| {
            match visual_fingerprint(bytes) {
                Ok(hash) => Some(hash),
                Err(e) => {
                    warn!("Undecodable screenshot for {}: {}", target.url, e);
                    None
                }
            }
        });

        // a fresh target has no baseline hash; its first check can only
        // establish one, never report a change
        let changed_text = matches!(&target.last_text_hash, Some(prev) if *prev != text_hash);
        let (changed_visual, visual_distance) = match (visual_hash, target.last_visual_hash) {
            (Some(now), Some(prev)) => {
                let distance = hamming_distance(now, prev);
                (distance >= self.settings.hash_sensitivity, distance)
            }
            _ => (false, 0),
        };
        // the block diff runs whenever a baseline exists: selector-scoped
        // text can miss a change the full-document blocks still see
        let filtered = if target.last_text_hash.is_some() {
            filter_relevant(
                diff_blocks(&target.last_blocks, &extraction.blocks),
                self.settings.keep_max_blocks,
            )
        } else {
            BlockDiff::default()
        };
        let changed = changed_text || changed_visual || !filtered.is_empty();

        let verdict = if changed {
            self.classifier
                .classify(&target.url, &target.last_text, &extraction.text, &filtered)
                .await
        } else {
            Verdict::none()
        };

        let report = CheckReport {
            status_code: response.status,
            raw_text_len: response.html.len(),
            norm_text_len: extraction.text.len(),
            change_ratio: if changed_text {
                text_change_ratio(&target.last_text, &extraction.text)
            } else {
                0.0
            },
            changed_text,
            changed_visual,
            visual_distance,
            diff_preview: if changed_text {
                diff_preview(&target.last_text, &extraction.text)
            } else {
                String::new()
            },
            material_change: verdict.material_change,
            severity: verdict.severity,
            summary: verdict.summary.clone(),
            changes_json: if filtered.is_empty() {
                "[]".to_string()
            } else {
                serde_json::to_string(&filtered)?
            },
            note: String::new(),
        };

        let baseline = BaselineUpdate {
            text: extraction.text,
            text_hash,
            visual_hash,
            blocks: extraction.blocks,
            checked_at: Utc::now(),
        };
        self.record(target.id, &report, Some(&baseline)).await?;

        let should_notify = verdict.material_change
            || verdict.severity >= Severity::Medium
            || changed_text
            || changed_visual;
        let notified = if should_notify {
            let notification = ChangeNotification::new(
                &target.url,
                verdict.severity,
                &verdict.summary,
                &filtered,
            );
            self.notifier.notify(&notification).await;
            true
        } else {
            false
        };

        info!(
            target_id = target.id,
            url = %target.url,
            changed_text,
            changed_visual,
            severity = verdict.severity.as_str(),
            "Check completed"
        );
        Ok(CheckOutcome::Completed { changed, notified })
    }
}
