//! Change notifications.
//!
//! Notification delivery is best-effort: a failed or slow webhook is logged
//! and dropped, it never fails the check that produced it.

use crate::types::{BlockDiff, Severity};
use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;
use tracing::{error, info};

/// Sample lines included per direction in a notification
const MAX_SAMPLE_LINES: usize = 6;

/// What an operator sees when a watched page changes
#[derive(Debug, Clone)]
pub struct ChangeNotification {
    pub url: String,
    pub severity: Severity,
    pub summary: String,
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl ChangeNotification {
    pub fn new(url: &str, severity: Severity, summary: &str, diff: &BlockDiff) -> Self {
        Self {
            url: url.to_string(),
            severity,
            summary: summary.to_string(),
            added: diff
                .added
                .iter()
                .take(MAX_SAMPLE_LINES)
                .map(|b| b.text.clone())
                .collect(),
            removed: diff
                .removed
                .iter()
                .take(MAX_SAMPLE_LINES)
                .map(|b| b.text.clone())
                .collect(),
        }
    }

    /// Plain-text rendering used by both backends
    pub fn render(&self) -> String {
        let mut out = format!("Change detected on {}", self.url);
        if self.severity > Severity::None {
            out.push_str(&format!(" [{}]", self.severity.as_str()));
        }
        if !self.summary.is_empty() {
            out.push_str(&format!("\n{}", self.summary));
        }
        for line in &self.added {
            out.push_str(&format!("\n+ {}", line));
        }
        for line in &self.removed {
            out.push_str(&format!("\n- {}", line));
        }
        out
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &ChangeNotification);
}

/// Fallback notifier: writes the notification to the log
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: &ChangeNotification) {
        info!(
            url = %notification.url,
            severity = notification.severity.as_str(),
            "{}",
            notification.render()
        );
    }
}

/// Posts notifications as JSON to a configured webhook URL
pub struct WebhookNotifier {
    client: reqwest::Client,
    webhook_url: String,
}

impl WebhookNotifier {
    pub fn new(webhook_url: &str) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            webhook_url: webhook_url.to_string(),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, notification: &ChangeNotification) {
        let body = json!({ "text": notification.render() });
        match self.client.post(&self.webhook_url).json(&body).send().await {
            Ok(response) if response.status().is_success() => {}
            Ok(response) => {
                error!(
                    "Webhook for {} returned {}",
                    notification.url,
                    response.status()
                );
            }
            Err(e) => {
                error!("Webhook delivery failed for {}: {}", notification.url, e);
            }
        }
    }
}
