//! Materiality classification.
//!
//! Two strategies behind one entry point: a deterministic rule engine that
//! is always available, and an optional external semantic-verdict provider.
//! The provider is timeout-bounded and its failures never fail a check —
//! the rule verdict stands whenever the provider cannot answer.

use crate::config::ClassifierConfig;
use crate::types::{BlockDiff, BlockKind, ContentBlock, Severity, Verdict};
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Per-sample text cap sent to the provider
const SAMPLE_TEXT_LEN: usize = 500;

/// Item caps per category sent to the provider
const SAMPLE_ADDED: usize = 20;
const SAMPLE_REMOVED: usize = 20;
const SAMPLE_MODIFIED: usize = 10;

lazy_static! {
    static ref PRICE_RE: Regex = Regex::new(r"[$€£]\s?\d[\d,\.]*").expect("static regex");
    static ref DATE_RE: Regex = Regex::new(
        r"(?i)\b(\d{1,2}[/.\-]\d{1,2}([/.\-]\d{2,4})?|Jan|Feb|Mar|Apr|May|Jun|Jul|Aug|Sep|Oct|Nov|Dec)\b"
    )
    .expect("static regex");
    static ref STOCK_RE: Regex =
        Regex::new(r"(?i)\b(in stock|out of stock|unavailable|pre[- ]?order)\b")
            .expect("static regex");
    static ref CTA_RE: Regex =
        Regex::new(r"(?i)\b(buy now|add to cart|book now|subscribe)\b").expect("static regex");
}

/// Deterministic rule engine over four pattern families.
///
/// Each family is compared by what it captures in the old versus new text
/// (not by raw match positions). First matching rule wins:
/// stock/price → high, date → medium, call-to-action → low, else none.
pub fn rule_verdict(old: &str, new: &str) -> Verdict {
    let price_changed = all_matches(&PRICE_RE, old) != all_matches(&PRICE_RE, new);
    let date_changed = first_match(&DATE_RE, old) != first_match(&DATE_RE, new);
    let stock_changed = first_match(&STOCK_RE, old) != first_match(&STOCK_RE, new);
    let cta_changed = first_match(&CTA_RE, old) != first_match(&CTA_RE, new);

    if stock_changed || price_changed {
        return Verdict {
            material_change: true,
            severity: Severity::High,
            summary: "Price or availability changed".to_string(),
        };
    }
    if date_changed {
        return Verdict {
            material_change: true,
            severity: Severity::Medium,
            summary: "Date changed".to_string(),
        };
    }
    if cta_changed {
        return Verdict {
            material_change: true,
            severity: Severity::Low,
            summary: "Call-to-action changed".to_string(),
        };
    }
    Verdict::none()
}

fn first_match<'a>(re: &Regex, text: &'a str) -> Option<&'a str> {
    re.find(text).map(|m| m.as_str())
}

fn all_matches<'a>(re: &Regex, text: &'a str) -> Vec<&'a str> {
    re.find_iter(text).map(|m| m.as_str()).collect()
}

/// One filtered block, truncated for transport to the provider
#[derive(Debug, Clone, Serialize)]
pub struct BlockSample {
    #[serde(rename = "type")]
    pub kind: BlockKind,
    pub text: String,
}

/// Cap item count and per-item text length
pub fn pack_samples(blocks: &[ContentBlock], max_items: usize) -> Vec<BlockSample> {
    blocks
        .iter()
        .take(max_items)
        .map(|b| BlockSample {
            kind: b.kind,
            text: truncate_chars(&b.text, SAMPLE_TEXT_LEN),
        })
        .collect()
}

fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

/// Errors at the semantic-provider boundary; always caught, never propagated
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("provider request failed: {0}")]
    Request(String),

    #[error("malformed provider response: {0}")]
    Malformed(String),
}

/// External semantic-verdict provider contract.
///
/// Implementations must be side-effect-free on the core; pagewatch only
/// defines the contract, it does not host the provider.
#[async_trait]
pub trait SemanticVerdictProvider: Send + Sync {
    async fn classify(
        &self,
        url: &str,
        added: &[BlockSample],
        removed: &[BlockSample],
        modified: &[BlockSample],
    ) -> Result<Verdict, ProviderError>;
}

/// Materiality classifier: rule engine first, provider verdict superseding
/// on success.
pub struct Classifier {
    provider: Option<Arc<dyn SemanticVerdictProvider>>,
    provider_timeout: Duration,
}

impl Classifier {
    /// Rule engine only, no external provider
    pub fn rules_only() -> Self {
        Self {
            provider: None,
            provider_timeout: Duration::from_secs(20),
        }
    }

    pub fn with_provider(
        provider: Arc<dyn SemanticVerdictProvider>,
        provider_timeout: Duration,
    ) -> Self {
        Self {
            provider: Some(provider),
            provider_timeout,
        }
    }

    /// Build from configuration; rule engine only until a provider is
    /// attached
    pub fn from_config(
        config: &ClassifierConfig,
        provider: Option<Arc<dyn SemanticVerdictProvider>>,
    ) -> Self {
        Self {
            provider,
            provider_timeout: Duration::from_secs(config.provider_timeout_seconds),
        }
    }

    /// Classify a suspected change.
    ///
    /// Callers invoke this only when some signal already suggests a change;
    /// a fully unchanged page is never classified.
    pub async fn classify(
        &self,
        url: &str,
        old_text: &str,
        new_text: &str,
        filtered: &BlockDiff,
    ) -> Verdict {
        let rule = rule_verdict(old_text, new_text);

        let Some(provider) = &self.provider else {
            return rule;
        };

        let added = pack_samples(&filtered.added, SAMPLE_ADDED);
        let removed = pack_samples(&filtered.removed, SAMPLE_REMOVED);
        let modified = pack_samples(&filtered.modified, SAMPLE_MODIFIED);

        let call = provider.classify(url, &added, &removed, &modified);
        match tokio::time::timeout(self.provider_timeout, call).await {
            Ok(Ok(verdict)) => verdict,
            Ok(Err(e)) => {
                warn!("Semantic provider failed for {}: {}, using rule verdict", url, e);
                rule
            }
            Err(_) => {
                warn!(
                    "Semantic provider timed out after {:?} for {}, using rule verdict",
                    self.provider_timeout, url
                );
                rule
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_price_change_is_high() {
        let v = rule_verdict("Price $10", "Price $20");
        assert!(v.material_change);
        assert_eq!(v.severity, Severity::High);
    }

    #[test]
    fn test_stock_change_is_high() {
        let v = rule_verdict("Widget: in stock", "Widget: out of stock");
        assert!(v.material_change);
        assert_eq!(v.severity, Severity::High);
    }

    #[test]
    fn test_date_change_is_medium() {
        let v = rule_verdict("Sale ends Jan 2024", "Sale ends Feb 2024");
        assert!(v.material_change);
        assert_eq!(v.severity, Severity::Medium);
    }

    #[test]
    fn test_cta_change_is_low() {
        let v = rule_verdict("Our product page", "Our product page Add to Cart");
        assert!(v.material_change);
        assert_eq!(v.severity, Severity::Low);
    }

    #[test]
    fn test_identical_is_none() {
        let v = rule_verdict("Same text $10 Jan", "Same text $10 Jan");
        assert!(!v.material_change);
        assert_eq!(v.severity, Severity::None);
    }

    #[test]
    fn test_price_beats_date() {
        // both families change; first matching rule wins
        let v = rule_verdict("Was $10 on Jan 1", "Now $20 on Feb 2");
        assert_eq!(v.severity, Severity::High);
    }

    #[test]
    fn test_pack_samples_truncates() {
        let long = "x".repeat(2_000);
        let blocks = vec![ContentBlock {
            kind: BlockKind::Paragraph,
            text: long,
            path: "p:nth-of-type(1)".to_string(),
            weight: 4,
            hash: String::new(),
        }];
        let samples = pack_samples(&blocks, 10);
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].text.chars().count(), SAMPLE_TEXT_LEN);
    }

    struct FixedProvider(Verdict);

    #[async_trait]
    impl SemanticVerdictProvider for FixedProvider {
        async fn classify(
            &self,
            _url: &str,
            _added: &[BlockSample],
            _removed: &[BlockSample],
            _modified: &[BlockSample],
        ) -> Result<Verdict, ProviderError> {
            Ok(self.0.clone())
        }
    }

    struct FailingProvider;

    #[async_trait]
    impl SemanticVerdictProvider for FailingProvider {
        async fn classify(
            &self,
            _url: &str,
            _added: &[BlockSample],
            _removed: &[BlockSample],
            _modified: &[BlockSample],
        ) -> Result<Verdict, ProviderError> {
            Err(ProviderError::Request("boom".to_string()))
        }
    }

    struct HangingProvider;

    #[async_trait]
    impl SemanticVerdictProvider for HangingProvider {
        async fn classify(
            &self,
            _url: &str,
            _added: &[BlockSample],
            _removed: &[BlockSample],
            _modified: &[BlockSample],
        ) -> Result<Verdict, ProviderError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(Verdict::none())
        }
    }

    #[tokio::test]
    async fn test_provider_verdict_supersedes_rules() {
        let provider = Arc::new(FixedProvider(Verdict {
            material_change: true,
            severity: Severity::Medium,
            summary: "New contract terms".to_string(),
        }));
        let classifier = Classifier::with_provider(provider, Duration::from_secs(5));

        // rules alone would say High here
        let v = classifier
            .classify("https://example.com", "Price $10", "Price $20", &BlockDiff::default())
            .await;
        assert_eq!(v.severity, Severity::Medium);
        assert_eq!(v.summary, "New contract terms");
    }

    #[tokio::test]
    async fn test_provider_failure_falls_back_to_rules() {
        let classifier =
            Classifier::with_provider(Arc::new(FailingProvider), Duration::from_secs(5));
        let v = classifier
            .classify("https://example.com", "Price $10", "Price $20", &BlockDiff::default())
            .await;
        assert!(v.material_change);
        assert_eq!(v.severity, Severity::High);
    }

    #[tokio::test(start_paused = true)]
    async fn test_configured_timeout_bounds_the_provider() {
        let config = ClassifierConfig {
            provider_timeout_seconds: 1,
        };
        let classifier = Classifier::from_config(&config, Some(Arc::new(HangingProvider)));
        let v = classifier
            .classify("https://example.com", "ends Jan 2024", "ends Feb 2024", &BlockDiff::default())
            .await;
        assert_eq!(v.severity, Severity::Medium);
    }

    #[tokio::test(start_paused = true)]
    async fn test_provider_timeout_falls_back_to_rules() {
        let classifier =
            Classifier::with_provider(Arc::new(HangingProvider), Duration::from_secs(10));
        let v = classifier
            .classify("https://example.com", "ends Jan 2024", "ends Feb 2024", &BlockDiff::default())
            .await;
        assert_eq!(v.severity, Severity::Medium);
    }
}
