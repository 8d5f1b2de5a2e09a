//! Pagewatch - Scheduled web-page change monitoring
//!
//! This crate watches a set of URLs and reports when their content changes
//! in ways a human would care about:
//!
//! - **Extract**: Pull visible text and typed content blocks out of HTML,
//!   skipping navigation, scripts and cookie-banner junk
//! - **Fingerprint**: SHA-256 over normalized text plus a perceptual
//!   average hash over screenshots, compared by Hamming distance
//! - **Diff**: Structural block diff and bounded line-diff previews
//! - **Classify**: A deterministic rule engine with an optional external
//!   semantic provider deciding whether a change is material
//!
//! # Architecture
//!
//! The scheduler runs one task per target on its own interval, checks are
//! bounded by a global concurrency limit, and every check commits its
//! record and new baseline in a single SQLite transaction.

pub mod checker;
pub mod classify;
pub mod config;
pub mod diff;
pub mod extract;
pub mod fetch;
pub mod fingerprint;
pub mod notify;
pub mod relevance;
pub mod robots;
pub mod scheduler;
pub mod storage;
pub mod types;

// Re-export commonly used types
pub use checker::{CheckError, CheckOutcome, CheckRunner, CheckSettings, Checker};
pub use classify::{BlockSample, Classifier, ProviderError, SemanticVerdictProvider};
pub use config::Config;
pub use diff::{diff_blocks, diff_preview, text_change_ratio};
pub use extract::{extract, Extraction};
pub use fetch::{FetchError, FetchRequest, FetchResponse, Fetcher, HttpFetcher};
pub use fingerprint::{hamming_distance, text_fingerprint, visual_fingerprint, VisualHash};
pub use notify::{ChangeNotification, LogNotifier, Notifier, WebhookNotifier};
pub use relevance::filter_relevant;
pub use robots::{AllowAllPolicy, HttpRobotsPolicy, RobotsPolicy};
pub use scheduler::Scheduler;
pub use storage::{Storage, StorageError};
pub use types::{
    BaselineUpdate, BlockDiff, BlockKind, CheckRecord, CheckReport, ContentBlock, NewTarget,
    RenderMode, Severity, Target, TargetId, Verdict,
};
