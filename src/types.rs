//! Core types used throughout pagewatch.
//!
//! This module defines the data model for watch targets, extracted content
//! blocks, diff results and check records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for a watch target (SQLite rowid)
pub type TargetId = i64;

/// How a target's page is fetched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderMode {
    /// Plain HTTP GET, no script execution
    Static,
    /// Headless-browser rendering (external collaborator)
    Browser,
}

impl RenderMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RenderMode::Static => "static",
            RenderMode::Browser => "browser",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "browser" => RenderMode::Browser,
            _ => RenderMode::Static,
        }
    }
}

/// Semantic type of an extracted content block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    Headline,
    Paragraph,
    ListItem,
    Price,
    Date,
}

impl BlockKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockKind::Headline => "headline",
            BlockKind::Paragraph => "paragraph",
            BlockKind::ListItem => "list_item",
            BlockKind::Price => "price",
            BlockKind::Date => "date",
        }
    }
}

/// One semantically typed, positionally addressed fragment of page content.
///
/// Produced fresh per extraction; persisted only as part of a target's
/// serialized baseline block set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentBlock {
    #[serde(rename = "type")]
    pub kind: BlockKind,
    pub text: String,
    /// Structural path, e.g. `div:nth-of-type(2) > p:nth-of-type(1)`
    pub path: String,
    /// Type-derived base importance
    pub weight: i32,
    /// SHA-256 of the block's own normalized text
    pub hash: String,
}

/// Result of comparing a previous block set against a current one
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BlockDiff {
    pub added: Vec<ContentBlock>,
    pub removed: Vec<ContentBlock>,
    pub modified: Vec<ContentBlock>,
}

impl BlockDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }
}

/// Severity of a detected change, totally ordered
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    None,
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::None => "none",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "low" => Severity::Low,
            "medium" => Severity::Medium,
            "high" => Severity::High,
            _ => Severity::None,
        }
    }
}

/// Materiality judgment for one check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verdict {
    pub material_change: bool,
    pub severity: Severity,
    /// Short human summary of what changed
    pub summary: String,
}

impl Verdict {
    /// Neutral verdict: nothing a human would care about
    pub fn none() -> Self {
        Self {
            material_change: false,
            severity: Severity::None,
            summary: String::new(),
        }
    }
}

/// One monitored URL plus its fetch/poll configuration and baseline state.
///
/// Baseline fields are updated only as an atomic unit together with the
/// check record they originate from; a failed check never mutates them.
#[derive(Debug, Clone)]
pub struct Target {
    pub id: TargetId,
    pub url: String,
    /// Ordered CSS-like selectors scoping text extraction (may be empty)
    pub selectors: Vec<String>,
    pub render_mode: RenderMode,
    /// Poll interval in minutes, floor 5
    pub interval_minutes: u32,
    pub is_active: bool,
    /// Opt out of the robots-policy gate
    pub ignore_robots: bool,
    /// Selector a rendering fetcher should wait for before capturing
    pub wait_selector: Option<String>,
    pub last_text: String,
    pub last_text_hash: Option<String>,
    pub last_visual_hash: Option<u64>,
    pub last_blocks: Vec<ContentBlock>,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Parameters for creating a target
#[derive(Debug, Clone, Deserialize)]
pub struct NewTarget {
    pub url: String,
    #[serde(default)]
    pub selectors: Vec<String>,
    #[serde(default = "default_render_mode")]
    pub render_mode: RenderMode,
    #[serde(default = "default_interval")]
    pub interval_minutes: u32,
    #[serde(default)]
    pub ignore_robots: bool,
    #[serde(default)]
    pub wait_selector: Option<String>,
}

fn default_render_mode() -> RenderMode {
    RenderMode::Static
}

fn default_interval() -> u32 {
    60
}

/// Measurements and verdict produced by one executed check, before it is
/// given an id and timestamp by the store.
#[derive(Debug, Clone)]
pub struct CheckReport {
    pub status_code: u16,
    pub raw_text_len: usize,
    pub norm_text_len: usize,
    /// Text-change ratio in [0, 1]; 0 means identical
    pub change_ratio: f64,
    pub changed_text: bool,
    pub changed_visual: bool,
    /// Hamming distance between visual fingerprints (0 when not compared)
    pub visual_distance: u32,
    pub diff_preview: String,
    pub material_change: bool,
    pub severity: Severity,
    pub summary: String,
    /// Serialized filtered diff payload
    pub changes_json: String,
    /// Free text for blocked/error states
    pub note: String,
}

impl Default for CheckReport {
    fn default() -> Self {
        Self {
            status_code: 0,
            raw_text_len: 0,
            norm_text_len: 0,
            change_ratio: 0.0,
            changed_text: false,
            changed_visual: false,
            visual_distance: 0,
            diff_preview: String::new(),
            material_change: false,
            severity: Severity::None,
            summary: String::new(),
            changes_json: "[]".to_string(),
            note: String::new(),
        }
    }
}

impl CheckReport {
    /// Note-only report for blocked/error states
    pub fn with_note(note: impl Into<String>) -> Self {
        Self {
            note: note.into(),
            ..Self::default()
        }
    }
}

/// One row of a target's append-only check history
#[derive(Debug, Clone)]
pub struct CheckRecord {
    pub id: i64,
    pub target_id: TargetId,
    pub checked_at: DateTime<Utc>,
    pub report: CheckReport,
}

/// New baseline written together with a successful check (one transaction)
#[derive(Debug, Clone)]
pub struct BaselineUpdate {
    pub text: String,
    pub text_hash: String,
    /// Kept as-is when the check captured no screenshot
    pub visual_hash: Option<u64>,
    pub blocks: Vec<ContentBlock>,
    pub checked_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::None < Severity::Low);
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Medium < Severity::High);
    }

    #[test]
    fn test_severity_roundtrip() {
        for s in [
            Severity::None,
            Severity::Low,
            Severity::Medium,
            Severity::High,
        ] {
            assert_eq!(Severity::parse(s.as_str()), s);
        }
        assert_eq!(Severity::parse("garbage"), Severity::None);
    }

    #[test]
    fn test_block_serialization_uses_snake_case_kind() {
        let block = ContentBlock {
            kind: BlockKind::ListItem,
            text: "item".to_string(),
            path: "ul:nth-of-type(1) > li:nth-of-type(1)".to_string(),
            weight: 5,
            hash: "abc".to_string(),
        };
        let json = serde_json::to_string(&block).unwrap();
        assert!(json.contains("\"type\":\"list_item\""));

        let back: ContentBlock = serde_json::from_str(&json).unwrap();
        assert_eq!(back, block);
    }

    #[test]
    fn test_block_diff_empty() {
        let diff = BlockDiff::default();
        assert!(diff.is_empty());
    }

    #[test]
    fn test_render_mode_parse() {
        assert_eq!(RenderMode::parse("browser"), RenderMode::Browser);
        assert_eq!(RenderMode::parse("static"), RenderMode::Static);
        assert_eq!(RenderMode::parse("unknown"), RenderMode::Static);
    }
}
