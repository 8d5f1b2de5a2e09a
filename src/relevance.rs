//! Relevance filtering for diff output.
//!
//! Bounds the payload handed to the classifier and shown to the operator,
//! surfacing the most salient changes first.

use crate::types::{BlockDiff, BlockKind, ContentBlock};

/// Default per-category cap
pub const DEFAULT_KEEP_MAX: usize = 60;

/// Texts shorter than this take a score penalty
const SHORT_TEXT_LEN: usize = 12;

/// Salience score: base weight plus a type bonus, minus a short-text
/// penalty.
fn score(block: &ContentBlock) -> i32 {
    let mut s = block.weight;
    match block.kind {
        BlockKind::Price => s += 5,
        BlockKind::Headline => s += 3,
        BlockKind::ListItem => s += 2,
        _ => {}
    }
    if block.text.len() < SHORT_TEXT_LEN {
        s -= 2;
    }
    s
}

/// Sort each category descending by score (stable on ties, preserving
/// extraction order) and truncate to `keep_max`.
pub fn filter_relevant(diff: BlockDiff, keep_max: usize) -> BlockDiff {
    BlockDiff {
        added: rank(diff.added, keep_max),
        removed: rank(diff.removed, keep_max),
        modified: rank(diff.modified, keep_max),
    }
}

fn rank(mut blocks: Vec<ContentBlock>, keep_max: usize) -> Vec<ContentBlock> {
    blocks.sort_by(|a, b| score(b).cmp(&score(a)));
    blocks.truncate(keep_max);
    blocks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::text_fingerprint;

    fn block(kind: BlockKind, text: &str, weight: i32) -> ContentBlock {
        ContentBlock {
            kind,
            text: text.to_string(),
            path: "text-scan".to_string(),
            weight,
            hash: text_fingerprint(text),
        }
    }

    #[test]
    fn test_price_outranks_equal_weight() {
        let diff = BlockDiff {
            added: vec![
                block(BlockKind::Paragraph, "a paragraph of decent length", 9),
                block(BlockKind::Price, "$19.99 special offer", 9),
            ],
            ..Default::default()
        };
        let filtered = filter_relevant(diff, DEFAULT_KEEP_MAX);
        assert_eq!(filtered.added[0].kind, BlockKind::Price);
    }

    #[test]
    fn test_short_text_penalized() {
        let diff = BlockDiff {
            added: vec![
                block(BlockKind::Paragraph, "short", 4),
                block(BlockKind::Paragraph, "a longer piece of text", 4),
            ],
            ..Default::default()
        };
        let filtered = filter_relevant(diff, DEFAULT_KEEP_MAX);
        assert_eq!(filtered.added[0].text, "a longer piece of text");
    }

    #[test]
    fn test_stable_on_ties() {
        let diff = BlockDiff {
            added: vec![
                block(BlockKind::Paragraph, "first equal-score block", 4),
                block(BlockKind::Paragraph, "second equal-score block", 4),
            ],
            ..Default::default()
        };
        let filtered = filter_relevant(diff, DEFAULT_KEEP_MAX);
        assert_eq!(filtered.added[0].text, "first equal-score block");
    }

    #[test]
    fn test_keep_max_caps_each_category() {
        let many: Vec<ContentBlock> = (0..100)
            .map(|i| block(BlockKind::ListItem, &format!("list item number {}", i), 5))
            .collect();
        let diff = BlockDiff {
            added: many.clone(),
            removed: many.clone(),
            modified: many,
        };
        let filtered = filter_relevant(diff, 60);
        assert_eq!(filtered.added.len(), 60);
        assert_eq!(filtered.removed.len(), 60);
        assert_eq!(filtered.modified.len(), 60);
    }
}
