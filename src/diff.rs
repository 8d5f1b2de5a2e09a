//! Block-level and text-level comparison.
//!
//! Blocks are compared by structural path: a path only present on one side
//! is wholly added or removed, a shared path is compared by hash-set
//! membership. Text similarity is an LCS ratio over whitespace tokens, and
//! previews are a bounded unified-style line diff.

use crate::types::{BlockDiff, ContentBlock};
use std::collections::{HashMap, HashSet};

/// Token cap for the similarity ratio; beyond this, pages are compared on
/// their leading content only
const RATIO_MAX_TOKENS: usize = 5_000;

/// Line cap for the preview diff computation
const PREVIEW_MAX_INPUT_LINES: usize = 2_000;

/// Preview output budget
const PREVIEW_MAX_LINES: usize = 80;
const PREVIEW_MAX_CHARS: usize = 20_000;

/// Context lines kept around each change in the preview
const PREVIEW_CONTEXT: usize = 2;

/// Compare a previous block set against a current one.
///
/// A path holding multiple blocks is compared by hash-set membership only:
/// reordering with an identical hash set at a path produces no modified
/// entries.
pub fn diff_blocks(previous: &[ContentBlock], current: &[ContentBlock]) -> BlockDiff {
    let prev_idx = index_by_path(previous);
    let curr_idx = index_by_path(current);

    let mut diff = BlockDiff::default();

    // Walk current blocks in extraction order so output ordering is stable
    for block in current {
        match prev_idx.get(block.path.as_str()) {
            None => diff.added.push(block.clone()),
            Some(prev_blocks) => {
                let prev_hashes: HashSet<&str> =
                    prev_blocks.iter().map(|b| b.hash.as_str()).collect();
                if !prev_hashes.contains(block.hash.as_str()) {
                    diff.modified.push(block.clone());
                }
            }
        }
    }

    for block in previous {
        if !curr_idx.contains_key(block.path.as_str()) {
            diff.removed.push(block.clone());
        }
    }

    diff
}

fn index_by_path(blocks: &[ContentBlock]) -> HashMap<&str, Vec<&ContentBlock>> {
    let mut idx: HashMap<&str, Vec<&ContentBlock>> = HashMap::new();
    for block in blocks {
        idx.entry(block.path.as_str()).or_default().push(block);
    }
    idx
}

/// Text-change ratio in [0, 1]: one minus the normalized LCS similarity
/// over whitespace tokens. 0 means identical.
pub fn text_change_ratio(previous: &str, current: &str) -> f64 {
    if previous == current {
        return 0.0;
    }

    let a: Vec<&str> = previous
        .split_whitespace()
        .take(RATIO_MAX_TOKENS)
        .collect();
    let b: Vec<&str> = current.split_whitespace().take(RATIO_MAX_TOKENS).collect();

    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    if a.is_empty() || b.is_empty() {
        return 1.0;
    }

    let lcs = lcs_len(&a, &b);
    let similarity = (2.0 * lcs as f64) / ((a.len() + b.len()) as f64);
    (1.0 - similarity).clamp(0.0, 1.0)
}

/// LCS length with two-row dynamic programming
fn lcs_len<T: PartialEq>(a: &[T], b: &[T]) -> usize {
    let mut prev = vec![0usize; b.len() + 1];
    let mut curr = vec![0usize; b.len() + 1];

    for item_a in a {
        for (j, item_b) in b.iter().enumerate() {
            curr[j + 1] = if item_a == item_b {
                prev[j] + 1
            } else {
                prev[j + 1].max(curr[j])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

/// Bounded human-readable line diff with `-`/`+` markers and two lines of
/// context around each change.
///
/// Callers skip this for identical texts; an identical pair yields an
/// empty string anyway.
pub fn diff_preview(previous: &str, current: &str) -> String {
    if previous == current {
        return String::new();
    }

    let old: Vec<&str> = previous.lines().take(PREVIEW_MAX_INPUT_LINES).collect();
    let new: Vec<&str> = current.lines().take(PREVIEW_MAX_INPUT_LINES).collect();

    let mut out: Vec<String> = Vec::new();
    let mut chars = 0usize;

    'outer: for op in line_opcodes(&old, &new) {
        let rendered: Vec<String> = match op {
            LineOp::Equal(range_old, _) => {
                // keep a little context on both sides of the gap
                let lines = &old[range_old.clone()];
                if lines.len() <= 2 * PREVIEW_CONTEXT {
                    lines.iter().map(|l| format!("  {}", l)).collect()
                } else {
                    let mut ctx: Vec<String> = lines[..PREVIEW_CONTEXT]
                        .iter()
                        .map(|l| format!("  {}", l))
                        .collect();
                    ctx.push("  ...".to_string());
                    ctx.extend(
                        lines[lines.len() - PREVIEW_CONTEXT..]
                            .iter()
                            .map(|l| format!("  {}", l)),
                    );
                    ctx
                }
            }
            LineOp::Delete(range) => old[range].iter().map(|l| format!("- {}", l)).collect(),
            LineOp::Insert(range) => new[range].iter().map(|l| format!("+ {}", l)).collect(),
        };

        for line in rendered {
            chars += line.len() + 1;
            out.push(line);
            if out.len() >= PREVIEW_MAX_LINES || chars >= PREVIEW_MAX_CHARS {
                break 'outer;
            }
        }
    }

    out.join("\n")
}

enum LineOp {
    Equal(std::ops::Range<usize>, std::ops::Range<usize>),
    Delete(std::ops::Range<usize>),
    Insert(std::ops::Range<usize>),
}

/// Opcode walk over a line-level LCS table
fn line_opcodes(old: &[&str], new: &[&str]) -> Vec<LineOp> {
    let n = old.len();
    let m = new.len();

    // full DP table; inputs are capped so this stays small
    let mut table = vec![vec![0u32; m + 1]; n + 1];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            table[i][j] = if old[i] == new[j] {
                table[i + 1][j + 1] + 1
            } else {
                table[i + 1][j].max(table[i][j + 1])
            };
        }
    }

    let mut ops = Vec::new();
    let (mut i, mut j) = (0usize, 0usize);
    while i < n && j < m {
        if old[i] == new[j] {
            let (si, sj) = (i, j);
            while i < n && j < m && old[i] == new[j] {
                i += 1;
                j += 1;
            }
            ops.push(LineOp::Equal(si..i, sj..j));
        } else if table[i + 1][j] >= table[i][j + 1] {
            let si = i;
            while i < n && j < m && old[i] != new[j] && table[i + 1][j] >= table[i][j + 1] {
                i += 1;
            }
            ops.push(LineOp::Delete(si..i));
        } else {
            let sj = j;
            while i < n && j < m && old[i] != new[j] && table[i + 1][j] < table[i][j + 1] {
                j += 1;
            }
            ops.push(LineOp::Insert(sj..j));
        }
    }
    if i < n {
        ops.push(LineOp::Delete(i..n));
    }
    if j < m {
        ops.push(LineOp::Insert(j..m));
    }

    ops
}
