//! Structural content extraction from raw markup.
//!
//! Turns an HTML document into (normalized text, typed content blocks).
//! Text extraction tries three strategies in priority order: user selectors,
//! a `<main>` scope, then the longest text-bearing containers. Block
//! extraction always runs over the full document regardless of selector
//! mode, so the diff engine sees the same shape either way.
//!
//! Junk elements (nav, banners, cookie/consent walls, overlays) and
//! non-rendering elements are never descended into — scraper's tree is
//! immutable, so sanitization is a skip-predicate rather than node removal.

use crate::fingerprint::text_fingerprint;
use crate::types::{BlockKind, ContentBlock};
use lazy_static::lazy_static;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::warn;

/// Id/class substrings that mark boilerplate chrome
const JUNK_PATTERNS: &[&str] = &[
    "cookie",
    "consent",
    "subscribe",
    "signup",
    "modal",
    "toast",
    "overlay",
];

/// Tags that never render user-visible content
const NON_RENDERING_TAGS: &[&str] = &[
    "script", "style", "noscript", "template", "head", "iframe", "svg",
];

/// Structural chrome stripped before any text is read
const JUNK_TAGS: &[&str] = &["header", "nav", "footer"];

/// Paragraphs shorter than this are noise, not content
const MIN_PARAGRAPH_LEN: usize = 40;

/// List items shorter than this are noise
const MIN_LIST_ITEM_LEN: usize = 10;

/// How many of the longest containers the last-resort strategy joins
const FALLBACK_CONTAINERS: usize = 8;

lazy_static! {
    static ref MAIN_SEL: Selector = Selector::parse("main").expect("static selector");
    static ref HEADING_SEL: Selector = Selector::parse(
        "main h1, main h2, main h3, article h1, article h2, article h3, [role='heading']"
    )
    .expect("static selector");
    static ref PARA_SEL: Selector = Selector::parse("main p, article p").expect("static selector");
    static ref LIST_SEL: Selector =
        Selector::parse("main li, article li").expect("static selector");
    static ref CONTAINER_SEL: Selector =
        Selector::parse("article, section, div, p").expect("static selector");
    static ref PRICE_RE: Regex =
        Regex::new(r"[$€£]\s?\d[\d,\.]*|\b\d[\d,\.]*\s?(?:USD|EUR|GBP)\b")
            .expect("static regex");
    static ref DATE_RE: Regex = Regex::new(
        r"(?i)\b(20\d{2}|Jan|Feb|Mar|Apr|May|Jun|Jul|Aug|Sep|Oct|Nov|Dec)\b"
    )
    .expect("static regex");
}

/// Output of one extraction pass
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    /// Normalized text used for hashing and diffing
    pub text: String,
    /// Typed blocks in document order, deduplicated on (kind, text)
    pub blocks: Vec<ContentBlock>,
}

/// Extract normalized text and content blocks from raw markup.
///
/// Malformed or empty markup yields an empty result, never an error —
/// callers must treat that as "no content observed".
pub fn extract(html: &str, selectors: &[String]) -> Extraction {
    if html.trim().is_empty() {
        return Extraction::default();
    }

    let doc = Html::parse_document(html);

    Extraction {
        text: extract_text(&doc, selectors),
        blocks: extract_blocks(&doc),
    }
}

/// Collapse whitespace runs to single spaces and trim ends.
///
/// Applied identically everywhere text is compared or hashed.
pub fn normalize_segment(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Normalize each part, drop empties, join with newlines
fn normalize_joined<I: IntoIterator<Item = String>>(parts: I) -> String {
    parts
        .into_iter()
        .map(|p| normalize_segment(&p))
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn extract_text(doc: &Html, selectors: &[String]) -> String {
    // 1) user selectors, in the order given
    if !selectors.is_empty() {
        let mut parts = Vec::new();
        for raw in selectors {
            let sel = match Selector::parse(raw) {
                Ok(sel) => sel,
                Err(_) => {
                    warn!("Skipping unparseable selector: {}", raw);
                    continue;
                }
            };
            for el in doc.select(&sel) {
                if !in_junk(el) {
                    parts.push(visible_text(el));
                }
            }
        }
        let text = normalize_joined(parts);
        if !text.is_empty() {
            return text;
        }
    }

    // 2) <main> scope
    if let Some(main) = doc.select(&MAIN_SEL).next() {
        let text = normalize_segment(&visible_text(main));
        if !text.is_empty() {
            return text;
        }
    }

    // 3) longest text-bearing containers
    let mut candidates: Vec<String> = doc
        .select(&CONTAINER_SEL)
        .filter(|el| !in_junk(*el))
        .map(|el| normalize_segment(&visible_text(el)))
        .filter(|t| !t.is_empty())
        .collect();
    candidates.sort_by(|a, b| b.len().cmp(&a.len()));
    candidates.truncate(FALLBACK_CONTAINERS);
    candidates.join("\n")
}

fn extract_blocks(doc: &Html) -> Vec<ContentBlock> {
    let mut blocks = Vec::new();

    for el in doc.select(&HEADING_SEL) {
        if in_junk(el) {
            continue;
        }
        let text = normalize_segment(&visible_text(el));
        if text.is_empty() {
            continue;
        }
        let weight = match el.value().name() {
            "h1" => 10,
            "h2" => 8,
            "h3" => 6,
            _ => 5,
        };
        blocks.push(make_block(BlockKind::Headline, text, css_path(el), weight));
    }

    for el in doc.select(&PARA_SEL) {
        if in_junk(el) {
            continue;
        }
        let text = normalize_segment(&visible_text(el));
        if text.len() > MIN_PARAGRAPH_LEN {
            blocks.push(make_block(BlockKind::Paragraph, text, css_path(el), 4));
        }
    }

    for el in doc.select(&LIST_SEL) {
        if in_junk(el) {
            continue;
        }
        let text = normalize_segment(&visible_text(el));
        if text.len() > MIN_LIST_ITEM_LEN {
            blocks.push(make_block(BlockKind::ListItem, text, css_path(el), 5));
        }
    }

    // Whole-document scans for prices and date-like tokens
    let full = normalize_segment(&visible_text(doc.root_element()));
    for m in PRICE_RE.find_iter(&full) {
        blocks.push(make_block(
            BlockKind::Price,
            m.as_str().to_string(),
            "text-scan".to_string(),
            9,
        ));
    }
    for m in DATE_RE.find_iter(&full) {
        blocks.push(make_block(
            BlockKind::Date,
            m.as_str().to_string(),
            "text-scan".to_string(),
            3,
        ));
    }

    dedup_blocks(blocks)
}

fn make_block(kind: BlockKind, text: String, path: String, weight: i32) -> ContentBlock {
    let hash = text_fingerprint(&text);
    ContentBlock {
        kind,
        text,
        path,
        weight,
        hash,
    }
}

/// Within one extraction no two blocks share both kind and text
fn dedup_blocks(blocks: Vec<ContentBlock>) -> Vec<ContentBlock> {
    let mut seen = std::collections::HashSet::new();
    blocks
        .into_iter()
        .filter(|b| seen.insert((b.kind, b.text.clone())))
        .collect()
}

/// True for elements whose subtree must never contribute text
fn is_junk(el: &scraper::node::Element) -> bool {
    let name = el.name();
    if NON_RENDERING_TAGS.contains(&name) || JUNK_TAGS.contains(&name) {
        return true;
    }
    if el
        .attr("role")
        .is_some_and(|r| r.eq_ignore_ascii_case("banner"))
    {
        return true;
    }
    if el
        .attr("aria-label")
        .is_some_and(|l| l.eq_ignore_ascii_case("footer"))
    {
        return true;
    }
    for attr in ["id", "class"] {
        if let Some(value) = el.attr(attr) {
            let value = value.to_ascii_lowercase();
            if JUNK_PATTERNS.iter().any(|p| value.contains(p)) {
                return true;
            }
        }
    }
    false
}

/// True when the element or any of its ancestors is junk
fn in_junk(el: ElementRef) -> bool {
    if is_junk(el.value()) {
        return true;
    }
    el.ancestors()
        .filter_map(|n| n.value().as_element())
        .any(is_junk)
}

/// Visible text of an element's subtree, junk subtrees skipped
fn visible_text(el: ElementRef) -> String {
    let mut out = String::new();
    push_visible_text(el, &mut out);
    out
}

fn push_visible_text(el: ElementRef, out: &mut String) {
    if is_junk(el.value()) {
        return;
    }
    for child in el.children() {
        if let Some(text) = child.value().as_text() {
            out.push_str(text);
            out.push(' ');
        } else if let Some(child_el) = ElementRef::wrap(child) {
            push_visible_text(child_el, out);
        }
    }
}

/// Structural path of an element: `tag:nth-of-type(i)` per level, joined
/// root-to-leaf. The index counts same-tag siblings, so the path is stable
/// under unrelated edits elsewhere in the document.
pub fn css_path(el: ElementRef) -> String {
    let mut parts = Vec::new();
    let mut current = Some(el);

    while let Some(e) = current {
        let name = e.value().name();
        if name == "html" {
            break;
        }
        let mut idx = 1;
        for sib in e.prev_siblings() {
            if let Some(sib_el) = sib.value().as_element() {
                if sib_el.name() == name {
                    idx += 1;
                }
            }
        }
        parts.push(format!("{}:nth-of-type({})", name, idx));
        current = e.parent().and_then(ElementRef::wrap);
    }

    parts.reverse();
    parts.join(" > ")
}
