//! Deterministic HTML-to-text normalization.
//!
//! Pure functions only: identical raw input always yields identical output,
//! which the content hash (and therefore change detection) depends on.

use chrono::{DateTime, Utc};
use scraper::Html;
use sha2::{Digest, Sha256};

use crate::model::{self, Category, LegislationItem, RawItem};

/// Subtrees that never contribute body text.
const SKIPPED: &[&str] = &[
    "script", "style", "noscript", "head", "nav", "header", "footer", "aside",
];

/// Navigation boilerplate the site appends to whole-document pages. Any line
/// containing one of these markers is dropped wholesale.
const FOOTER_MARKERS: &[&str] = &[
    "The Parliamentary Counsel Office",
    "Home Advanced search Browse",
];

/// Build the persisted item from a fetched page. `fetched_at` is passed in so
/// the function stays deterministic for a given input.
pub fn normalize(raw: &RawItem, fetched_at: DateTime<Utc>) -> LegislationItem {
    let text = extract_text(&raw.html);
    let title = raw.reference.title.trim().to_string();
    let category = Category::from_url(&raw.reference.url, &title);
    let year = model::year_of(&raw.reference.url, &title);
    let jurisdiction_type = model::jurisdiction_of(&raw.reference.url, category);
    let content_hash = content_hash(&text, &title, year.as_deref(), jurisdiction_type.as_deref());

    LegislationItem {
        id: model::stable_id(&raw.reference.url),
        category,
        title,
        year,
        jurisdiction_type,
        full_text: text,
        content_hash,
        fetched_at,
    }
}

/// Extract plain text from a rendered page: boilerplate subtrees skipped,
/// headings kept as `#`-prefixed markers, block boundaries as line breaks,
/// whitespace collapsed per line.
pub fn extract_text(html: &str) -> String {
    let document = Html::parse_document(html);

    let mut text = String::new();
    let mut last_was_block = false;

    for node in document.root_element().descendants() {
        if let Some(text_node) = node.value().as_text() {
            // Walk ancestors: text inside a skipped subtree never counts.
            let mut skipped = false;
            let mut current = node.parent();
            while let Some(parent) = current {
                if let Some(elem) = parent.value().as_element() {
                    if SKIPPED.contains(&elem.name()) {
                        skipped = true;
                        break;
                    }
                }
                current = parent.parent();
            }
            if skipped {
                continue;
            }
            let t = text_node.trim();
            if !t.is_empty() {
                if last_was_block && !text.is_empty() {
                    text.push('\n');
                } else if !text.is_empty() {
                    text.push(' ');
                }
                text.push_str(t);
                last_was_block = false;
            }
        } else if let Some(elem) = node.value().as_element() {
            match elem.name() {
                "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
                    if !text.is_empty() {
                        text.push_str("\n\n");
                    }
                    let level = elem.name().as_bytes()[1] - b'0';
                    for _ in 0..level {
                        text.push('#');
                    }
                    text.push(' ');
                    last_was_block = false;
                }
                "p" => {
                    if !text.is_empty() {
                        text.push_str("\n\n");
                    }
                    last_was_block = false;
                }
                "li" => {
                    text.push('\n');
                    text.push_str("- ");
                    last_was_block = false;
                }
                "div" | "br" | "tr" | "td" | "blockquote" | "section" | "table" | "ul"
                | "ol" => {
                    last_was_block = true;
                }
                _ => {}
            }
        }
    }

    strip_boilerplate(&normalize_whitespace(&text))
}

/// Collapse runs of spaces on each line, keep paragraph breaks, trim ends.
fn normalize_whitespace(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut consecutive_newlines = 0u32;

    for line in text.split('\n') {
        let trimmed = line.split_whitespace().collect::<Vec<_>>().join(" ");

        if trimmed.is_empty() {
            consecutive_newlines += 1;
            continue;
        }

        if !result.is_empty() {
            if consecutive_newlines >= 2 {
                result.push_str("\n\n");
            } else {
                result.push('\n');
            }
        }

        consecutive_newlines = 0;
        result.push_str(&trimmed);
    }

    result
}

fn strip_boilerplate(text: &str) -> String {
    let mut kept: Vec<&str> = Vec::new();
    for line in text.split('\n') {
        if FOOTER_MARKERS.iter().any(|m| line.contains(m)) {
            continue;
        }
        kept.push(line);
    }
    while kept.last().is_some_and(|l| l.is_empty()) {
        kept.pop();
    }
    kept.join("\n")
}

/// SHA-256 over the normalized text plus the material metadata, hex-encoded.
pub fn content_hash(
    text: &str,
    title: &str,
    year: Option<&str>,
    jurisdiction: Option<&str>,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hasher.update(b"\x1f");
    hasher.update(title.as_bytes());
    hasher.update(b"\x1f");
    hasher.update(year.unwrap_or("").as_bytes());
    hasher.update(b"\x1f");
    hasher.update(jurisdiction.unwrap_or("").as_bytes());

    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for byte in digest {
        use std::fmt::Write;
        let _ = write!(out, "{byte:02x}");
    }
    out
}
