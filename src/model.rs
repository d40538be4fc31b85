//! Persisted data model and URL-derived metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

/// Target collection for an item. Immutable once assigned; an item never
/// migrates between collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    Act,
    Bill,
    #[serde(rename = "Secondary Legislation")]
    SecondaryLegislation,
}

impl Category {
    pub const ALL: [Category; 3] = [
        Category::Act,
        Category::Bill,
        Category::SecondaryLegislation,
    ];

    /// Base name of the collection file for this category.
    pub fn file_stem(self) -> &'static str {
        match self {
            Category::Act => "acts",
            Category::Bill => "bills",
            Category::SecondaryLegislation => "secondary_legislation",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Category::Act => "Act",
            Category::Bill => "Bill",
            Category::SecondaryLegislation => "Secondary Legislation",
        }
    }

    /// Decide the category from the item URL, falling back to the title when
    /// the path is unhelpful.
    pub fn from_url(url: &str, title: &str) -> Category {
        if url.contains("/act/") {
            return Category::Act;
        }
        if url.contains("/bill/") {
            return Category::Bill;
        }
        if url.contains("/regulation/") || url.contains("/deemedreg/") {
            return Category::SecondaryLegislation;
        }
        let title = title.to_ascii_lowercase();
        if title.contains("bill") {
            Category::Bill
        } else if ["regulation", "order", "rules", "notice"]
            .iter()
            .any(|w| title.contains(w))
        {
            Category::SecondaryLegislation
        } else {
            Category::Act
        }
    }
}

/// One link harvested from a results page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemRef {
    /// Canonical item URL: path only, query and fragment stripped.
    pub url: String,
    /// Title text, verbatim from the listing.
    pub title: String,
}

/// Rendered page source for one item, before normalization.
#[derive(Debug, Clone)]
pub struct RawItem {
    pub reference: ItemRef,
    pub html: String,
}

/// The sole persisted entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegislationItem {
    pub id: String,
    pub category: Category,
    pub title: String,
    pub year: Option<String>,
    pub jurisdiction_type: Option<String>,
    pub full_text: String,
    pub content_hash: String,
    /// Timestamp of the last fetch that produced a hash change. Never
    /// refreshed on an unchanged re-fetch, keeping output byte-stable.
    pub fetched_at: DateTime<Utc>,
}

/// Stable identifier derived from the canonical source URL: the first five
/// path segments, joined. Query and session parameters never participate.
pub fn stable_id(url: &str) -> String {
    match Url::parse(url) {
        Ok(parsed) => {
            let segments: Vec<&str> = parsed
                .path()
                .split('/')
                .filter(|s| !s.is_empty())
                .collect();
            if segments.len() >= 4 {
                segments[..segments.len().min(5)].join("/")
            } else {
                parsed.path().to_string()
            }
        }
        Err(_) => url.split(['?', '#']).next().unwrap_or(url).to_string(),
    }
}

/// Four-digit year, taken from the URL path when present, else from the
/// first plausible token in the title.
pub fn year_of(url: &str, title: &str) -> Option<String> {
    if let Ok(parsed) = Url::parse(url) {
        for segment in parsed.path().split('/') {
            if is_year(segment) {
                return Some(segment.to_string());
            }
        }
    }
    title
        .split(|c: char| !c.is_ascii_digit())
        .find(|run| is_year(run))
        .map(|run| run.to_string())
}

fn is_year(s: &str) -> bool {
    s.len() == 4
        && s.bytes().all(|b| b.is_ascii_digit())
        && (s.starts_with("19") || s.starts_with("20"))
}

/// Series segment of the URL mapped to the jurisdiction label for the
/// category: Public/Local/Private/Provincial/Imperial for Acts,
/// Government/Local/Private/Member's for Bills.
pub fn jurisdiction_of(url: &str, category: Category) -> Option<String> {
    let label = match category {
        Category::Act => match series_segment(url)? {
            "public" => "Public",
            "local" => "Local",
            "private" => "Private",
            "provincial" => "Provincial",
            "imperial" => "Imperial",
            _ => return None,
        },
        Category::Bill => match series_segment(url)? {
            "government" => "Government",
            "local" => "Local",
            "private" => "Private",
            "member" | "members" => "Member's",
            _ => return None,
        },
        Category::SecondaryLegislation => match series_segment(url)? {
            "public" => "Public",
            "imperial" => "Imperial",
            _ => return None,
        },
    };
    Some(label.to_string())
}

/// The path segment immediately after the instrument class, e.g. the
/// `public` in `/act/public/2020/0012/latest/whole.html`.
fn series_segment(url: &str) -> Option<&str> {
    let parsed_path = url.split(['?', '#']).next().unwrap_or(url);
    let mut segments = parsed_path
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .split('/')
        .filter(|s| !s.is_empty());
    segments.find(|s| {
        matches!(*s, "act" | "bill" | "regulation" | "deemedreg")
    })?;
    segments.next()
}
