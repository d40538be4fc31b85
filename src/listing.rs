//! Paginated results-listing walker.

use std::collections::HashSet;
use std::time::Duration;

use scraper::{Html, Selector};
use tracing::{info, warn};

use crate::model::ItemRef;
use crate::retry::{Pacer, RetryPolicy, retry};
use crate::session::Driver;

const LISTING_BASE: &str = "https://www.legislation.govt.nz/all/results.aspx";

/// Search filter selecting all four instrument classes across every series
/// and status, sorted newest year first.
const SEARCH_PARAMS: &str = "search=ad_act%40bill%40regulation%40deemedreg______25_ac%40bc%40rc%40dc%40apub%40aloc%40apri%40apro%40aimp%40bgov%40bloc%40bpri%40bmem%40rpub%40rimp_ac%40bc%40rc%40ainf%40anif%40aaif%40bcur%40bena%40rinf%40rnif%40raif_y_aw_se_";

/// Results table is rendered client-side; this marker means the page is
/// ready to harvest.
pub const RESULTS_READY_MARKER: &str = "table[id*='mixedTable']";

const RESULT_LINKS: &str = "table[id*='mixedTable'] td.resultsTitle a";

pub fn search_url(page: u32) -> String {
    format!("{LISTING_BASE}?{SEARCH_PARAMS}&p={page}")
}

/// Pull item links out of a rendered results page, canonicalizing each URL
/// by dropping query and fragment.
pub fn extract_item_refs(html: &str) -> Vec<ItemRef> {
    let document = Html::parse_document(html);
    let selector = match Selector::parse(RESULT_LINKS) {
        Ok(s) => s,
        Err(_) => return Vec::new(),
    };

    let mut refs = Vec::new();
    for link in document.select(&selector) {
        let Some(href) = link.value().attr("href") else {
            continue;
        };
        let url = href.split(['?', '#']).next().unwrap_or(href).to_string();
        let title = link.text().collect::<String>().trim().to_string();
        if url.is_empty() || title.is_empty() {
            continue;
        }
        refs.push(ItemRef { url, title });
    }
    refs
}

/// Result of one listing walk.
#[derive(Debug, Default)]
pub struct WalkOutcome {
    pub items: Vec<ItemRef>,
    pub pages_walked: u32,
    /// True when a page failed past its retry budget and the walk stopped
    /// early with partial results.
    pub halted_early: bool,
}

/// Walks result pages from page 1 until `max_pages`, an empty page, or an
/// unrecoverable page failure. Item URLs are de-duplicated within the run:
/// sort instability can surface the same item on adjacent pages.
pub struct ListingWalker {
    max_pages: u32,
    ready_timeout: Duration,
    retry: RetryPolicy,
}

impl ListingWalker {
    pub fn new(max_pages: u32, ready_timeout: Duration, retry: RetryPolicy) -> Self {
        Self {
            max_pages: max_pages.max(1),
            ready_timeout,
            retry,
        }
    }

    pub async fn walk<D: Driver>(&self, driver: &D, pacer: &Pacer) -> WalkOutcome {
        let mut outcome = WalkOutcome::default();
        let mut seen = HashSet::<String>::new();

        for page in 1..=self.max_pages {
            let url = search_url(page);
            let html = retry(&self.retry, |_| {
                let url = url.clone();
                async move {
                    pacer.pause().await;
                    driver.navigate(&url).await?;
                    driver
                        .wait_for(RESULTS_READY_MARKER, self.ready_timeout)
                        .await?;
                    driver.page_source().await
                }
            })
            .await;

            let html = match html {
                Ok(html) => html,
                Err(err) => {
                    warn!("listing page {page} failed past retries ({err}), halting walk early");
                    outcome.halted_early = true;
                    break;
                }
            };

            outcome.pages_walked = page;
            let refs = extract_item_refs(&html);
            if refs.is_empty() {
                info!("listing page {page} has no results, stopping");
                break;
            }

            let mut fresh = 0usize;
            for item in refs {
                if seen.insert(item.url.clone()) {
                    outcome.items.push(item);
                    fresh += 1;
                }
            }
            info!("listing page {page}: {fresh} new item(s)");
        }

        outcome
    }
}
