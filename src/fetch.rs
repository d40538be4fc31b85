//! Per-item fetch with retry and whole-document fallback.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::error::{FetchError, WorkerError};
use crate::model::{ItemRef, RawItem};
use crate::normalize;
use crate::retry::{Pacer, RetryPolicy, retry};
use crate::session::{Driver, DriverFactory, SessionManager};

/// Main content container on instrument pages.
pub const ITEM_READY_MARKER: &str = "#pcoContent, #contentPane";

/// Bodies the site serves for removed or never-published instruments.
const PAGE_MISSING_MARKERS: &[&str] = &[
    "page missing",
    "the page you requested cannot be displayed",
];

/// Below this many characters of normalized text, a page is treated as
/// having no extractable content.
const MIN_CONTENT_LEN: usize = 50;

/// A whole-document view yielding less than this falls back to the item's
/// main page, which at least carries the provision list.
const WHOLE_VIEW_MIN_LEN: usize = 100;

pub fn is_page_missing(html: &str) -> bool {
    let lower = html.to_ascii_lowercase();
    PAGE_MISSING_MARKERS.iter().any(|m| lower.contains(m))
}

/// URL of the single-page full-text view, when the item has one.
pub fn whole_text_url(item_url: &str) -> Option<String> {
    let base = item_url.split("/latest/").next()?;
    if base == item_url {
        return None;
    }
    Some(format!("{base}/latest/whole.html"))
}

/// Fetches one item through a borrowed session. Each retry attempt acquires
/// a session anew, so a session that died mid-fetch is replaced (within the
/// pool's restart budget) instead of being retried into.
pub struct ItemFetcher {
    retry: RetryPolicy,
    ready_timeout: Duration,
}

impl ItemFetcher {
    pub fn new(retry: RetryPolicy, ready_timeout: Duration) -> Self {
        Self {
            retry,
            ready_timeout,
        }
    }

    pub async fn fetch<F: DriverFactory>(
        &self,
        item: &ItemRef,
        sessions: &Arc<SessionManager<F>>,
        pacer: &Pacer,
    ) -> Result<RawItem, WorkerError> {
        retry(&self.retry, |_| async move {
            let mut guard = sessions.acquire().await?;
            match self.fetch_once(item, guard.driver(), pacer).await {
                Err(FetchError::SessionDead(reason)) => {
                    guard.poison();
                    guard.discard().await;
                    Err(WorkerError::Fetch(FetchError::SessionDead(reason)))
                }
                other => other.map_err(WorkerError::Fetch),
            }
        })
        .await
    }

    /// One attempt: whole-document view first, item page as fallback.
    async fn fetch_once<D: Driver>(
        &self,
        item: &ItemRef,
        driver: &D,
        pacer: &Pacer,
    ) -> Result<RawItem, FetchError> {
        if let Some(whole_url) = whole_text_url(&item.url) {
            match self.load_page(driver, pacer, &whole_url).await {
                Ok(html) if !is_page_missing(&html) => {
                    if normalize::extract_text(&html).len() >= WHOLE_VIEW_MIN_LEN {
                        return Ok(RawItem {
                            reference: item.clone(),
                            html,
                        });
                    }
                    debug!("whole view of {} is thin, using item page", item.url);
                }
                Ok(_) => {
                    debug!("whole view of {} is missing, using item page", item.url);
                }
                Err(err) if err.is_transient() => return Err(err),
                Err(err) => {
                    debug!("whole view of {} failed ({err}), using item page", item.url);
                }
            }
        }

        let html = self.load_page(driver, pacer, &item.url).await?;
        if is_page_missing(&html) {
            return Err(FetchError::PageMissing(item.url.clone()));
        }
        if normalize::extract_text(&html).len() < MIN_CONTENT_LEN {
            return Err(FetchError::NoContent(item.url.clone()));
        }
        Ok(RawItem {
            reference: item.clone(),
            html,
        })
    }

    async fn load_page<D: Driver>(
        &self,
        driver: &D,
        pacer: &Pacer,
        url: &str,
    ) -> Result<String, FetchError> {
        pacer.pause().await;
        driver.navigate(url).await?;
        driver.wait_for(ITEM_READY_MARKER, self.ready_timeout).await?;
        driver.page_source().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whole_text_url_requires_latest_segment() {
        assert_eq!(
            whole_text_url("https://www.legislation.govt.nz/act/public/2020/0012/latest/d456.html"),
            Some("https://www.legislation.govt.nz/act/public/2020/0012/latest/whole.html".into())
        );
        assert_eq!(
            whole_text_url("https://www.legislation.govt.nz/act/public/2020/0012/asmade"),
            None
        );
    }

    #[test]
    fn page_missing_detection_is_case_insensitive() {
        assert!(is_page_missing("<h3>Page Missing</h3>"));
        assert!(is_page_missing(
            "<p>The page you requested CANNOT be displayed.</p>"
        ));
        assert!(!is_page_missing("<h1>Companies Act 1993</h1>"));
    }
}
