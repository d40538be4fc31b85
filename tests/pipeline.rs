//! End-to-end pipeline tests against an in-memory driver.
//!
//! The fake driver serves pages from a shared map and can inject transient
//! navigation failures or dead-session behaviour per URL, which is enough to
//! exercise the retry, pooling, dedup, and persistence paths without a
//! browser.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::watch;

use legiscrawl::config::{ScrapeConfig, SessionConfig};
use legiscrawl::error::{FetchError, RunError, SessionError};
use legiscrawl::listing::search_url;
use legiscrawl::model::{Category, LegislationItem};
use legiscrawl::pipeline;
use legiscrawl::retry::RetryPolicy;
use legiscrawl::session::{Driver, DriverFactory};

const MISSING_PAGE: &str =
    "<html><body><h3>Page Missing</h3><p>The page you requested cannot be displayed.</p></body></html>";

#[derive(Default)]
struct FakeSite {
    pages: Mutex<HashMap<String, String>>,
    nav_failures: Mutex<HashMap<String, u32>>,
    dead_urls: Mutex<HashSet<String>>,
}

impl FakeSite {
    fn set_page(&self, url: &str, html: String) {
        self.pages.lock().unwrap().insert(url.to_string(), html);
    }

    fn fail_navigations(&self, url: &str, times: u32) {
        self.nav_failures
            .lock()
            .unwrap()
            .insert(url.to_string(), times);
    }

    fn kill_sessions_on(&self, url: &str) {
        self.dead_urls.lock().unwrap().insert(url.to_string());
    }
}

struct FakeDriver {
    site: Arc<FakeSite>,
    current: Mutex<Option<String>>,
}

impl Driver for FakeDriver {
    async fn navigate(&self, url: &str) -> Result<(), FetchError> {
        if self.site.dead_urls.lock().unwrap().contains(url) {
            return Err(FetchError::SessionDead("crashed on navigation".into()));
        }
        {
            let mut failures = self.site.nav_failures.lock().unwrap();
            if let Some(remaining) = failures.get_mut(url) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(FetchError::Connection("injected reset".into()));
                }
            }
        }
        *self.current.lock().unwrap() = Some(url.to_string());
        Ok(())
    }

    async fn wait_for(&self, _css: &str, _timeout: Duration) -> Result<(), FetchError> {
        Ok(())
    }

    async fn page_source(&self) -> Result<String, FetchError> {
        let current = self.current.lock().unwrap().clone();
        let url = current.ok_or_else(|| FetchError::Protocol("no page loaded".into()))?;
        let pages = self.site.pages.lock().unwrap();
        Ok(pages
            .get(&url)
            .cloned()
            .unwrap_or_else(|| MISSING_PAGE.to_string()))
    }

    async fn is_healthy(&self) -> bool {
        true
    }

    async fn close(&self) {}
}

struct FakeFactory {
    site: Arc<FakeSite>,
}

impl DriverFactory for FakeFactory {
    type Driver = FakeDriver;

    async fn create(&self) -> Result<FakeDriver, SessionError> {
        Ok(FakeDriver {
            site: Arc::clone(&self.site),
            current: Mutex::new(None),
        })
    }
}

fn results_page(rows: &[(&str, &str)]) -> String {
    let mut body = String::from("<html><body><table id='ctl00_mixedTable'>");
    for (url, title) in rows {
        body.push_str(&format!(
            "<tr><td class='resultsTitle'><a href='{url}'>{title}</a></td></tr>"
        ));
    }
    body.push_str("</table></body></html>");
    body
}

fn empty_results_page() -> String {
    "<html><body><table id='ctl00_mixedTable'></table></body></html>".to_string()
}

fn instrument_page(title: &str, body: &str) -> String {
    format!(
        "<html><head><title>{title}</title></head><body>\
         <div id='pcoContent'><h1>{title}</h1>\
         <p>{body}</p>\
         <p>Section 1 sets out the purpose of this instrument and the manner \
         in which it is to be administered by the responsible agency.</p>\
         </div></body></html>"
    )
}

fn act_url(year: &str, number: &str) -> String {
    format!("https://www.legislation.govt.nz/act/public/{year}/{number}/latest/whole.html")
}

fn bill_url(year: &str, number: &str) -> String {
    format!("https://www.legislation.govt.nz/bill/government/{year}/{number}/latest/whole.html")
}

fn regulation_url(year: &str, number: &str) -> String {
    format!("https://www.legislation.govt.nz/regulation/public/{year}/{number}/latest/whole.html")
}

fn test_config(out_dir: &TempDir, concurrency: usize) -> ScrapeConfig {
    ScrapeConfig {
        max_pages: 1,
        delay: Duration::ZERO,
        out_dir: out_dir.path().to_path_buf(),
        concurrency,
        checkpoint_every: None,
        retry: RetryPolicy {
            max_attempts: 4,
            base_delay: Duration::from_millis(1),
            multiplier: 2,
            cap: Duration::from_millis(4),
            jitter: Duration::ZERO,
        },
        session: SessionConfig {
            acquire_timeout: Duration::from_secs(2),
            ready_timeout: Duration::from_millis(100),
            ..SessionConfig::default()
        },
    }
}

fn seeded_site() -> Arc<FakeSite> {
    let site = Arc::new(FakeSite::default());
    let listing = results_page(&[
        (&act_url("2024", "0001"), "Companies Amendment Act 2024"),
        (&bill_url("2024", "0002"), "Land Transport Bill"),
        (&regulation_url("2024", "0003"), "Food Safety Regulations 2024"),
    ]);
    site.set_page(&search_url(1), listing);
    site.set_page(
        &act_url("2024", "0001"),
        instrument_page("Companies Amendment Act 2024", "An Act to amend the Companies Act 1993."),
    );
    site.set_page(
        &bill_url("2024", "0002"),
        instrument_page("Land Transport Bill", "A Bill to amend the land transport rules."),
    );
    site.set_page(
        &regulation_url("2024", "0003"),
        instrument_page("Food Safety Regulations 2024", "Regulations about food safety."),
    );
    site
}

fn run_once(
    site: &Arc<FakeSite>,
    config: &ScrapeConfig,
) -> Result<pipeline::RunSummary, RunError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_time()
        .build()
        .unwrap();
    let (_tx, rx) = watch::channel(false);
    runtime.block_on(pipeline::run(
        config,
        FakeFactory {
            site: Arc::clone(site),
        },
        rx,
    ))
}

fn read_collection(config: &ScrapeConfig, category: Category) -> Vec<LegislationItem> {
    let path = config
        .out_dir
        .join(format!("{}.json", category.file_stem()));
    serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
}

#[test]
fn full_run_partitions_items_by_category() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir, 2);
    let site = seeded_site();

    let summary = run_once(&site, &config).unwrap();
    assert_eq!(summary.fetched, 3);
    assert_eq!(summary.inserted, 3);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.skipped, 0);
    assert_eq!(summary.pages_walked, 1);

    let acts = read_collection(&config, Category::Act);
    assert_eq!(acts.len(), 1);
    assert_eq!(acts[0].id, "act/public/2024/0001/latest");
    assert_eq!(acts[0].category, Category::Act);
    assert_eq!(acts[0].year.as_deref(), Some("2024"));
    assert_eq!(acts[0].jurisdiction_type.as_deref(), Some("Public"));
    assert!(acts[0].full_text.contains("Companies Amendment Act 2024"));
    assert_eq!(acts[0].content_hash.len(), 64);

    assert_eq!(read_collection(&config, Category::Bill).len(), 1);
    assert_eq!(
        read_collection(&config, Category::SecondaryLegislation).len(),
        1
    );
}

#[test]
fn unchanged_rerun_is_byte_identical() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir, 1);
    let site = seeded_site();

    run_once(&site, &config).unwrap();
    let first: Vec<_> = Category::ALL
        .iter()
        .map(|c| fs::read(config.out_dir.join(format!("{}.json", c.file_stem()))).unwrap())
        .collect();

    let summary = run_once(&site, &config).unwrap();
    assert_eq!(summary.unchanged, 3);
    assert_eq!(summary.inserted, 0);
    assert_eq!(summary.updated, 0);

    let second: Vec<_> = Category::ALL
        .iter()
        .map(|c| fs::read(config.out_dir.join(format!("{}.json", c.file_stem()))).unwrap())
        .collect();
    assert_eq!(first, second);
}

#[test]
fn changed_content_updates_in_place_and_restamps() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir, 1);
    let site = seeded_site();

    run_once(&site, &config).unwrap();
    let before = read_collection(&config, Category::Act).remove(0);

    site.set_page(
        &act_url("2024", "0001"),
        instrument_page(
            "Companies Amendment Act 2024",
            "An Act to amend the Companies Act 1993, as further amended in committee.",
        ),
    );
    let summary = run_once(&site, &config).unwrap();
    assert_eq!(summary.updated, 1);
    assert_eq!(summary.unchanged, 2);

    let after = read_collection(&config, Category::Act).remove(0);
    assert_eq!(after.id, before.id);
    assert_ne!(after.content_hash, before.content_hash);
    assert!(after.fetched_at > before.fetched_at);
}

#[test]
fn missing_item_is_skipped_without_failing_the_run() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir, 1);
    let site = seeded_site();

    let listing = results_page(&[
        (&act_url("2024", "0001"), "Companies Amendment Act 2024"),
        (&act_url("2024", "0099"), "Withdrawn Act 2024"),
    ]);
    site.set_page(&search_url(1), listing);

    let summary = run_once(&site, &config).unwrap();
    assert_eq!(summary.fetched, 1);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.failed, 0);
    assert_eq!(read_collection(&config, Category::Act).len(), 1);
}

#[test]
fn transient_failures_within_budget_still_succeed() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir, 1);
    let site = seeded_site();

    // Three failures, four attempts allowed.
    site.fail_navigations(&act_url("2024", "0001"), 3);

    let summary = run_once(&site, &config).unwrap();
    assert_eq!(summary.fetched, 3);
    assert_eq!(summary.failed, 0);
}

#[test]
fn exhausted_retries_become_a_failure_not_a_hang() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir, 1);
    let site = seeded_site();

    site.fail_navigations(&act_url("2024", "0001"), 1_000);

    let summary = run_once(&site, &config).unwrap();
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.fetched, 2);
    // The failing URL burned exactly max_attempts navigations.
    assert_eq!(
        *site
            .nav_failures
            .lock()
            .unwrap()
            .get(&act_url("2024", "0001"))
            .unwrap(),
        1_000 - 4
    );
    assert!(read_collection(&config, Category::Act).is_empty());
    assert_eq!(read_collection(&config, Category::Bill).len(), 1);
}

#[test]
fn duplicate_listing_entries_yield_one_record() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir, 2);
    let site = seeded_site();

    let listing = results_page(&[
        (&act_url("2024", "0001"), "Companies Amendment Act 2024"),
        (&act_url("2024", "0001"), "Companies Amendment Act 2024"),
        (&act_url("2024", "0001"), "Companies Amendment Act 2024"),
    ]);
    site.set_page(&search_url(1), listing);

    let summary = run_once(&site, &config).unwrap();
    assert_eq!(summary.fetched, 1);
    assert_eq!(read_collection(&config, Category::Act).len(), 1);
}

#[test]
fn walk_stops_on_empty_page_before_the_cap() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir, 1);
    config.max_pages = 10;
    let site = seeded_site();
    site.set_page(&search_url(2), empty_results_page());

    let summary = run_once(&site, &config).unwrap();
    assert_eq!(summary.pages_walked, 2);
    assert!(!summary.halted_early);
    assert_eq!(summary.fetched, 3);
}

#[test]
fn unreachable_listing_page_halts_walk_with_partial_results() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir, 1);
    config.max_pages = 3;
    let site = seeded_site();
    site.fail_navigations(&search_url(2), 1_000);

    let summary = run_once(&site, &config).unwrap();
    assert!(summary.halted_early);
    assert_eq!(summary.pages_walked, 1);
    assert_eq!(summary.fetched, 3);
}

#[test]
fn dead_sessions_exhaust_restart_budget_and_abort() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir, 1);
    config.retry.max_attempts = 5;
    config.session.max_restarts = 1;
    let site = seeded_site();
    site.kill_sessions_on(&act_url("2024", "0001"));

    let err = run_once(&site, &config).unwrap_err();
    assert!(matches!(
        err,
        RunError::Session(SessionError::Unavailable(1))
    ));
    // Collections were still saved on the way out.
    assert!(config.out_dir.join("acts.json").exists());
}

#[test]
fn preset_cancellation_saves_and_exits_cleanly() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir, 1);
    let site = seeded_site();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_time()
        .build()
        .unwrap();
    let (tx, rx) = watch::channel(false);
    tx.send(true).unwrap();
    let summary = runtime
        .block_on(pipeline::run(
            &config,
            FakeFactory {
                site: Arc::clone(&site),
            },
            rx,
        ))
        .unwrap();

    assert!(summary.cancelled);
    assert_eq!(summary.fetched, 0);
    assert!(config.out_dir.join("acts.json").exists());
}
