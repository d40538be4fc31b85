//! End-to-end orchestration: listing walk, pooled item fetches, serial
//! merging, and per-category persistence.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::config::ScrapeConfig;
use crate::dedup::{Collection, MergeDecision};
use crate::error::{FetchError, RunError, SessionError, WorkerError};
use crate::fetch::ItemFetcher;
use crate::listing::ListingWalker;
use crate::model::{Category, ItemRef, RawItem};
use crate::normalize;
use crate::retry::Pacer;
use crate::session::{DriverFactory, SessionManager};
use crate::store::AtomicStore;

/// Per-category outcome counts.
#[derive(Debug, Default, Clone, Copy)]
pub struct Tally {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// End-of-run report.
#[derive(Debug, Default)]
pub struct RunSummary {
    /// Items fetched and normalized successfully.
    pub fetched: usize,
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// Items given up on permanently (missing page, no content).
    pub skipped: usize,
    /// Items that exhausted their transient-retry budget.
    pub failed: usize,
    /// Category-conflict rejections.
    pub conflicts: usize,
    pub pages_walked: u32,
    pub halted_early: bool,
    pub cancelled: bool,
    pub by_category: HashMap<Category, Tally>,
}

impl RunSummary {
    fn tally(&mut self, category: Category) -> &mut Tally {
        self.by_category.entry(category).or_default()
    }

    pub fn log(&self) {
        info!("run complete: {} page(s) walked{}", self.pages_walked, if self.halted_early { " (halted early)" } else { "" });
        info!(
            "totals: fetched={} inserted={} updated={} unchanged={} skipped={} failed={} conflicts={}",
            self.fetched,
            self.inserted,
            self.updated,
            self.unchanged,
            self.skipped,
            self.failed,
            self.conflicts
        );
        for category in Category::ALL {
            if let Some(t) = self.by_category.get(&category) {
                info!(
                    "{}: inserted={} updated={} unchanged={} skipped={} failed={}",
                    category.label(),
                    t.inserted,
                    t.updated,
                    t.unchanged,
                    t.skipped,
                    t.failed
                );
            }
        }
    }
}

struct RunState {
    collections: HashMap<Category, Collection>,
    summary: RunSummary,
    merged_since_save: usize,
}

impl RunState {
    fn merge_fetched(&mut self, raw: &RawItem) {
        let item = normalize::normalize(raw, Utc::now());
        let category = item.category;
        let id = item.id.clone();
        self.summary.fetched += 1;

        let collection = self.collections.entry(category).or_default();
        match collection.merge(item) {
            Ok(MergeDecision::Inserted) => {
                info!("inserted {id}");
                self.summary.inserted += 1;
                self.summary.tally(category).inserted += 1;
                self.merged_since_save += 1;
            }
            Ok(MergeDecision::Updated) => {
                info!("updated {id}");
                self.summary.updated += 1;
                self.summary.tally(category).updated += 1;
                self.merged_since_save += 1;
            }
            Ok(MergeDecision::Unchanged) => {
                self.summary.unchanged += 1;
                self.summary.tally(category).unchanged += 1;
            }
            Err(conflict) => {
                error!("rejected conflicting update: {conflict}");
                self.summary.conflicts += 1;
            }
        }
    }

    fn record_failure(&mut self, item: &ItemRef, err: &WorkerError) -> Option<SessionError> {
        let category = Category::from_url(&item.url, &item.title);
        match err {
            WorkerError::Session(SessionError::Unavailable(n)) => {
                error!("session environment unavailable, aborting remaining fetches");
                return Some(SessionError::Unavailable(*n));
            }
            WorkerError::Fetch(FetchError::PageMissing(_))
            | WorkerError::Fetch(FetchError::NoContent(_)) => {
                warn!("skipping {}: {err}", item.url);
                self.summary.skipped += 1;
                self.summary.tally(category).skipped += 1;
            }
            _ => {
                warn!("giving up on {}: {err}", item.url);
                self.summary.failed += 1;
                self.summary.tally(category).failed += 1;
            }
        }
        None
    }
}

/// Run the full pipeline. Returns the summary on any run that reached the
/// save phase; `Err` is reserved for abort-class failures (the environment
/// died or the store could not be written), which map to a non-zero exit.
pub async fn run<F: DriverFactory>(
    config: &ScrapeConfig,
    factory: F,
    shutdown: watch::Receiver<bool>,
) -> Result<RunSummary, RunError> {
    let store = AtomicStore::new(&config.out_dir)?;

    let mut collections = HashMap::new();
    for category in Category::ALL {
        let collection = store.load(category)?;
        if !collection.is_empty() {
            info!(
                "loaded {} existing {} record(s)",
                collection.len(),
                category.label()
            );
        }
        collections.insert(category, collection);
    }

    let sessions = SessionManager::new(factory, config.concurrency, &config.session);
    let pacer = Arc::new(Pacer::new(config.delay));
    let mut state = RunState {
        collections,
        summary: RunSummary::default(),
        merged_since_save: 0,
    };

    // Phase 1: walk the listing with one borrowed session.
    let walk = {
        let guard = sessions.acquire().await?;
        let walker = ListingWalker::new(
            config.max_pages,
            config.session.ready_timeout,
            config.retry.clone(),
        );
        walker.walk(guard.driver(), &pacer).await
    };
    state.summary.pages_walked = walk.pages_walked;
    state.summary.halted_early = walk.halted_early;
    info!(
        "listing walk found {} unique item(s) across {} page(s)",
        walk.items.len(),
        walk.pages_walked
    );

    // Phase 2: fetch through the bounded worker pool, merging serially here
    // as completions arrive.
    let fetcher = Arc::new(ItemFetcher::new(
        config.retry.clone(),
        config.session.ready_timeout,
    ));
    let mut workers: JoinSet<(ItemRef, Result<RawItem, WorkerError>)> = JoinSet::new();
    let mut fatal: Option<SessionError> = None;

    for item in walk.items {
        if *shutdown.borrow() || fatal.is_some() {
            break;
        }
        while workers.len() >= config.concurrency.max(1) {
            if let Some(joined) = workers.join_next().await {
                drain_worker(joined, &mut state, &mut fatal, config, &store)?;
            }
        }
        // Draining may have surfaced a fatal session error or a signal.
        if *shutdown.borrow() || fatal.is_some() {
            break;
        }
        let fetcher = Arc::clone(&fetcher);
        let sessions = Arc::clone(&sessions);
        let pacer = Arc::clone(&pacer);
        workers.spawn(async move {
            let result = fetcher.fetch(&item, &sessions, &pacer).await;
            (item, result)
        });
    }

    if *shutdown.borrow() {
        state.summary.cancelled = true;
        warn!("cancellation requested, abandoning in-flight fetches");
        workers.abort_all();
    }
    while let Some(joined) = workers.join_next().await {
        drain_worker(joined, &mut state, &mut fatal, config, &store)?;
    }

    // Phase 3: persist. Runs even on cancellation or a dead environment so
    // everything merged so far survives.
    save_all(&store, &state.collections)?;

    if let Some(err) = fatal {
        return Err(RunError::Session(err));
    }
    Ok(state.summary)
}

fn drain_worker(
    joined: Result<(ItemRef, Result<RawItem, WorkerError>), tokio::task::JoinError>,
    state: &mut RunState,
    fatal: &mut Option<SessionError>,
    config: &ScrapeConfig,
    store: &AtomicStore,
) -> Result<(), RunError> {
    match joined {
        Ok((_, Ok(raw))) => {
            state.merge_fetched(&raw);
            if let Some(every) = config.checkpoint_every {
                if state.merged_since_save >= every.max(1) {
                    save_all(store, &state.collections)?;
                    state.merged_since_save = 0;
                }
            }
        }
        Ok((item, Err(err))) => {
            if let Some(session_err) = state.record_failure(&item, &err) {
                if fatal.is_none() {
                    *fatal = Some(session_err);
                }
            }
        }
        Err(join_err) => {
            if !join_err.is_cancelled() {
                warn!("fetch worker failed: {join_err}");
                state.summary.failed += 1;
            }
        }
    }
    Ok(())
}

fn save_all(
    store: &AtomicStore,
    collections: &HashMap<Category, Collection>,
) -> Result<(), RunError> {
    for category in Category::ALL {
        if let Some(collection) = collections.get(&category) {
            store.save(category, collection)?;
        }
    }
    Ok(())
}
