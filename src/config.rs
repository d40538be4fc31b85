//! Run configuration.

use std::path::PathBuf;
use std::time::Duration;

use crate::retry::RetryPolicy;

/// Everything the pipeline needs for one run. CLI parsing lives in the
/// binary; this is the value surface.
#[derive(Debug, Clone)]
pub struct ScrapeConfig {
    /// Listing pages to traverse, newest year first.
    pub max_pages: u32,
    /// Minimum delay between network-bound requests.
    pub delay: Duration,
    /// Destination directory for the three collection files.
    pub out_dir: PathBuf,
    /// Worker pool size. 1 means strictly sequential operation.
    pub concurrency: usize,
    /// Save collections after this many accepted merges, in addition to the
    /// final save. `None` saves once per category at run completion.
    pub checkpoint_every: Option<usize>,
    /// Shared retry policy for listing pages and item fetches.
    pub retry: RetryPolicy,
    pub session: SessionConfig,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            max_pages: 5,
            delay: Duration::from_millis(2000),
            out_dir: PathBuf::from("./data"),
            concurrency: 1,
            checkpoint_every: None,
            retry: RetryPolicy::default(),
            session: SessionConfig::default(),
        }
    }
}

/// Session pool tuning.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// WebDriver endpoint, e.g. a local chromedriver.
    pub webdriver_url: String,
    pub headless: bool,
    /// Replacement sessions allowed per run before the environment is
    /// declared unavailable. The initial pool fill is free.
    pub max_restarts: u32,
    /// How long `acquire` waits for a free session slot.
    pub acquire_timeout: Duration,
    /// How long to wait for a page's content-ready marker.
    pub ready_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            webdriver_url: "http://localhost:4444".to_string(),
            headless: true,
            max_restarts: 3,
            acquire_timeout: Duration::from_secs(30),
            ready_timeout: Duration::from_secs(20),
        }
    }
}
