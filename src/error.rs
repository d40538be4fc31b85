//! Error taxonomy for the scrape pipeline.
//!
//! Transient conditions are absorbed by the retry layer; item-level permanent
//! failures degrade to a skip; session- and storage-level failures abort the
//! run without touching previously persisted state.

use std::path::PathBuf;

use thiserror::Error;

use crate::model::Category;
use crate::retry::Transient;

/// Errors raised while fetching a single page or item.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The navigation or content-ready wait exceeded its deadline.
    #[error("timed out: {0}")]
    Timeout(String),

    /// The request never completed (reset, refused, DNS, ...).
    #[error("connection failed: {0}")]
    Connection(String),

    /// The browser session terminated underneath us.
    #[error("browser session died: {0}")]
    SessionDead(String),

    /// The WebDriver endpoint answered, but not with what we asked for.
    #[error("webdriver protocol error: {0}")]
    Protocol(String),

    /// The site served its "Page Missing" body for this URL.
    #[error("page reported missing: {0}")]
    PageMissing(String),

    /// The page rendered, but no extractable text survived normalization.
    #[error("no extractable content at {0}")]
    NoContent(String),
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FetchError::Timeout(_)
                | FetchError::Connection(_)
                | FetchError::SessionDead(_)
                | FetchError::Protocol(_)
        )
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout(err.to_string())
        } else {
            FetchError::Connection(err.to_string())
        }
    }
}

impl Transient for FetchError {
    fn is_transient(&self) -> bool {
        FetchError::is_transient(self)
    }
}

/// Errors from the session pool.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to create browser session: {0}")]
    Create(String),

    #[error("timed out waiting for a free browser session")]
    AcquireTimeout,

    /// The restart budget is spent; the browser environment is gone for the
    /// rest of the run.
    #[error("browser environment unavailable after {0} session restarts")]
    Unavailable(u32),
}

/// Errors from a single worker's fetch, spanning session acquisition and the
/// fetch itself.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Session(#[from] SessionError),
}

impl Transient for WorkerError {
    fn is_transient(&self) -> bool {
        match self {
            WorkerError::Fetch(e) => e.is_transient(),
            WorkerError::Session(SessionError::Create(_)) => true,
            WorkerError::Session(SessionError::AcquireTimeout) => true,
            WorkerError::Session(SessionError::Unavailable(_)) => false,
        }
    }
}

/// Errors from the on-disk collection store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store i/o failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed collection file {path}: {reason}")]
    Malformed { path: PathBuf, reason: String },
}

/// An existing id arrived under a different category. The stored record stays
/// authoritative; the update is rejected.
#[derive(Debug, Error)]
#[error("item {id} is stored as {existing:?} and cannot move to {incoming:?}")]
pub struct CategoryConflict {
    pub id: String,
    pub existing: Category,
    pub incoming: Category,
}

/// Abort-class failures. Everything else degrades to per-item skips and a
/// zero exit.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Store(#[from] StoreError),
}
