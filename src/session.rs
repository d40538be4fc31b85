//! Browser session pool.
//!
//! The automation technology sits behind the [`Driver`] capability trait so
//! the pool and the fetch path are independent of the concrete backend; the
//! production implementation lives in [`crate::webdriver`], and the
//! integration tests drive the pipeline with an in-memory driver.
//!
//! Sessions are handed out as RAII guards: a dropped guard returns its
//! session to the pool, a poisoned or discarded guard removes it, and the
//! next acquire creates a replacement within the `max_restarts` budget.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::error::{FetchError, SessionError};

/// Capability surface of one automation-driven browser session.
pub trait Driver: Send + Sync + 'static {
    /// Navigate the session to `url`.
    fn navigate(&self, url: &str) -> impl Future<Output = Result<(), FetchError>> + Send;

    /// Wait until `css` matches something in the live document, bounded by
    /// `timeout`.
    fn wait_for(
        &self,
        css: &str,
        timeout: Duration,
    ) -> impl Future<Output = Result<(), FetchError>> + Send;

    /// Snapshot the rendered document.
    fn page_source(&self) -> impl Future<Output = Result<String, FetchError>> + Send;

    /// Cheap probe: does the session still respond?
    fn is_healthy(&self) -> impl Future<Output = bool> + Send;

    /// Tear the session down. Best effort.
    fn close(&self) -> impl Future<Output = ()> + Send;
}

/// Creates sessions on demand.
pub trait DriverFactory: Send + Sync + 'static {
    type Driver: Driver;

    fn create(&self) -> impl Future<Output = Result<Self::Driver, SessionError>> + Send;
}

pub struct SessionManager<F: DriverFactory> {
    factory: F,
    permits: Arc<Semaphore>,
    idle_tx: UnboundedSender<F::Driver>,
    idle_rx: Mutex<UnboundedReceiver<F::Driver>>,
    pool_size: usize,
    created: AtomicUsize,
    restarts: AtomicU32,
    max_restarts: u32,
    acquire_timeout: Duration,
}

impl<F: DriverFactory> SessionManager<F> {
    pub fn new(factory: F, pool_size: usize, config: &SessionConfig) -> Arc<Self> {
        let pool_size = pool_size.max(1);
        let (idle_tx, idle_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            factory,
            permits: Arc::new(Semaphore::new(pool_size)),
            idle_tx,
            idle_rx: Mutex::new(idle_rx),
            pool_size,
            created: AtomicUsize::new(0),
            restarts: AtomicU32::new(0),
            max_restarts: config.max_restarts,
            acquire_timeout: config.acquire_timeout,
        })
    }

    /// Wait (bounded) for a free slot, health-check the pooled session, and
    /// hand out a guard. Unhealthy sessions are closed and replaced; each
    /// replacement beyond the initial pool fill is charged against
    /// `max_restarts`.
    pub async fn acquire(self: &Arc<Self>) -> Result<SessionGuard<F>, SessionError> {
        let permit = tokio::time::timeout(
            self.acquire_timeout,
            Arc::clone(&self.permits).acquire_owned(),
        )
        .await
        .map_err(|_| SessionError::AcquireTimeout)?
        .map_err(|_| SessionError::Create("session pool closed".to_string()))?;

        loop {
            let pooled = self.idle_rx.lock().await.try_recv().ok();
            match pooled {
                Some(driver) => {
                    if driver.is_healthy().await {
                        debug!("handing out pooled session");
                        return Ok(SessionGuard::new(driver, Arc::clone(self), permit));
                    }
                    warn!("pooled session failed its health check, replacing it");
                    driver.close().await;
                }
                None => {
                    let driver = self.create_session().await?;
                    return Ok(SessionGuard::new(driver, Arc::clone(self), permit));
                }
            }
        }
    }

    async fn create_session(&self) -> Result<F::Driver, SessionError> {
        let nth = self.created.fetch_add(1, Ordering::SeqCst);
        if nth >= self.pool_size {
            let used = self.restarts.fetch_add(1, Ordering::SeqCst);
            if used >= self.max_restarts {
                return Err(SessionError::Unavailable(self.max_restarts));
            }
            info!(
                "recreating browser session ({}/{})",
                used + 1,
                self.max_restarts
            );
        }
        self.factory.create().await
    }

    /// Restarts consumed so far.
    pub fn restarts_used(&self) -> u32 {
        self.restarts.load(Ordering::SeqCst).min(self.max_restarts)
    }
}

/// Scoped session handle. Dropping it returns the session to the pool and
/// frees the slot, whatever path the caller took out of the fetch.
pub struct SessionGuard<F: DriverFactory> {
    driver: Option<F::Driver>,
    manager: Arc<SessionManager<F>>,
    poisoned: bool,
    _permit: OwnedSemaphorePermit,
}

impl<F: DriverFactory> SessionGuard<F> {
    fn new(driver: F::Driver, manager: Arc<SessionManager<F>>, permit: OwnedSemaphorePermit) -> Self {
        Self {
            driver: Some(driver),
            manager,
            poisoned: false,
            _permit: permit,
        }
    }

    pub fn driver(&self) -> &F::Driver {
        self.driver
            .as_ref()
            .expect("driver present until the guard drops")
    }

    /// Mark the session dead so it is not returned to the pool.
    pub fn poison(&mut self) {
        self.poisoned = true;
    }

    /// Close the session and free the slot without pooling it.
    pub async fn discard(mut self) {
        if let Some(driver) = self.driver.take() {
            driver.close().await;
        }
    }
}

impl<F: DriverFactory> Drop for SessionGuard<F> {
    fn drop(&mut self) {
        if let Some(driver) = self.driver.take() {
            if self.poisoned {
                // Dropped without close; the remote end reaps it on its own
                // session timeout.
                debug!("dropping poisoned session");
            } else {
                let _ = self.manager.idle_tx.send(driver);
            }
        }
    }
}
