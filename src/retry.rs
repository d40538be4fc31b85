//! Retry policy, backoff, and request pacing.
//!
//! All retry behaviour lives in one policy object consumed by a generic
//! combinator, so the listing walker and the item fetcher share identical
//! semantics. Retried attempts still pass through the [`Pacer`], so backoff
//! adds to the configured inter-request delay rather than bypassing it.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::warn;

/// Implemented by error types that distinguish retryable failures.
pub trait Transient {
    fn is_transient(&self) -> bool;
}

/// Exponential backoff with a cap and uniform jitter.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: u32,
    pub cap: Duration,
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(500),
            multiplier: 2,
            cap: Duration::from_secs(30),
            jitter: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (zero-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = self.multiplier.saturating_pow(attempt);
        let raw = self.base_delay.saturating_mul(exp).min(self.cap);
        if self.jitter.is_zero() {
            raw
        } else {
            let spread = self.jitter.as_millis() as u64 + 1;
            raw + Duration::from_millis(rand::random::<u64>() % spread)
        }
    }
}

/// Run `op` until it succeeds, fails permanently, or exhausts the policy's
/// attempt budget. The closure receives the zero-based attempt number.
pub async fn retry<T, E, Op, Fut>(policy: &RetryPolicy, mut op: Op) -> Result<T, E>
where
    E: Transient + Display,
    Op: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => {
                attempt += 1;
                if !err.is_transient() || attempt >= policy.max_attempts.max(1) {
                    return Err(err);
                }
                let pause = policy.backoff(attempt - 1);
                warn!("attempt {attempt} failed ({err}), retrying in {pause:?}");
                tokio::time::sleep(pause).await;
            }
        }
    }
}

/// Serializes request starts so that at least `delay` elapses between any two
/// network-bound navigations, across all workers. The lock is held through
/// the sleep on purpose: concurrent callers queue up behind it.
#[derive(Debug)]
pub struct Pacer {
    delay: Duration,
    next_allowed: tokio::sync::Mutex<Instant>,
}

impl Pacer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            next_allowed: tokio::sync::Mutex::new(Instant::now()),
        }
    }

    pub async fn pause(&self) {
        if self.delay.is_zero() {
            return;
        }
        let mut next = self.next_allowed.lock().await;
        let now = Instant::now();
        if *next > now {
            tokio::time::sleep_until(*next).await;
        }
        *next = Instant::now() + self.delay;
    }
}
