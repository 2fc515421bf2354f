//! Retry and coalescing around tier calls.
//!
//! ## Retry Schedule
//!
//! With the default policy (3 attempts, 20ms base delay) a failing handler
//! runs at t=0, sleeps 20ms, runs again, sleeps 40ms and runs a last time.
//! Attempt `n` (0-based) is followed by `delay * ceil((n + 2) / 2)`; there is
//! no sleep after the final attempt.
//!
//! A panic inside a handler is caught, logged and converted into
//! [`CacheError::Panic`]. A panic is not retried.

pub mod singleflight;

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures_util::FutureExt;

use crate::error::CacheError;
use crate::metrics;
use crate::outcome::Outcome;

pub use singleflight::SingleFlight;

const DEFAULT_ATTEMPTS: u32 = 3;
const DEFAULT_DELAY: Duration = Duration::from_millis(20);

/// Attempt count and base delay for retried calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    attempts: u32,
    delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_ATTEMPTS,
            delay: DEFAULT_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Zero `attempts` or a zero `delay` fall back to the defaults.
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self {
            attempts: if attempts == 0 {
                DEFAULT_ATTEMPTS
            } else {
                attempts
            },
            delay: if delay.is_zero() { DEFAULT_DELAY } else { delay },
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Sleep after the 0-based `attempt` failed. Saturates at `Duration::MAX`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.delay
            .checked_mul(attempt.saturating_add(3) / 2)
            .unwrap_or(Duration::MAX)
    }
}

/// Runs tier handlers with bounded retry and optional single-flight.
pub struct Executor<T> {
    enabled: bool,
    policy: RetryPolicy,
    flights: SingleFlight<T>,
}

impl<T> Executor<T>
where
    T: Clone + Default + Send + Sync + 'static,
{
    pub fn new(enabled: bool, policy: RetryPolicy) -> Self {
        Self {
            enabled,
            policy,
            flights: SingleFlight::new(),
        }
    }

    /// An executor that invokes every handler exactly once.
    pub fn disabled() -> Self {
        Self::new(false, RetryPolicy::default())
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Run `handler`, retrying failed outcomes when enabled.
    ///
    /// With `singleflight` set, concurrent callers passing the same
    /// `fingerprint` share one retry loop and all receive its outcome.
    pub async fn execute<F, Fut>(&self, fingerprint: &str, singleflight: bool, handler: F) -> Outcome<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Outcome<T>>,
    {
        if !self.enabled {
            return guarded(async { handler().await }).await;
        }

        if singleflight {
            self.flights.run(fingerprint, self.retry(&handler)).await
        } else {
            self.retry(&handler).await
        }
    }

    /// Run a one-shot `handler` under single-flight without retry.
    pub async fn coalesce<F, Fut>(&self, fingerprint: &str, handler: F) -> Outcome<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Outcome<T>>,
    {
        self.flights
            .run(fingerprint, guarded(async move { handler().await }))
            .await
    }

    /// Run a one-shot `handler` once, converting a panic into an error.
    pub async fn once<F, Fut>(&self, handler: F) -> Outcome<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Outcome<T>>,
    {
        guarded(async move { handler().await }).await
    }

    async fn retry<F, Fut>(&self, handler: &F) -> Outcome<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Outcome<T>>,
    {
        let attempts = self.policy.attempts;
        let mut outcome = Outcome::miss();

        for attempt in 0..attempts {
            outcome = guarded(async { handler().await }).await;

            match outcome.err() {
                None => return outcome,
                Some(CacheError::Panic { .. }) => return outcome,
                Some(err) if attempt + 1 < attempts => {
                    let wait = self.policy.backoff(attempt);
                    tracing::debug!(
                        attempt = attempt + 1,
                        attempts,
                        wait_ms = wait.as_millis() as u64,
                        error = %err,
                        "retrying cache operation"
                    );
                    metrics::record_retry();
                    tokio::time::sleep(wait).await;
                }
                Some(err) => {
                    tracing::warn!(attempts, error = %err, "cache operation failed after retries");
                }
            }
        }

        outcome
    }
}

/// Await `fut`, converting a panic into a failed outcome.
async fn guarded<T, Fut>(fut: Fut) -> Outcome<T>
where
    T: Default,
    Fut: Future<Output = Outcome<T>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(panic) => {
            let err = CacheError::from_panic(panic);
            tracing::error!(error = %err, "cache handler panicked");
            metrics::record_panic();
            Outcome::failure(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn failing(calls: &AtomicU32) -> Outcome<u32> {
        calls.fetch_add(1, Ordering::SeqCst);
        Outcome::failure(CacheError::Loader("down".into()))
    }

    #[test]
    fn test_backoff_schedule() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(0), Duration::from_millis(20));
        assert_eq!(policy.backoff(1), Duration::from_millis(40));
        assert_eq!(policy.backoff(2), Duration::from_millis(40));
        assert_eq!(policy.backoff(3), Duration::from_millis(60));
    }

    #[test]
    fn test_backoff_saturates_on_huge_delay() {
        let policy = RetryPolicy::new(3, Duration::from_secs(u64::MAX));
        assert_eq!(policy.backoff(0), Duration::from_secs(u64::MAX));
        assert_eq!(policy.backoff(1), Duration::MAX);
        assert_eq!(policy.backoff(u32::MAX), Duration::MAX);
    }

    #[test]
    fn test_zero_policy_uses_defaults() {
        let policy = RetryPolicy::new(0, Duration::ZERO);
        assert_eq!(policy, RetryPolicy::default());
    }

    #[tokio::test]
    async fn test_disabled_runs_once() {
        let executor = Executor::<u32>::disabled();
        let calls = AtomicU32::new(0);
        let out = executor
            .execute("fp", false, || async { failing(&calls) })
            .await;
        assert!(!out.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_exhausted() {
        let executor = Executor::<u32>::new(true, RetryPolicy::default());
        let calls = AtomicU32::new(0);
        let started = Instant::now();

        let out = executor
            .execute("fp", false, || async { failing(&calls) })
            .await;

        assert!(matches!(out.err(), Some(CacheError::Loader(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(started.elapsed() >= Duration::from_millis(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_at_first_success() {
        let executor = Executor::<u32>::new(true, RetryPolicy::default());
        let calls = AtomicU32::new(0);

        let out = executor
            .execute("fp", false, || async {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Outcome::failure(CacheError::Loader("flaky".into()))
                } else {
                    Outcome::success(5)
                }
            })
            .await;

        assert!(out.is_ok());
        assert_eq!(*out.data(), 5);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_panic_becomes_error_and_is_not_retried() {
        let executor = Executor::<u32>::new(true, RetryPolicy::default());
        let calls = AtomicU32::new(0);

        let out = executor
            .execute("fp", false, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                if calls.load(Ordering::SeqCst) > 0 {
                    panic!("handler exploded");
                }
                Outcome::success(1)
            })
            .await;

        assert!(matches!(
            out.err(),
            Some(CacheError::Panic { message, .. }) if message == "handler exploded"
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(*out.data(), 0);
    }

    #[tokio::test]
    async fn test_singleflight_shares_execution() {
        let executor = Arc::new(Executor::<u32>::new(true, RetryPolicy::default()));
        let calls = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let executor = executor.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                executor
                    .execute("shared", true, || {
                        let calls = calls.clone();
                        async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            Outcome::success(9)
                        }
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(*handle.await.unwrap().data(), 9);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_coalesce_does_not_retry() {
        let executor = Executor::<u32>::new(true, RetryPolicy::default());
        let calls = AtomicU32::new(0);
        let out = executor
            .coalesce("load", || async { failing(&calls) })
            .await;
        assert!(!out.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
