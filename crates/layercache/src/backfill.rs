//! Background promotion of remote hits into the local tier.
//!
//! A remote hit after a local miss hands the value to this worker instead of
//! writing the local tier on the read path. Jobs travel over a bounded
//! channel; when it is full the job is dropped. Failures and drops are logged
//! and counted, never reported to the reader.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::{CacheError, CacheResult};
use crate::metrics;
use crate::tier::Tier;

enum BackfillMessage<T> {
    Store {
        key: Value,
        name: String,
        id: Value,
        value: T,
    },
    Flush(oneshot::Sender<()>),
}

/// Backfill counters since the worker started.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackfillStats {
    /// Jobs written into the local tier
    pub applied: u64,
    /// Jobs whose write failed
    pub failed: u64,
    /// Jobs discarded because the queue was full or closed
    pub dropped: u64,
}

#[derive(Default)]
struct Counters {
    applied: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

pub struct BackfillWorker<T> {
    tx: Mutex<Option<mpsc::Sender<BackfillMessage<T>>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    counters: Arc<Counters>,
}

impl<T: Send + 'static> BackfillWorker<T> {
    /// Spawn the worker on the current Tokio runtime, writing into `target`.
    pub fn spawn(
        target: Arc<dyn Tier<T>>,
        prefix: String,
        queue_capacity: usize,
    ) -> CacheResult<Self> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            CacheError::Config("backfill worker requires a running Tokio runtime".into())
        })?;

        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let counters = Arc::new(Counters::default());
        let handle = runtime.spawn(run(target, prefix, rx, counters.clone()));

        Ok(Self {
            tx: Mutex::new(Some(tx)),
            handle: Mutex::new(Some(handle)),
            counters,
        })
    }

    /// Queue a local write without waiting. Returns `false` if the job was dropped.
    pub fn enqueue(&self, key: Value, name: &str, id: Value, value: T) -> bool {
        let Some(tx) = self.tx.lock().clone() else {
            self.dropped("worker stopped");
            return false;
        };

        let message = BackfillMessage::Store {
            key,
            name: name.to_string(),
            id,
            value,
        };
        match tx.try_send(message) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.dropped("queue full");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.dropped("worker stopped");
                false
            }
        }
    }

    /// Wait until every job queued before this call has been applied.
    pub async fn flush(&self) {
        let Some(tx) = self.tx.lock().clone() else {
            return;
        };
        let (done, wait) = oneshot::channel();
        if tx.send(BackfillMessage::Flush(done)).await.is_ok() {
            let _ = wait.await;
        }
    }

    /// Close the queue and wait for the worker to drain it.
    pub async fn shutdown(&self) {
        drop(self.tx.lock().take());
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "backfill worker ended abnormally");
            }
        }
    }

    pub fn stats(&self) -> BackfillStats {
        BackfillStats {
            applied: self.counters.applied.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }

    fn dropped(&self, reason: &'static str) {
        self.counters.dropped.fetch_add(1, Ordering::Relaxed);
        metrics::record_backfill("dropped");
        tracing::warn!(reason, "backfill job dropped");
    }
}

async fn run<T: Send + 'static>(
    target: Arc<dyn Tier<T>>,
    prefix: String,
    mut rx: mpsc::Receiver<BackfillMessage<T>>,
    counters: Arc<Counters>,
) {
    tracing::debug!(tier = %target.kind(), "backfill worker started");

    while let Some(message) = rx.recv().await {
        match message {
            BackfillMessage::Store {
                key,
                name,
                id,
                value,
            } => {
                let outcome = target.set(&key, &name, &prefix, &id, value).await;
                match outcome.err() {
                    None => {
                        counters.applied.fetch_add(1, Ordering::Relaxed);
                        metrics::record_backfill("applied");
                    }
                    Some(err) => {
                        counters.failed.fetch_add(1, Ordering::Relaxed);
                        metrics::record_backfill("failed");
                        tracing::warn!(tier = %target.kind(), name = %name, error = %err, "backfill failed");
                    }
                }
            }
            BackfillMessage::Flush(done) => {
                let _ = done.send(());
            }
        }
    }

    tracing::debug!("backfill worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::Outcome;
    use crate::tier::{LocalTier, TierKind};
    use async_trait::async_trait;
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::{Notify, Semaphore};

    fn local() -> Arc<LocalTier<String>> {
        Arc::new(LocalTier::new(16, Duration::from_secs(60)))
    }

    /// Tier whose writes block until a permit is released, or always fail.
    #[derive(Default)]
    struct StubTier {
        entered: Notify,
        gate: Option<Semaphore>,
        fail: bool,
    }

    impl StubTier {
        fn gated() -> Self {
            Self {
                gate: Some(Semaphore::new(0)),
                ..Default::default()
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl Tier<String> for StubTier {
        fn kind(&self) -> TierKind {
            TierKind::Local
        }

        fn supports_retry(&self) -> bool {
            false
        }

        async fn get(&self, _key: &Value, _prefix: &str) -> Outcome<String> {
            Outcome::miss()
        }

        async fn set(
            &self,
            _key: &Value,
            _name: &str,
            _prefix: &str,
            _id: &Value,
            value: String,
        ) -> Outcome<String> {
            self.entered.notify_one();
            if let Some(gate) = &self.gate {
                gate.acquire().await.unwrap().forget();
            }
            if self.fail {
                return Outcome::failure(CacheError::tier(TierKind::Local, "set", "disk full"));
            }
            Outcome::success(value)
        }

        async fn delete(&self, _key: &Value, _prefix: &str) -> Outcome<String> {
            Outcome::miss()
        }
    }

    #[tokio::test]
    async fn test_enqueue_then_flush_applies() {
        let tier = local();
        let worker = BackfillWorker::<String>::spawn(tier.clone(), "p:".into(), 8).unwrap();

        assert!(worker.enqueue(json!("u1"), "profile", json!(1), "alice".into()));
        worker.flush().await;

        assert!(tier.contains(&json!("u1"), "p:"));
        assert_eq!(worker.stats().applied, 1);
    }

    #[tokio::test]
    async fn test_enqueue_after_shutdown_is_dropped() {
        let worker = BackfillWorker::<String>::spawn(local(), "p:".into(), 8).unwrap();
        worker.shutdown().await;

        assert!(!worker.enqueue(json!("u1"), "profile", json!(1), "alice".into()));
        assert_eq!(worker.stats().dropped, 1);

        // flushing a stopped worker returns immediately
        worker.flush().await;
    }

    #[tokio::test]
    async fn test_full_queue_drops_job() {
        let tier = Arc::new(StubTier::gated());
        let worker = BackfillWorker::<String>::spawn(tier.clone(), "p:".into(), 1).unwrap();

        // the worker takes the first job and blocks inside the write
        assert!(worker.enqueue(json!("a"), "profile", json!(1), "a".into()));
        tier.entered.notified().await;

        assert!(worker.enqueue(json!("b"), "profile", json!(2), "b".into()));
        assert!(!worker.enqueue(json!("c"), "profile", json!(3), "c".into()));
        assert_eq!(worker.stats().dropped, 1);

        if let Some(gate) = &tier.gate {
            gate.add_permits(2);
        }
        worker.flush().await;
        assert_eq!(
            worker.stats(),
            BackfillStats {
                applied: 2,
                failed: 0,
                dropped: 1,
            }
        );
    }

    #[tokio::test]
    async fn test_failed_write_is_counted() {
        let worker =
            BackfillWorker::<String>::spawn(Arc::new(StubTier::failing()), "p:".into(), 8).unwrap();

        assert!(worker.enqueue(json!("u1"), "profile", json!(1), "alice".into()));
        worker.flush().await;

        let stats = worker.stats();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.applied, 0);
        assert_eq!(stats.dropped, 0);
    }

    #[test]
    fn test_spawn_requires_runtime() {
        let result = BackfillWorker::<String>::spawn(local(), "p:".into(), 8);
        assert!(matches!(result, Err(CacheError::Config(_))));
    }
}
