//! Request coalescing keyed by fingerprint.

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::OnceCell;

use crate::outcome::Outcome;

/// Merges concurrent executions that share a fingerprint.
///
/// The first caller runs its future; callers arriving while it is in flight
/// wait and receive a clone of the same outcome. Once the execution completes
/// the fingerprint is released and the next caller starts a fresh one. If the
/// running caller is cancelled, one of the waiters takes over with its own
/// future.
pub struct SingleFlight<T> {
    calls: DashMap<String, Arc<OnceCell<Outcome<T>>>>,
}

impl<T> Default for SingleFlight<T> {
    fn default() -> Self {
        Self {
            calls: DashMap::new(),
        }
    }
}

impl<T: Clone> SingleFlight<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn run<Fut>(&self, fingerprint: &str, fut: Fut) -> Outcome<T>
    where
        Fut: Future<Output = Outcome<T>>,
    {
        let cell = self
            .calls
            .entry(fingerprint.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let outcome = cell.get_or_init(|| fut).await.clone();

        self.calls
            .remove_if(fingerprint, |_, current| Arc::ptr_eq(current, &cell));

        outcome
    }

    /// Fingerprints with an execution in progress.
    pub fn in_flight(&self) -> usize {
        self.calls.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_concurrent_callers_share_one_execution() {
        let flights = Arc::new(SingleFlight::<u32>::new());
        let runs = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let flights = flights.clone();
            let runs = runs.clone();
            handles.push(tokio::spawn(async move {
                flights
                    .run("same", async {
                        runs.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Outcome::success(7)
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(*handle.await.unwrap().data(), 7);
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(flights.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_sequential_calls_run_again() {
        let flights = SingleFlight::<u32>::new();
        let first = flights.run("k", async { Outcome::success(1) }).await;
        let second = flights.run("k", async { Outcome::success(2) }).await;
        assert_eq!(*first.data(), 1);
        assert_eq!(*second.data(), 2);
    }

    #[tokio::test]
    async fn test_distinct_fingerprints_do_not_merge() {
        let flights = SingleFlight::<u32>::new();
        let (a, b) = tokio::join!(
            flights.run("a", async { Outcome::success(1) }),
            flights.run("b", async { Outcome::success(2) }),
        );
        assert_eq!(*a.data(), 1);
        assert_eq!(*b.data(), 2);
    }
}
