//! Collapse concurrent identical operations into one.
//!
//! The first caller for a key spawns the work on the tokio runtime and stores
//! a shared handle to it; later callers for the same key get a clone of that
//! handle. The entry is dropped by the spawned task itself when it settles,
//! whatever the outcome, so a failed operation can be retried by the next
//! caller. Dropping a caller's future never cancels the work.

use crate::CoreError;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

pub type SharedResult<V> = Shared<BoxFuture<'static, Result<V, CoreError>>>;

type InflightMap<K, V> = Arc<Mutex<HashMap<K, SharedResult<V>>>>;

pub struct SingleFlight<K, V> {
    inflight: InflightMap<K, V>,
}

impl<K, V> Default for SingleFlight<K, V> {
    fn default() -> Self {
        Self {
            inflight: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

/// Removes a key from the in-flight map when the owning task finishes or unwinds.
struct SettleGuard<K: Eq + Hash, V> {
    inflight: InflightMap<K, V>,
    key: Option<K>,
}

impl<K: Eq + Hash, V> Drop for SettleGuard<K, V> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.inflight
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&key);
        }
    }
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `work` for `key`, or attach to the run already in flight.
    ///
    /// Must be called from within a tokio runtime.
    pub fn run<F>(&self, key: K, work: F) -> SharedResult<V>
    where
        F: Future<Output = Result<V, CoreError>> + Send + 'static,
    {
        let mut inflight = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = inflight.get(&key) {
            debug!("attaching to in-flight operation");
            return existing.clone();
        }

        let guard = SettleGuard {
            inflight: Arc::clone(&self.inflight),
            key: Some(key.clone()),
        };
        let handle = tokio::spawn(async move {
            let _guard = guard;
            work.await
        });
        let shared = async move {
            match handle.await {
                Ok(result) => result,
                Err(e) => Err(CoreError::TaskFailed(e.to_string())),
            }
        }
        .boxed()
        .shared();
        inflight.insert(key, shared.clone());
        shared
    }

    pub fn in_flight(&self) -> usize {
        self.inflight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn concurrent_callers_share_one_run() {
        let flight: SingleFlight<&'static str, u32> = SingleFlight::new();
        let runs = Arc::new(AtomicUsize::new(0));

        let make = |runs: Arc<AtomicUsize>| async move {
            runs.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(7)
        };
        let a = flight.run("k", make(Arc::clone(&runs)));
        let b = flight.run("k", make(Arc::clone(&runs)));
        assert_eq!(flight.in_flight(), 1);

        let (ra, rb) = tokio::join!(a, b);
        assert_eq!(ra.unwrap(), 7);
        assert_eq!(rb.unwrap(), 7);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(flight.in_flight(), 0);
    }

    #[tokio::test]
    async fn failure_is_shared_then_retriable() {
        let flight: SingleFlight<u8, u8> = SingleFlight::new();
        let a = flight.run(1, async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Err(CoreError::NoRuntime)
        });
        let b = flight.run(1, async { Ok(9) });
        let (ra, rb) = tokio::join!(a, b);
        assert!(matches!(ra, Err(CoreError::NoRuntime)));
        assert!(matches!(rb, Err(CoreError::NoRuntime)));

        let retry = flight.run(1, async { Ok(9) }).await;
        assert_eq!(retry.unwrap(), 9);
    }

    #[tokio::test]
    async fn panic_settles_as_task_failure() {
        let flight: SingleFlight<u8, u8> = SingleFlight::new();
        let result = flight
            .run(1, async { panic!("installer exploded") })
            .await;
        assert!(matches!(result, Err(CoreError::TaskFailed(_))));
        assert_eq!(flight.in_flight(), 0);
    }

    #[tokio::test]
    async fn dropped_caller_does_not_cancel_work() {
        let flight: SingleFlight<u8, u8> = SingleFlight::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        drop(flight.run(1, async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(1)
        }));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(flight.in_flight(), 0);
    }

    #[tokio::test]
    async fn distinct_keys_run_independently() {
        let flight: SingleFlight<u8, u8> = SingleFlight::new();
        let (a, b) = tokio::join!(flight.run(1, async { Ok(1) }), flight.run(2, async { Ok(2) }));
        assert_eq!(a.unwrap(), 1);
        assert_eq!(b.unwrap(), 2);
    }
}
