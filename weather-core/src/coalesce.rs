//! In-flight request deduplication.
//!
//! Concurrent callers asking for the same key share one future. The shared
//! future lives only as long as at least one caller awaits it; when every
//! caller is dropped the underlying work is dropped, and thereby cancelled,
//! with them.

use std::{
    collections::HashMap,
    fmt::Debug,
    future::Future,
    hash::Hash,
    sync::{Arc, Mutex, MutexGuard},
};

use futures::future::{BoxFuture, FutureExt, Shared, WeakShared};
use tracing::{debug, warn};

type InFlight<V> = Shared<BoxFuture<'static, V>>;

pub struct RequestCoalescer<K, V>
where
    V: Clone,
{
    in_flight: Arc<Mutex<HashMap<K, WeakShared<BoxFuture<'static, V>>>>>,
}

impl<K, V> Clone for RequestCoalescer<K, V>
where
    V: Clone,
{
    fn clone(&self) -> Self {
        Self { in_flight: Arc::clone(&self.in_flight) }
    }
}

impl<K, V> Default for RequestCoalescer<K, V>
where
    V: Clone,
{
    fn default() -> Self {
        Self { in_flight: Arc::new(Mutex::new(HashMap::new())) }
    }
}

impl<K, V> RequestCoalescer<K, V>
where
    K: Eq + Hash + Clone + Debug,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<K, WeakShared<BoxFuture<'static, V>>>> {
        self.in_flight.lock().unwrap_or_else(|poisoned| {
            warn!("request coalescer mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Await the in-flight request for `key`, starting it with `start` if there is none.
    pub async fn run<F, Fut>(&self, key: K, start: F) -> V
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V> + Send + 'static,
    {
        let shared = self.attach_or_start(&key, start);
        let value = shared.clone().await;

        let mut in_flight = self.lock();
        let finished = in_flight
            .get(&key)
            .and_then(WeakShared::upgrade)
            .is_none_or(|current| current.ptr_eq(&shared));
        if finished {
            in_flight.remove(&key);
        }

        value
    }

    fn attach_or_start<F, Fut>(&self, key: &K, start: F) -> InFlight<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V> + Send + 'static,
    {
        let mut in_flight = self.lock();
        // entries whose callers were all dropped
        in_flight.retain(|_, weak| weak.upgrade().is_some());

        if let Some(existing) = in_flight.get(key).and_then(WeakShared::upgrade) {
            debug!(?key, "joining in-flight request");
            return existing;
        }

        let shared = start().boxed().shared();
        if let Some(weak) = shared.downgrade() {
            in_flight.insert(key.clone(), weak);
        }
        shared
    }

    /// Number of keys with a live request.
    pub fn in_flight(&self) -> usize {
        self.lock().values().filter(|weak| weak.upgrade().is_some()).count()
    }

    /// Number of map entries, live or not.
    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_share_one_run() {
        let coalescer: RequestCoalescer<&str, usize> = RequestCoalescer::new();
        let runs = Arc::new(AtomicUsize::new(0));

        let call = || {
            let runs = Arc::clone(&runs);
            coalescer.run("home", move || async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                runs.fetch_add(1, Ordering::SeqCst) + 1
            })
        };

        let (a, b, c) = tokio::join!(call(), call(), call());
        assert_eq!((a, b, c), (1, 1, 1));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(coalescer.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn different_keys_run_separately() {
        let coalescer: RequestCoalescer<String, usize> = RequestCoalescer::new();
        let runs = Arc::new(AtomicUsize::new(0));

        let call = |key: &str| {
            let runs = Arc::clone(&runs);
            coalescer.run(key.to_string(), move || async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                runs.fetch_add(1, Ordering::SeqCst)
            })
        };

        tokio::join!(call("home"), call("work"));
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn completed_requests_are_not_reused() {
        let coalescer: RequestCoalescer<&str, usize> = RequestCoalescer::new();
        let runs = Arc::new(AtomicUsize::new(0));

        for expected in 1..=2 {
            let runs = Arc::clone(&runs);
            let value = coalescer
                .run("home", move || async move { runs.fetch_add(1, Ordering::SeqCst) + 1 })
                .await;
            assert_eq!(value, expected);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_every_caller_cancels_the_work() {
        let coalescer: RequestCoalescer<&str, ()> = RequestCoalescer::new();
        let finished = Arc::new(AtomicUsize::new(0));

        let slow = {
            let finished = Arc::clone(&finished);
            coalescer.run("home", move || async move {
                tokio::time::sleep(Duration::from_secs(60)).await;
                finished.fetch_add(1, Ordering::SeqCst);
            })
        };
        let outcome = tokio::time::timeout(Duration::from_secs(1), slow).await;
        assert!(outcome.is_err());
        assert_eq!(coalescer.in_flight(), 0);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(finished.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_keys_are_pruned() {
        let coalescer: RequestCoalescer<String, ()> = RequestCoalescer::new();

        for key in ["home", "work", "cabin"] {
            let slow = coalescer.run(key.to_string(), || tokio::time::sleep(Duration::from_secs(60)));
            assert!(tokio::time::timeout(Duration::from_secs(1), slow).await.is_err());
        }
        assert!(coalescer.tracked() <= 1);

        coalescer.run("office".to_string(), || async {}).await;
        assert_eq!(coalescer.tracked(), 0);
    }
}
