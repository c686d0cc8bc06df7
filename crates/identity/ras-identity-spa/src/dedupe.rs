//! In-flight operation registry.
//!
//! `login` and `logout` open windows and navigate; running them twice at once would open
//! two popups or race two redirects. [`Dedupe`] collapses concurrent callers using the same
//! key onto one pending computation: the second caller awaits the same shared future and
//! observes the same result.

use futures::FutureExt;
use futures::future::{LocalBoxFuture, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

struct Entry<T: Clone> {
    id: u64,
    future: Shared<LocalBoxFuture<'static, T>>,
}

/// Result-sharing cache keyed by operation name
pub struct Dedupe<T: Clone> {
    in_flight: Mutex<HashMap<String, Entry<T>>>,
    next_id: AtomicU64,
}

impl<T: Clone> Default for Dedupe<T> {
    fn default() -> Self {
        Self {
            in_flight: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }
}

impl<T: Clone + 'static> Dedupe<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `operation` under `key`, or join the run already in flight for that key
    ///
    /// `operation` is only invoked when no run is pending. The entry is removed once the
    /// shared result resolves, so a later call starts a fresh run.
    pub async fn run<F, Fut>(&self, key: &str, operation: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + 'static,
    {
        let (id, future) = {
            let mut in_flight = self.lock_in_flight();
            match in_flight.get(key) {
                Some(entry) => {
                    debug!("Joining in-flight operation: {}", key);
                    (entry.id, entry.future.clone())
                }
                None => {
                    let id = self.next_id();
                    let future = operation().boxed_local().shared();
                    in_flight.insert(
                        key.to_string(),
                        Entry {
                            id,
                            future: future.clone(),
                        },
                    );
                    (id, future)
                }
            }
        };

        let result = future.await;

        let mut in_flight = self.lock_in_flight();
        if in_flight.get(key).is_some_and(|entry| entry.id == id) {
            in_flight.remove(key);
        }

        result
    }

    /// Whether an operation is currently pending under `key`
    pub fn in_flight(&self, key: &str) -> bool {
        self.lock_in_flight().contains_key(key)
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn lock_in_flight(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry<T>>> {
        self.in_flight.lock().unwrap_or_else(|p| p.into_inner())
    }
}
