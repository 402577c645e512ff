//! Per-request memoization.
//!
//! A [`RequestCache`] lives for one inbound request. The first lookup of a
//! `(kind, user)` key runs its loader and keeps the result; later lookups in
//! the same request get the kept value. Two lookups racing on the same key
//! may both load; the first stored value wins.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use crate::Result;

type Key = (&'static str, i64);
type Value = Arc<dyn Any + Send + Sync>;

/// Request-lifetime cache keyed by `(kind, user_id)`.
#[derive(Clone, Default)]
pub struct RequestCache {
    entries: Arc<Mutex<HashMap<Key, Value>>>,
}

impl RequestCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the memoized value for `(kind, user_id)`, loading it on first use.
    ///
    /// Loader errors are returned and nothing is memoized.
    pub async fn get_or_load<T, F, Fut>(
        &self,
        kind: &'static str,
        user_id: i64,
        load: F,
    ) -> Result<Arc<T>>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(value) = self.lookup::<T>(kind, user_id) {
            return Ok(value);
        }

        // Lock is not held across the load
        let loaded: Value = Arc::new(load().await?);

        let stored = {
            let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            entries.entry((kind, user_id)).or_insert(loaded).clone()
        };

        stored.downcast::<T>().map_err(|_| {
            crate::FeedgateError::Internal(format!("request cache type mismatch for {kind}"))
        })
    }

    /// Memoized value, if any.
    pub fn lookup<T: Any + Send + Sync>(&self, kind: &'static str, user_id: i64) -> Option<Arc<T>> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(&(kind, user_id))
            .cloned()
            .and_then(|value| value.downcast::<T>().ok())
    }

    /// Number of memoized values.
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether nothing is memoized.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for RequestCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestCache")
            .field("entries", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FeedgateError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_second_lookup_served_from_memory() {
        let cache = RequestCache::new();
        let loads = AtomicUsize::new(0);

        for _ in 0..3 {
            let value = cache
                .get_or_load("subscriptions", 7, || async {
                    loads.fetch_add(1, Ordering::SeqCst);
                    Ok(vec![1i64, 2, 3])
                })
                .await
                .unwrap();
            assert_eq!(*value, vec![1, 2, 3]);
        }

        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_keys_are_separate() {
        let cache = RequestCache::new();

        let a = cache
            .get_or_load("counts", 1, || async { Ok(10i64) })
            .await
            .unwrap();
        let b = cache
            .get_or_load("counts", 2, || async { Ok(20i64) })
            .await
            .unwrap();
        let c = cache
            .get_or_load("feeds", 1, || async { Ok(30i64) })
            .await
            .unwrap();

        assert_eq!((*a, *b, *c), (10, 20, 30));
        assert_eq!(cache.len(), 3);
    }

    #[tokio::test]
    async fn test_errors_are_not_memoized() {
        let cache = RequestCache::new();

        let failed: Result<Arc<i64>> = cache
            .get_or_load("counts", 1, || async {
                Err(FeedgateError::Database("busy".to_string()))
            })
            .await;
        assert!(failed.is_err());
        assert!(cache.is_empty());

        let ok = cache
            .get_or_load("counts", 1, || async { Ok(5i64) })
            .await
            .unwrap();
        assert_eq!(*ok, 5);
    }

    #[tokio::test]
    async fn test_separate_requests_do_not_share() {
        let first = RequestCache::new();
        first
            .get_or_load("counts", 1, || async { Ok(1i64) })
            .await
            .unwrap();

        let second = RequestCache::new();
        assert!(second.lookup::<i64>("counts", 1).is_none());
    }
}
