//! Per-user unread/total article counts.
//!
//! Counts are loaded lazily from the feed store on the first query after a
//! miss, then served for one TTL window. Read toggles patch the cached
//! `unread` in place; structural changes (subscribe, unsubscribe, bulk
//! writes) drop the user's entry so the next read recomputes it.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::CountsConfig;
use crate::datetime::Clock;
use crate::Result;

/// Unread and total article counts for one feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FeedCounts {
    /// Feed the counts belong to.
    pub feed_id: i64,
    /// Articles the user has not read.
    pub unread: i64,
    /// All articles in the feed.
    pub total: i64,
}

impl FeedCounts {
    /// Create counts, clamping `unread` into `0..=total`.
    pub fn new(feed_id: i64, unread: i64, total: i64) -> Self {
        let total = total.max(0);
        Self {
            feed_id,
            unread: unread.clamp(0, total),
            total,
        }
    }
}

/// Counts for every feed a user subscribes to, keyed by feed id.
pub type CountMap = HashMap<i64, FeedCounts>;

#[derive(Debug)]
struct Entry {
    counts: CountMap,
    expires_at: DateTime<Utc>,
}

/// TTL cache of per-user feed counts.
pub struct UnreadCountCache {
    entries: RwLock<HashMap<i64, Entry>>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl UnreadCountCache {
    /// Create a cache serving entries for `ttl`.
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
            clock,
        }
    }

    /// Create a cache from the `[counts]` section.
    pub fn from_config(config: &CountsConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        Ok(Self::new(config.ttl()?, clock))
    }

    /// Cached counts for `user_id`, if present and unexpired.
    pub fn get(&self, user_id: i64) -> Option<CountMap> {
        let now = self.clock.now();
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(&user_id)
            .filter(|entry| now < entry.expires_at)
            .map(|entry| entry.counts.clone())
    }

    /// Cached counts for `user_id` regardless of age.
    pub fn get_last_known(&self, user_id: i64) -> Option<CountMap> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.get(&user_id).map(|entry| entry.counts.clone())
    }

    /// Store a copy of `counts` with a fresh TTL.
    pub fn set(&self, user_id: i64, counts: &CountMap) {
        let entry = Entry {
            counts: counts.clone(),
            expires_at: self.clock.now() + self.ttl,
        };
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(user_id, entry);
    }

    /// Apply a read-state transition to the cached `unread` count.
    ///
    /// Only `unread` moves: down by one for unread to read, up by one for
    /// read to unread, kept within `0..=total`. Nothing happens when the
    /// entry is absent or expired. Returns whether the entry was patched.
    pub fn update_count(&self, user_id: i64, feed_id: i64, was_read: bool, now_read: bool) -> bool {
        if was_read == now_read {
            return false;
        }

        let now = self.clock.now();
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);

        let Some(entry) = entries.get_mut(&user_id) else {
            return false;
        };
        if now >= entry.expires_at {
            return false;
        }
        let Some(counts) = entry.counts.get_mut(&feed_id) else {
            return false;
        };

        counts.unread = if now_read {
            (counts.unread - 1).max(0)
        } else {
            (counts.unread + 1).min(counts.total)
        };
        true
    }

    /// Drop the entry for `user_id`.
    pub fn invalidate(&self, user_id: i64) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&user_id);
    }

    /// Drop every entry.
    pub fn invalidate_all(&self) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Remove expired entries.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|_, entry| now < entry.expires_at);
        let removed = before - entries.len();

        if removed > 0 {
            debug!(removed, "Swept unread count cache");
        }
        removed
    }

    /// Number of cached users, expired or not.
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Serve cached counts, or recompute them with `load` on a miss.
    ///
    /// If the recompute fails, the last known counts are served when there
    /// are any; otherwise the error is returned.
    pub async fn get_or_recompute<F, Fut>(&self, user_id: i64, load: F) -> Result<CountMap>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<CountMap>>,
    {
        if let Some(counts) = self.get(user_id) {
            return Ok(counts);
        }

        match load().await {
            Ok(counts) => {
                self.set(user_id, &counts);
                Ok(counts)
            }
            Err(e) => match self.get_last_known(user_id) {
                Some(stale) => {
                    warn!(user_id, error = %e, "Count recompute failed, serving last known counts");
                    Ok(stale)
                }
                None => Err(e),
            },
        }
    }
}

impl std::fmt::Debug for UnreadCountCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnreadCountCache")
            .field("ttl", &self.ttl)
            .field("users", &self.len())
            .finish()
    }
}
