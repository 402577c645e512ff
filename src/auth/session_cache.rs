//! Read-through session cache.
//!
//! Every authenticated request resolves its session cookie here. Hits are
//! served from memory until the entry's own TTL runs out; misses read the
//! durable [`SessionStore`], verify expiry, load the user and repopulate the
//! cache. The cache TTL is independent of the session's expiry, but a
//! cached entry is never trusted past either.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use super::session::{Session, SessionStore};
use crate::config::SessionConfig;
use crate::datetime::Clock;
use crate::db::{User, UserStore};
use crate::Result;

/// A resolved session together with its user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSession {
    /// The durable session.
    pub session: Session,
    /// The session's user.
    pub user: User,
}

#[derive(Debug)]
struct CachedSession {
    auth: AuthSession,
    cached_until: DateTime<Utc>,
}

impl CachedSession {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now < self.cached_until && !self.auth.session.is_expired_at(now)
    }
}

#[derive(Debug, Default)]
struct Entries {
    map: HashMap<String, CachedSession>,
    /// Bumped on every delete; a read-through that saw a different value
    /// must not repopulate the cache.
    epoch: u64,
}

/// Session cache over a durable store.
pub struct SessionCache {
    store: Arc<dyn SessionStore>,
    users: Arc<dyn UserStore>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    lifetime: Duration,
    entries: RwLock<Entries>,
}

impl SessionCache {
    /// Create a cache with the given entry TTL and session lifetime.
    pub fn new(
        store: Arc<dyn SessionStore>,
        users: Arc<dyn UserStore>,
        clock: Arc<dyn Clock>,
        ttl: Duration,
        lifetime: Duration,
    ) -> Self {
        Self {
            store,
            users,
            clock,
            ttl,
            lifetime,
            entries: RwLock::new(Entries::default()),
        }
    }

    /// Create a cache from the `[session]` section.
    pub fn from_config(
        config: &SessionConfig,
        store: Arc<dyn SessionStore>,
        users: Arc<dyn UserStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        Ok(Self::new(
            store,
            users,
            clock,
            config.cache_ttl()?,
            config.lifetime()?,
        ))
    }

    /// Resolve a session id.
    ///
    /// Returns `None` for unknown or expired sessions, and also when the
    /// durable store cannot be read: an unverifiable session is never
    /// trusted.
    pub async fn get(&self, id: &str) -> Option<AuthSession> {
        let now = self.clock.now();

        let epoch = {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(entry) = entries.map.get(id) {
                if entry.is_fresh(now) {
                    return Some(entry.auth.clone());
                }
            }
            entries.epoch
        };

        let session = match self.store.get(id).await {
            Ok(Some(session)) => session,
            Ok(None) => {
                self.evict(id);
                return None;
            }
            Err(e) => {
                warn!(error = %e, "Session store lookup failed, treating as not found");
                return None;
            }
        };

        if session.is_expired_at(now) {
            debug!(user_id = session.user_id, "Session expired");
            self.evict(id);
            return None;
        }

        let user = match self.users.get_by_id(session.user_id).await {
            Ok(Some(user)) => user,
            Ok(None) => {
                warn!(user_id = session.user_id, "Session refers to a missing user");
                return None;
            }
            Err(e) => {
                warn!(error = %e, "User lookup failed, treating session as not found");
                return None;
            }
        };

        let cached_until = (now + self.ttl).min(session.expires_at);
        let auth = AuthSession { session, user };

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if entries.epoch == epoch {
            entries.map.insert(
                id.to_string(),
                CachedSession {
                    auth: auth.clone(),
                    cached_until,
                },
            );
        }

        Some(auth)
    }

    /// Create and persist a session for `user_id`.
    ///
    /// The cache is not pre-populated; the first [`get`](Self::get) fills it.
    pub async fn create(&self, user_id: i64) -> Result<Session> {
        let session = Session::new(user_id, self.lifetime, self.clock.now());
        self.store.create(&session).await?;
        info!(user_id, "Session created");
        Ok(session)
    }

    /// Delete a session from the durable store and the cache.
    ///
    /// The cache entry is evicted before this returns, whether or not the
    /// store delete succeeded. Deleting an unknown session is not an error.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let result = self.store.delete(id).await;

        {
            let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
            entries.epoch = entries.epoch.wrapping_add(1);
            entries.map.remove(id);
        }

        match result {
            Ok(true) => {
                info!("Session deleted");
                Ok(())
            }
            Ok(false) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Remove cache entries whose TTL has elapsed.
    pub fn sweep_cache(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.map.len();
        entries.map.retain(|_, entry| entry.is_fresh(now));
        let removed = before - entries.map.len();

        if removed > 0 {
            debug!(removed, "Swept session cache");
        }
        removed
    }

    /// Delete durably expired sessions.
    pub async fn sweep_expired_sessions(&self) -> Result<u64> {
        let removed = self.store.delete_expired(self.clock.now()).await?;
        if removed > 0 {
            info!(removed, "Deleted expired sessions");
        }
        Ok(removed)
    }

    /// Number of cached entries, fresh or not.
    pub fn cached_len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .map
            .len()
    }

    fn evict(&self, id: &str) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .map
            .remove(id);
    }
}

impl std::fmt::Debug for SessionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCache")
            .field("ttl", &self.ttl)
            .field("lifetime", &self.lifetime)
            .field("cached", &self.cached_len())
            .finish()
    }
}
