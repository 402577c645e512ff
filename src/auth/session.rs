//! Durable session records and their stores.
//!
//! A [`Session`] binds an opaque, unguessable id to a user until
//! `expires_at`. The [`SessionStore`] trait is the persistence seam: SQLite
//! is the default backend, and [`MemorySessionStore`] keeps sessions in
//! process memory for single-node setups and tests.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;

use crate::datetime::{format_datetime, parse_datetime};
use crate::db::DbPool;
use crate::Result;

/// Random bytes in a session id.
const SESSION_ID_BYTES: usize = 32;

/// Generate an opaque session id.
pub fn generate_session_id() -> String {
    let mut bytes = [0u8; SESSION_ID_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// A durable login session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Opaque session id carried in the session cookie.
    pub id: String,
    /// Owning user.
    pub user_id: i64,
    /// When the session was created.
    pub created_at: DateTime<Utc>,
    /// When the session stops being valid.
    pub expires_at: DateTime<Utc>,
}

impl Session {
    /// Create a session for `user_id` starting at `now`.
    pub fn new(user_id: i64, lifetime: Duration, now: DateTime<Utc>) -> Self {
        Self {
            id: generate_session_id(),
            user_id,
            created_at: now,
            expires_at: now + lifetime,
        }
    }

    /// Whether the session has expired at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Durable session persistence.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Persist a new session.
    async fn create(&self, session: &Session) -> Result<()>;

    /// Look up a session by id, expired or not.
    async fn get(&self, id: &str) -> Result<Option<Session>>;

    /// Delete a session. Returns whether a record was removed.
    async fn delete(&self, id: &str) -> Result<bool>;

    /// Delete every session expired at `now`. Returns the number removed.
    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64>;
}

#[derive(Debug, sqlx::FromRow)]
struct SessionRow {
    id: String,
    user_id: i64,
    created_at: String,
    expires_at: String,
}

impl From<SessionRow> for Session {
    fn from(row: SessionRow) -> Self {
        Session {
            id: row.id,
            user_id: row.user_id,
            created_at: parse_datetime(&row.created_at).unwrap_or_else(Utc::now),
            // An unreadable expiry is treated as already expired
            expires_at: parse_datetime(&row.expires_at).unwrap_or(DateTime::<Utc>::MIN_UTC),
        }
    }
}

/// SQLite-backed [`SessionStore`].
#[derive(Debug, Clone)]
pub struct SqliteSessionStore {
    pool: DbPool,
}

impl SqliteSessionStore {
    /// Create a store over the given pool.
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn create(&self, session: &Session) -> Result<()> {
        sqlx::query("INSERT INTO sessions (id, user_id, created_at, expires_at) VALUES (?, ?, ?, ?)")
            .bind(&session.id)
            .bind(session.user_id)
            .bind(format_datetime(session.created_at))
            .bind(format_datetime(session.expires_at))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Session>> {
        let row = sqlx::query_as::<_, SessionRow>(
            "SELECT id, user_id, created_at, expires_at FROM sessions WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Session::from))
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM sessions WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= ?")
            .bind(format_datetime(now))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

/// In-process [`SessionStore`].
///
/// Sessions do not survive a restart.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<String, Session>>,
}

impl MemorySessionStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored sessions.
    pub fn len(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create(&self, session: &Session) -> Result<()> {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Session>> {
        Ok(self
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        Ok(self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
            .is_some())
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        let before = sessions.len();
        sessions.retain(|_, s| !s.is_expired_at(now));
        Ok((before - sessions.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Database, SqliteUserStore, UserStore};
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    async fn sqlite_store() -> (SqliteSessionStore, i64) {
        let db = Database::open_in_memory().await.unwrap();
        let user = SqliteUserStore::new(db.pool().clone())
            .find_or_create("alice")
            .await
            .unwrap();
        (SqliteSessionStore::new(db.pool().clone()), user.id)
    }

    #[test]
    fn test_session_ids_are_unique_and_url_safe() {
        let a = generate_session_id();
        let b = generate_session_id();

        assert_ne!(a, b);
        assert_eq!(a.len(), 43);
        assert!(a
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_session_expiry() {
        let session = Session::new(1, Duration::days(7), t0());

        assert!(!session.is_expired_at(t0()));
        assert!(!session.is_expired_at(t0() + Duration::days(6)));
        assert!(session.is_expired_at(t0() + Duration::days(7)));
    }

    #[tokio::test]
    async fn test_sqlite_create_get_delete() {
        let (store, user_id) = sqlite_store().await;
        let session = Session::new(user_id, Duration::days(7), t0());

        store.create(&session).await.unwrap();
        assert_eq!(store.get(&session.id).await.unwrap(), Some(session.clone()));

        assert!(store.delete(&session.id).await.unwrap());
        assert!(store.get(&session.id).await.unwrap().is_none());

        // Absence is not an error
        assert!(!store.delete(&session.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_sqlite_delete_expired() {
        let (store, user_id) = sqlite_store().await;
        let short = Session::new(user_id, Duration::hours(1), t0());
        let long = Session::new(user_id, Duration::days(7), t0());
        store.create(&short).await.unwrap();
        store.create(&long).await.unwrap();

        let removed = store.delete_expired(t0() + Duration::hours(2)).await.unwrap();

        assert_eq!(removed, 1);
        assert!(store.get(&short.id).await.unwrap().is_none());
        assert!(store.get(&long.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemorySessionStore::new();
        let short = Session::new(1, Duration::hours(1), t0());
        let long = Session::new(1, Duration::days(7), t0());
        store.create(&short).await.unwrap();
        store.create(&long).await.unwrap();
        assert_eq!(store.len(), 2);

        assert_eq!(store.get(&long.id).await.unwrap(), Some(long.clone()));
        assert_eq!(store.delete_expired(t0() + Duration::hours(2)).await.unwrap(), 1);

        assert!(store.delete(&long.id).await.unwrap());
        assert!(store.is_empty());
    }
}
