//! User model and store for feedgate.
//!
//! Users are created on first successful login; the identity provider's
//! username is the only profile data kept.

use async_trait::async_trait;
use serde::Serialize;

use super::DbPool;
use crate::{FeedgateError, Result};

/// User entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct User {
    /// Unique user ID.
    pub id: i64,
    /// Login username (unique, case-insensitive).
    pub username: String,
    /// Account creation timestamp.
    pub created_at: String,
}

/// Durable user lookup.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Get a user by ID.
    async fn get_by_id(&self, id: i64) -> Result<Option<User>>;

    /// Return the user with `username`, creating it if absent.
    async fn find_or_create(&self, username: &str) -> Result<User>;
}

/// SQLite-backed [`UserStore`].
#[derive(Debug, Clone)]
pub struct SqliteUserStore {
    pool: DbPool,
}

impl SqliteUserStore {
    /// Create a store over the given pool.
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Get a user by username (case-insensitive).
    pub async fn get_by_username(&self, username: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, username, created_at FROM users WHERE username = ? COLLATE NOCASE",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }
}

#[async_trait]
impl UserStore for SqliteUserStore {
    async fn get_by_id(&self, id: i64) -> Result<Option<User>> {
        let user =
            sqlx::query_as::<_, User>("SELECT id, username, created_at FROM users WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(user)
    }

    async fn find_or_create(&self, username: &str) -> Result<User> {
        let username = username.trim();
        if username.is_empty() {
            return Err(FeedgateError::Validation(
                "username must not be empty".to_string(),
            ));
        }

        sqlx::query("INSERT OR IGNORE INTO users (username) VALUES (?)")
            .bind(username)
            .execute(&self.pool)
            .await?;

        self.get_by_username(username)
            .await?
            .ok_or_else(|| FeedgateError::NotFound("user".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    async fn setup() -> SqliteUserStore {
        let db = Database::open_in_memory().await.unwrap();
        SqliteUserStore::new(db.pool().clone())
    }

    #[tokio::test]
    async fn test_find_or_create_creates_once() {
        let store = setup().await;

        let first = store.find_or_create("alice").await.unwrap();
        let second = store.find_or_create("alice").await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.username, "alice");
    }

    #[tokio::test]
    async fn test_find_or_create_case_insensitive() {
        let store = setup().await;

        let lower = store.find_or_create("bob").await.unwrap();
        let upper = store.find_or_create("BOB").await.unwrap();

        assert_eq!(lower.id, upper.id);
    }

    #[tokio::test]
    async fn test_find_or_create_rejects_empty() {
        let store = setup().await;

        let result = store.find_or_create("   ").await;
        assert!(matches!(result, Err(FeedgateError::Validation(_))));
    }

    #[tokio::test]
    async fn test_get_by_id() {
        let store = setup().await;

        let user = store.find_or_create("carol").await.unwrap();
        let loaded = store.get_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(loaded, user);

        assert!(store.get_by_id(9999).await.unwrap().is_none());
    }
}
