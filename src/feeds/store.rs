//! Durable feed, subscription and article storage.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::types::{
    Article, Feed, FetchValidators, FetchedMeta, NewArticle, ReadTransition, Subscription,
};
use crate::cache::{CountMap, FeedCounts};
use crate::datetime::{format_datetime, parse_datetime};
use crate::db::DbPool;
use crate::{FeedgateError, Result};

/// Feed and article persistence used by handlers and the refresh scheduler.
#[async_trait]
pub trait FeedStore: Send + Sync {
    /// Every feed with at least one subscriber, each listed once.
    async fn list_refreshable_feeds(&self) -> Result<Vec<Feed>>;

    /// Get a feed by ID.
    async fn get_feed(&self, feed_id: i64) -> Result<Option<Feed>>;

    /// Subscribe `user_id` to `url`, creating the shared feed on first use.
    async fn subscribe(&self, user_id: i64, url: &str) -> Result<Feed>;

    /// Remove a subscription. Returns whether one existed.
    async fn unsubscribe(&self, user_id: i64, feed_id: i64) -> Result<bool>;

    /// A user's subscriptions, oldest first.
    async fn list_subscriptions(&self, user_id: i64) -> Result<Vec<Subscription>>;

    /// Whether `user_id` subscribes to `feed_id`.
    async fn is_subscribed(&self, user_id: i64, feed_id: i64) -> Result<bool>;

    /// Articles of a feed with the user's state, newest first.
    async fn list_articles(&self, user_id: i64, feed_id: i64, limit: i64) -> Result<Vec<Article>>;

    /// Set an article's read state for a user.
    ///
    /// Returns `None` when the article does not exist or belongs to a feed the
    /// user does not subscribe to.
    async fn set_read(
        &self,
        user_id: i64,
        article_id: i64,
        read: bool,
    ) -> Result<Option<ReadTransition>>;

    /// Set an article's starred state. Returns the article's feed, if visible.
    async fn set_starred(&self, user_id: i64, article_id: i64, starred: bool)
        -> Result<Option<i64>>;

    /// Mark every article of a feed read for a user. Returns the rows written.
    async fn mark_feed_read(&self, user_id: i64, feed_id: i64) -> Result<u64>;

    /// Ground-truth counts for every feed the user subscribes to.
    async fn counts_for_user(&self, user_id: i64) -> Result<CountMap>;

    /// Insert articles not seen before. Returns how many were new.
    async fn insert_articles(&self, feed_id: i64, articles: &[NewArticle]) -> Result<u64>;

    /// Record a successful fetch (including 304 Not Modified).
    async fn record_fetch_success(
        &self,
        feed_id: i64,
        meta: &FetchedMeta,
        at: DateTime<Utc>,
    ) -> Result<()>;

    /// Record a failed fetch.
    async fn record_fetch_failure(&self, feed_id: i64, error: &str, at: DateTime<Utc>)
        -> Result<()>;
}

/// Row type for a feed from the database.
#[derive(Debug, Clone, sqlx::FromRow)]
struct FeedRow {
    id: i64,
    url: String,
    title: Option<String>,
    site_url: Option<String>,
    etag: Option<String>,
    last_modified: Option<String>,
    last_fetched_at: Option<String>,
    last_attempt_at: Option<String>,
    failure_count: i64,
    last_error: Option<String>,
}

impl From<FeedRow> for Feed {
    fn from(row: FeedRow) -> Self {
        Feed {
            id: row.id,
            url: row.url,
            title: row.title,
            site_url: row.site_url,
            validators: FetchValidators {
                etag: row.etag,
                last_modified: row.last_modified,
            },
            last_fetched_at: row.last_fetched_at.and_then(|s| parse_datetime(&s)),
            last_attempt_at: row.last_attempt_at.and_then(|s| parse_datetime(&s)),
            failure_count: row.failure_count,
            last_error: row.last_error,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct SubscriptionRow {
    feed_id: i64,
    url: String,
    title: Option<String>,
    site_url: Option<String>,
    last_fetched_at: Option<String>,
    last_error: Option<String>,
}

impl From<SubscriptionRow> for Subscription {
    fn from(row: SubscriptionRow) -> Self {
        Subscription {
            feed_id: row.feed_id,
            url: row.url,
            title: row.title,
            site_url: row.site_url,
            last_fetched_at: row.last_fetched_at.and_then(|s| parse_datetime(&s)),
            last_error: row.last_error,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct ArticleRow {
    id: i64,
    feed_id: i64,
    title: String,
    link: Option<String>,
    summary: Option<String>,
    published_at: Option<String>,
    is_read: bool,
    is_starred: bool,
}

impl From<ArticleRow> for Article {
    fn from(row: ArticleRow) -> Self {
        Article {
            id: row.id,
            feed_id: row.feed_id,
            title: row.title,
            link: row.link,
            summary: row.summary,
            published_at: row.published_at.and_then(|s| parse_datetime(&s)),
            is_read: row.is_read,
            is_starred: row.is_starred,
        }
    }
}

const FEED_COLUMNS: &str = "f.id, f.url, f.title, f.site_url, f.etag, f.last_modified, \
     f.last_fetched_at, f.last_attempt_at, f.failure_count, f.last_error";

/// SQLite-backed [`FeedStore`].
#[derive(Debug, Clone)]
pub struct SqliteFeedStore {
    pool: DbPool,
}

impl SqliteFeedStore {
    /// Create a store over the given pool.
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Feed id of an article visible to `user_id`.
    async fn visible_article_feed(&self, user_id: i64, article_id: i64) -> Result<Option<i64>> {
        let feed_id: Option<i64> = sqlx::query_scalar(
            "SELECT a.feed_id FROM articles a
             JOIN subscriptions s ON s.feed_id = a.feed_id AND s.user_id = ?
             WHERE a.id = ?",
        )
        .bind(user_id)
        .bind(article_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(feed_id)
    }

    async fn ensure_state_row(&self, user_id: i64, article_id: i64) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO article_states (user_id, article_id) VALUES (?, ?)")
            .bind(user_id)
            .bind(article_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl FeedStore for SqliteFeedStore {
    async fn list_refreshable_feeds(&self) -> Result<Vec<Feed>> {
        let query = format!(
            "SELECT {FEED_COLUMNS} FROM feeds f
             WHERE EXISTS (SELECT 1 FROM subscriptions s WHERE s.feed_id = f.id)
             ORDER BY f.last_attempt_at ASC NULLS FIRST, f.id ASC"
        );
        let rows = sqlx::query_as::<_, FeedRow>(&query)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(Feed::from).collect())
    }

    async fn get_feed(&self, feed_id: i64) -> Result<Option<Feed>> {
        let query = format!("SELECT {FEED_COLUMNS} FROM feeds f WHERE f.id = ?");
        let row = sqlx::query_as::<_, FeedRow>(&query)
            .bind(feed_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(Feed::from))
    }

    async fn subscribe(&self, user_id: i64, url: &str) -> Result<Feed> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("INSERT OR IGNORE INTO feeds (url) VALUES (?)")
            .bind(url)
            .execute(&mut *tx)
            .await?;

        let feed_id: i64 = sqlx::query_scalar("SELECT id FROM feeds WHERE url = ?")
            .bind(url)
            .fetch_one(&mut *tx)
            .await?;

        sqlx::query("INSERT OR IGNORE INTO subscriptions (user_id, feed_id) VALUES (?, ?)")
            .bind(user_id)
            .bind(feed_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        self.get_feed(feed_id)
            .await?
            .ok_or_else(|| FeedgateError::NotFound("feed".to_string()))
    }

    async fn unsubscribe(&self, user_id: i64, feed_id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM subscriptions WHERE user_id = ? AND feed_id = ?")
            .bind(user_id)
            .bind(feed_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_subscriptions(&self, user_id: i64) -> Result<Vec<Subscription>> {
        let rows = sqlx::query_as::<_, SubscriptionRow>(
            "SELECT f.id AS feed_id, f.url, f.title, f.site_url, f.last_fetched_at, f.last_error
             FROM subscriptions s
             JOIN feeds f ON f.id = s.feed_id
             WHERE s.user_id = ?
             ORDER BY s.created_at ASC, f.id ASC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Subscription::from).collect())
    }

    async fn is_subscribed(&self, user_id: i64, feed_id: i64) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM subscriptions WHERE user_id = ? AND feed_id = ?)",
        )
        .bind(user_id)
        .bind(feed_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn list_articles(&self, user_id: i64, feed_id: i64, limit: i64) -> Result<Vec<Article>> {
        let rows = sqlx::query_as::<_, ArticleRow>(
            "SELECT a.id, a.feed_id, a.title, a.link, a.summary, a.published_at,
                    COALESCE(st.is_read, 0) AS is_read,
                    COALESCE(st.is_starred, 0) AS is_starred
             FROM articles a
             LEFT JOIN article_states st ON st.article_id = a.id AND st.user_id = ?
             WHERE a.feed_id = ?
             ORDER BY COALESCE(a.published_at, a.fetched_at) DESC, a.id DESC
             LIMIT ?",
        )
        .bind(user_id)
        .bind(feed_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Article::from).collect())
    }

    async fn set_read(
        &self,
        user_id: i64,
        article_id: i64,
        read: bool,
    ) -> Result<Option<ReadTransition>> {
        let Some(feed_id) = self.visible_article_feed(user_id, article_id).await? else {
            return Ok(None);
        };

        self.ensure_state_row(user_id, article_id).await?;

        // Only a write that flips the flag reports a transition, so concurrent
        // toggles to the same value cannot both observe the old state.
        let result = sqlx::query(
            "UPDATE article_states SET is_read = ?
             WHERE user_id = ? AND article_id = ? AND is_read != ?",
        )
        .bind(read)
        .bind(user_id)
        .bind(article_id)
        .bind(read)
        .execute(&self.pool)
        .await?;

        let was_read = if result.rows_affected() > 0 { !read } else { read };
        Ok(Some(ReadTransition {
            feed_id,
            was_read,
            now_read: read,
        }))
    }

    async fn set_starred(
        &self,
        user_id: i64,
        article_id: i64,
        starred: bool,
    ) -> Result<Option<i64>> {
        let Some(feed_id) = self.visible_article_feed(user_id, article_id).await? else {
            return Ok(None);
        };

        self.ensure_state_row(user_id, article_id).await?;

        sqlx::query("UPDATE article_states SET is_starred = ? WHERE user_id = ? AND article_id = ?")
            .bind(starred)
            .bind(user_id)
            .bind(article_id)
            .execute(&self.pool)
            .await?;

        Ok(Some(feed_id))
    }

    async fn mark_feed_read(&self, user_id: i64, feed_id: i64) -> Result<u64> {
        let result = sqlx::query(
            "INSERT INTO article_states (user_id, article_id, is_read)
             SELECT ?, a.id, 1 FROM articles a WHERE a.feed_id = ?
             ON CONFLICT (user_id, article_id) DO UPDATE SET is_read = 1
             WHERE is_read = 0",
        )
        .bind(user_id)
        .bind(feed_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn counts_for_user(&self, user_id: i64) -> Result<CountMap> {
        let rows: Vec<(i64, i64, i64)> = sqlx::query_as(
            "SELECT s.feed_id,
                    COALESCE(SUM(CASE WHEN a.id IS NOT NULL AND COALESCE(st.is_read, 0) = 0
                                      THEN 1 ELSE 0 END), 0) AS unread,
                    COUNT(a.id) AS total
             FROM subscriptions s
             LEFT JOIN articles a ON a.feed_id = s.feed_id
             LEFT JOIN article_states st ON st.article_id = a.id AND st.user_id = s.user_id
             WHERE s.user_id = ?
             GROUP BY s.feed_id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(feed_id, unread, total)| (feed_id, FeedCounts::new(feed_id, unread, total)))
            .collect())
    }

    async fn insert_articles(&self, feed_id: i64, articles: &[NewArticle]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;

        for article in articles {
            let result = sqlx::query(
                "INSERT OR IGNORE INTO articles (feed_id, guid, title, link, summary, published_at)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(feed_id)
            .bind(&article.guid)
            .bind(&article.title)
            .bind(&article.link)
            .bind(&article.summary)
            .bind(article.published_at.map(format_datetime))
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected();
        }

        tx.commit().await?;
        Ok(inserted)
    }

    async fn record_fetch_success(
        &self,
        feed_id: i64,
        meta: &FetchedMeta,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let at = format_datetime(at);
        sqlx::query(
            "UPDATE feeds SET
                title = COALESCE(?, title),
                site_url = COALESCE(?, site_url),
                etag = COALESCE(?, etag),
                last_modified = COALESCE(?, last_modified),
                last_fetched_at = ?,
                last_attempt_at = ?,
                failure_count = 0,
                last_error = NULL
             WHERE id = ?",
        )
        .bind(&meta.title)
        .bind(&meta.site_url)
        .bind(&meta.validators.etag)
        .bind(&meta.validators.last_modified)
        .bind(&at)
        .bind(&at)
        .bind(feed_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_fetch_failure(
        &self,
        feed_id: i64,
        error: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE feeds SET
                failure_count = failure_count + 1,
                last_error = ?,
                last_attempt_at = ?
             WHERE id = ?",
        )
        .bind(error)
        .bind(format_datetime(at))
        .bind(feed_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
