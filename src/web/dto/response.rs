//! Response DTOs for the HTTP API.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::cache::FeedCounts;
use crate::db::User;
use crate::feeds::{Article, Feed, Subscription};

/// Generic API response wrapper.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    /// Response data.
    pub data: T,
}

impl<T: Serialize> ApiResponse<T> {
    /// Create a new API response.
    pub fn new(data: T) -> Self {
        Self { data }
    }
}

/// User info.
#[derive(Debug, Serialize)]
pub struct UserInfo {
    /// User ID.
    pub id: i64,
    /// Username.
    pub username: String,
}

impl From<&User> for UserInfo {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
        }
    }
}

/// Login start response.
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    /// Provider URL to send the browser to.
    pub authorize_url: String,
}

/// Current session response.
#[derive(Debug, Serialize)]
pub struct SessionResponse {
    /// Logged-in user.
    pub user: UserInfo,
    /// Token to send as `X-CSRF-Token` on mutating requests.
    pub csrf_token: String,
}

/// A subscribed feed with the user's counts.
#[derive(Debug, Serialize)]
pub struct FeedResponse {
    /// Feed ID.
    pub id: i64,
    /// Feed URL.
    pub url: String,
    /// Feed title.
    pub title: Option<String>,
    /// Website URL.
    pub site_url: Option<String>,
    /// Last successful fetch.
    pub last_fetched_at: Option<String>,
    /// Last fetch error, while failing.
    pub last_error: Option<String>,
    /// Unread articles.
    pub unread: i64,
    /// All articles.
    pub total: i64,
}

impl FeedResponse {
    /// Combine a subscription with its counts.
    pub fn new(sub: Subscription, counts: Option<&FeedCounts>) -> Self {
        Self {
            id: sub.feed_id,
            url: sub.url,
            title: sub.title,
            site_url: sub.site_url,
            last_fetched_at: sub.last_fetched_at.map(|dt| dt.to_rfc3339()),
            last_error: sub.last_error,
            unread: counts.map_or(0, |c| c.unread),
            total: counts.map_or(0, |c| c.total),
        }
    }
}

impl From<Feed> for FeedResponse {
    fn from(feed: Feed) -> Self {
        Self {
            id: feed.id,
            url: feed.url,
            title: feed.title,
            site_url: feed.site_url,
            last_fetched_at: feed.last_fetched_at.map(|dt| dt.to_rfc3339()),
            last_error: feed.last_error,
            unread: 0,
            total: 0,
        }
    }
}

/// Subscription list response.
#[derive(Debug, Serialize)]
pub struct FeedListResponse {
    /// Subscribed feeds.
    pub feeds: Vec<FeedResponse>,
    /// Unread articles across all feeds.
    pub unread_total: i64,
}

/// Article response.
#[derive(Debug, Serialize)]
pub struct ArticleResponse {
    /// Article ID.
    pub id: i64,
    /// Owning feed.
    pub feed_id: i64,
    /// Title.
    pub title: String,
    /// Link.
    pub link: Option<String>,
    /// Summary.
    pub summary: Option<String>,
    /// Publication time.
    pub published_at: Option<DateTime<Utc>>,
    /// Read by the user.
    pub is_read: bool,
    /// Starred by the user.
    pub is_starred: bool,
}

impl From<Article> for ArticleResponse {
    fn from(a: Article) -> Self {
        Self {
            id: a.id,
            feed_id: a.feed_id,
            title: a.title,
            link: a.link,
            summary: a.summary,
            published_at: a.published_at,
            is_read: a.is_read,
            is_starred: a.is_starred,
        }
    }
}

/// Article state after a change.
#[derive(Debug, Serialize)]
pub struct ArticleStateResponse {
    /// Article ID.
    pub id: i64,
    /// Owning feed.
    pub feed_id: i64,
    /// Read state, when it was changed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_read: Option<bool>,
    /// Starred state, when it was changed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_starred: Option<bool>,
}

/// Bulk mark-read response.
#[derive(Debug, Serialize)]
pub struct MarkReadResponse {
    /// Articles whose state was written.
    pub updated: u64,
}

/// Refresh trigger response.
#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    /// Whether a new cycle was started.
    pub started: bool,
}
