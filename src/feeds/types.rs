//! Feed, subscription and article types.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

/// A feed shared by every user subscribed to its URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Feed {
    /// Feed ID.
    pub id: i64,
    /// Feed URL (unique).
    pub url: String,
    /// Title from the last successful fetch.
    pub title: Option<String>,
    /// Website the feed belongs to.
    pub site_url: Option<String>,
    /// Conditional-fetch validators.
    pub validators: FetchValidators,
    /// Last successful fetch.
    pub last_fetched_at: Option<DateTime<Utc>>,
    /// Last fetch attempt, successful or not.
    pub last_attempt_at: Option<DateTime<Utc>>,
    /// Consecutive failed fetches.
    pub failure_count: i64,
    /// Message of the last failure.
    pub last_error: Option<String>,
}

impl Feed {
    /// Whether the feed is in failure backoff at `now`.
    ///
    /// A feed with at least `threshold` consecutive failures is retried only
    /// once `backoff` has passed since its last attempt.
    pub fn is_backed_off(&self, now: DateTime<Utc>, threshold: i64, backoff: Duration) -> bool {
        if self.failure_count < threshold {
            return false;
        }
        match self.last_attempt_at {
            Some(last) => now < last + backoff,
            None => false,
        }
    }
}

/// HTTP validators remembered between fetches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchValidators {
    /// `ETag` of the last 200 response.
    pub etag: Option<String>,
    /// `Last-Modified` of the last 200 response.
    pub last_modified: Option<String>,
}

impl FetchValidators {
    /// Whether no validator is known.
    pub fn is_empty(&self) -> bool {
        self.etag.is_none() && self.last_modified.is_none()
    }
}

/// Metadata written back after a successful fetch.
#[derive(Debug, Clone, Default)]
pub struct FetchedMeta {
    /// Feed title, if the document had one.
    pub title: Option<String>,
    /// Site URL, if the document had one.
    pub site_url: Option<String>,
    /// New validators; `None` fields keep the stored values.
    pub validators: FetchValidators,
}

/// A user's subscription as listed to them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Subscription {
    /// Subscribed feed.
    pub feed_id: i64,
    /// Feed URL.
    pub url: String,
    /// Feed title, once known.
    pub title: Option<String>,
    /// Website URL, once known.
    pub site_url: Option<String>,
    /// Last successful fetch.
    pub last_fetched_at: Option<DateTime<Utc>>,
    /// Message of the last failure, if the feed is failing.
    pub last_error: Option<String>,
}

/// An article discovered by a fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewArticle {
    /// Publisher-assigned identifier, unique within its feed.
    pub guid: String,
    /// Article title.
    pub title: String,
    /// Article link.
    pub link: Option<String>,
    /// Plain-text summary.
    pub summary: Option<String>,
    /// Publication time.
    pub published_at: Option<DateTime<Utc>>,
}

impl NewArticle {
    /// Create an article with a guid and title.
    pub fn new(guid: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            guid: guid.into(),
            title: title.into(),
            link: None,
            summary: None,
            published_at: None,
        }
    }

    /// Set the link.
    pub fn with_link(mut self, link: impl Into<String>) -> Self {
        self.link = Some(link.into());
        self
    }

    /// Set the summary.
    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    /// Set the publication time.
    pub fn with_published_at(mut self, published_at: DateTime<Utc>) -> Self {
        self.published_at = Some(published_at);
        self
    }
}

/// An article with the requesting user's state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Article {
    /// Article ID.
    pub id: i64,
    /// Owning feed.
    pub feed_id: i64,
    /// Article title.
    pub title: String,
    /// Article link.
    pub link: Option<String>,
    /// Plain-text summary.
    pub summary: Option<String>,
    /// Publication time.
    pub published_at: Option<DateTime<Utc>>,
    /// Whether the user has read it.
    pub is_read: bool,
    /// Whether the user has starred it.
    pub is_starred: bool,
}

/// Outcome of a read-state write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadTransition {
    /// Feed the article belongs to.
    pub feed_id: i64,
    /// Read state before the write.
    pub was_read: bool,
    /// Read state after the write.
    pub now_read: bool,
}
