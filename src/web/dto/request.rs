//! Request DTOs for the HTTP API.

use serde::Deserialize;

/// Default number of articles returned per page.
pub const DEFAULT_ARTICLE_LIMIT: i64 = 50;

/// Largest page of articles a client may request.
pub const MAX_ARTICLE_LIMIT: i64 = 200;

/// OAuth callback query.
#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    /// State issued by the login endpoint.
    pub state: String,
    /// Authorization code from the provider.
    pub code: String,
}

/// Subscribe request.
#[derive(Debug, Deserialize)]
pub struct SubscribeRequest {
    /// Feed URL.
    pub url: String,
}

/// Article listing query.
#[derive(Debug, Default, Deserialize)]
pub struct ArticlesQuery {
    /// Maximum number of articles.
    #[serde(default)]
    pub limit: Option<i64>,
}

impl ArticlesQuery {
    /// Requested limit, clamped to the allowed range.
    pub fn limit(&self) -> i64 {
        self.limit
            .unwrap_or(DEFAULT_ARTICLE_LIMIT)
            .clamp(1, MAX_ARTICLE_LIMIT)
    }
}

/// Read state change.
#[derive(Debug, Deserialize)]
pub struct ReadStateRequest {
    /// New read state.
    pub read: bool,
}

/// Star state change.
#[derive(Debug, Deserialize)]
pub struct StarStateRequest {
    /// New starred state.
    pub starred: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_articles_query_limit() {
        assert_eq!(ArticlesQuery::default().limit(), DEFAULT_ARTICLE_LIMIT);
        assert_eq!(ArticlesQuery { limit: Some(0) }.limit(), 1);
        assert_eq!(ArticlesQuery { limit: Some(10_000) }.limit(), MAX_ARTICLE_LIMIT);
        assert_eq!(ArticlesQuery { limit: Some(20) }.limit(), 20);
    }
}
