//! Error types for feedgate.

use std::time::Duration;

use thiserror::Error;

/// Common error type for feedgate.
#[derive(Error, Debug)]
pub enum FeedgateError {
    /// Database error.
    ///
    /// Errors from sqlx are converted into this variant.
    #[error("database error: {0}")]
    Database(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No valid session accompanies the request.
    #[error("authentication required")]
    AuthenticationRequired,

    /// Valid session, but the request is not allowed (bad CSRF token, wrong owner).
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Caller exceeded its request budget.
    #[error("rate limited, retry after {}ms", retry_after.as_millis())]
    RateLimited {
        /// Time until the next token becomes available.
        retry_after: Duration,
    },

    /// Resource not found.
    #[error("{0} not found")]
    NotFound(String),

    /// Fetching or parsing a third-party feed failed.
    #[error("upstream fetch failed: {0}")]
    UpstreamFetch(String),

    /// Validation error for user input.
    #[error("validation error: {0}")]
    Validation(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Any other internal failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for FeedgateError {
    fn from(e: sqlx::Error) -> Self {
        FeedgateError::Database(e.to_string())
    }
}

/// Result type alias for feedgate operations.
pub type Result<T> = std::result::Result<T, FeedgateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_error_display() {
        let err = FeedgateError::NotFound("feed".to_string());
        assert_eq!(err.to_string(), "feed not found");
    }

    #[test]
    fn test_forbidden_error_display() {
        let err = FeedgateError::Forbidden("invalid CSRF token".to_string());
        assert_eq!(err.to_string(), "forbidden: invalid CSRF token");
    }

    #[test]
    fn test_rate_limited_display() {
        let err = FeedgateError::RateLimited {
            retry_after: Duration::from_millis(500),
        };
        assert_eq!(err.to_string(), "rate limited, retry after 500ms");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: FeedgateError = io_err.into();
        assert!(matches!(err, FeedgateError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_upstream_error_display() {
        let err = FeedgateError::UpstreamFetch("HTTP error: 503".to_string());
        assert_eq!(err.to_string(), "upstream fetch failed: HTTP error: 503");
    }
}
