//! Refresh trigger for external schedulers.

use std::sync::Arc;

use axum::{extract::State, http::HeaderMap, http::StatusCode, Json};
use subtle::ConstantTimeEq;

use crate::web::dto::RefreshResponse;
use crate::web::error::ApiError;
use crate::web::state::AppState;

/// Header carrying the shared refresh secret.
pub const REFRESH_SECRET_HEADER: &str = "x-refresh-secret";

fn secret_matches(expected: &str, provided: &str) -> bool {
    expected.len() == provided.len() && bool::from(expected.as_bytes().ct_eq(provided.as_bytes()))
}

/// POST /api/internal/refresh - Start a refresh cycle.
///
/// Answers 202 whether or not a new cycle started; `started` is `false` when
/// one was already running.
pub async fn trigger_refresh(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<(StatusCode, Json<RefreshResponse>), ApiError> {
    if state.refresh_secret.is_empty() {
        return Err(ApiError::not_found("Not found"));
    }

    let provided = headers
        .get(REFRESH_SECRET_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if !secret_matches(&state.refresh_secret, provided) {
        tracing::warn!("Refresh trigger with invalid secret");
        return Err(ApiError::forbidden("Invalid refresh secret"));
    }

    let started = state.scheduler.trigger();
    tracing::info!(started, "Refresh triggered externally");

    Ok((StatusCode::ACCEPTED, Json(RefreshResponse { started })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_matches() {
        assert!(secret_matches("s3cret", "s3cret"));
        assert!(!secret_matches("s3cret", "s3cres"));
        assert!(!secret_matches("s3cret", "s3cret-longer"));
        assert!(!secret_matches("s3cret", ""));
    }
}
