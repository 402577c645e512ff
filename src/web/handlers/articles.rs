//! Article state handlers.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};

use crate::web::dto::{ApiResponse, ArticleStateResponse, ReadStateRequest, StarStateRequest};
use crate::web::error::ApiError;
use crate::web::middleware::AuthUser;
use crate::web::state::AppState;

/// POST /api/articles/:id/read - Set an article's read state.
///
/// The cached unread count is patched from the stored prior state, so a
/// repeated request does not count twice.
pub async fn set_read(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(article_id): Path<i64>,
    Json(req): Json<ReadStateRequest>,
) -> Result<Json<ApiResponse<ArticleStateResponse>>, ApiError> {
    let user_id = user.user_id();
    let transition = state
        .feeds
        .set_read(user_id, article_id, req.read)
        .await?
        .ok_or_else(|| ApiError::not_found("Article not found"))?;

    state.counts.update_count(
        user_id,
        transition.feed_id,
        transition.was_read,
        transition.now_read,
    );

    Ok(Json(ApiResponse::new(ArticleStateResponse {
        id: article_id,
        feed_id: transition.feed_id,
        is_read: Some(transition.now_read),
        is_starred: None,
    })))
}

/// POST /api/articles/:id/star - Set an article's starred state.
pub async fn set_starred(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(article_id): Path<i64>,
    Json(req): Json<StarStateRequest>,
) -> Result<Json<ApiResponse<ArticleStateResponse>>, ApiError> {
    let feed_id = state
        .feeds
        .set_starred(user.user_id(), article_id, req.starred)
        .await?
        .ok_or_else(|| ApiError::not_found("Article not found"))?;

    Ok(Json(ApiResponse::new(ArticleStateResponse {
        id: article_id,
        feed_id,
        is_read: None,
        is_starred: Some(req.starred),
    })))
}
