//! Subscription and article listing handlers.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};

use crate::cache::{CountMap, RequestCache};
use crate::feeds::Subscription;
use crate::refresh::validate_url;
use crate::web::dto::{
    ApiResponse, ArticleResponse, ArticlesQuery, FeedListResponse, FeedResponse,
    MarkReadResponse, SubscribeRequest,
};
use crate::web::error::ApiError;
use crate::web::middleware::{AuthUser, RequestScope};
use crate::web::state::AppState;

/// Request cache kind for a user's subscriptions.
const SUBSCRIPTIONS: &str = "subscriptions";
/// Request cache kind for a user's counts.
const COUNTS: &str = "counts";

/// The user's subscriptions, loaded at most once per request.
async fn subscriptions(
    state: &AppState,
    scope: &RequestCache,
    user_id: i64,
) -> Result<Arc<Vec<Subscription>>, ApiError> {
    let feeds = state.feeds.clone();
    let subs = scope
        .get_or_load(SUBSCRIPTIONS, user_id, || async move {
            feeds.list_subscriptions(user_id).await
        })
        .await?;
    Ok(subs)
}

/// The user's counts, from the count cache or recomputed, at most once per request.
async fn counts(
    state: &AppState,
    scope: &RequestCache,
    user_id: i64,
) -> Result<Arc<CountMap>, ApiError> {
    let feeds = state.feeds.clone();
    let cache = state.counts.clone();
    let counts = scope
        .get_or_load(COUNTS, user_id, || async move {
            cache
                .get_or_recompute(user_id, || async move { feeds.counts_for_user(user_id).await })
                .await
        })
        .await?;
    Ok(counts)
}

async fn require_subscription(
    state: &AppState,
    scope: &RequestCache,
    user_id: i64,
    feed_id: i64,
) -> Result<(), ApiError> {
    let subs = subscriptions(state, scope, user_id).await?;
    if subs.iter().any(|s| s.feed_id == feed_id) {
        Ok(())
    } else {
        Err(ApiError::not_found("Feed not found"))
    }
}

/// GET /api/feeds - List subscriptions with counts.
pub async fn list_feeds(
    State(state): State<Arc<AppState>>,
    RequestScope(scope): RequestScope,
    user: AuthUser,
) -> Result<Json<ApiResponse<FeedListResponse>>, ApiError> {
    let user_id = user.user_id();
    let subs = subscriptions(&state, &scope, user_id).await?;
    let counts = counts(&state, &scope, user_id).await?;

    let feeds: Vec<FeedResponse> = subs
        .iter()
        .cloned()
        .map(|sub| {
            let feed_counts = counts.get(&sub.feed_id);
            FeedResponse::new(sub, feed_counts)
        })
        .collect();
    let unread_total = feeds.iter().map(|f| f.unread).sum();

    Ok(Json(ApiResponse::new(FeedListResponse {
        feeds,
        unread_total,
    })))
}

/// POST /api/feeds - Subscribe to a feed URL.
pub async fn subscribe(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(req): Json<SubscribeRequest>,
) -> Result<(StatusCode, Json<ApiResponse<FeedResponse>>), ApiError> {
    let url = req.url.trim();
    validate_url(url)?;

    let user_id = user.user_id();
    let feed = state.feeds.subscribe(user_id, url).await?;
    state.counts.invalidate(user_id);

    tracing::info!(user_id, feed_id = feed.id, url = %feed.url, "Subscribed to feed");
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::new(FeedResponse::from(feed))),
    ))
}

/// DELETE /api/feeds/:id - Unsubscribe.
pub async fn unsubscribe(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(feed_id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    let user_id = user.user_id();
    if !state.feeds.unsubscribe(user_id, feed_id).await? {
        return Err(ApiError::not_found("Feed not found"));
    }
    state.counts.invalidate(user_id);

    tracing::info!(user_id, feed_id, "Unsubscribed from feed");
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/feeds/:id/articles - List a feed's articles.
pub async fn list_articles(
    State(state): State<Arc<AppState>>,
    RequestScope(scope): RequestScope,
    user: AuthUser,
    Path(feed_id): Path<i64>,
    Query(query): Query<ArticlesQuery>,
) -> Result<Json<ApiResponse<Vec<ArticleResponse>>>, ApiError> {
    let user_id = user.user_id();
    require_subscription(&state, &scope, user_id, feed_id).await?;

    let articles = state
        .feeds
        .list_articles(user_id, feed_id, query.limit())
        .await?;

    Ok(Json(ApiResponse::new(
        articles.into_iter().map(ArticleResponse::from).collect(),
    )))
}

/// POST /api/feeds/:id/mark-read - Mark every article of a feed read.
pub async fn mark_feed_read(
    State(state): State<Arc<AppState>>,
    RequestScope(scope): RequestScope,
    user: AuthUser,
    Path(feed_id): Path<i64>,
) -> Result<Json<ApiResponse<MarkReadResponse>>, ApiError> {
    let user_id = user.user_id();
    require_subscription(&state, &scope, user_id, feed_id).await?;

    let updated = state.feeds.mark_feed_read(user_id, feed_id).await?;
    // Bulk writes bypass incremental patching
    state.counts.invalidate(user_id);

    Ok(Json(ApiResponse::new(MarkReadResponse { updated })))
}
