//! Router configuration for the HTTP API.

use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{compression::CompressionLayer, trace::TraceLayer};

use super::handlers::{
    callback, list_articles, list_feeds, login, logout, mark_feed_read, me, set_read,
    set_starred, subscribe, trigger_refresh, unsubscribe,
};
use super::middleware::{
    client_rate_limit, create_cors_layer, csrf_protect, load_session, request_scope,
    security_headers,
};
use super::state::AppState;

/// Create the main API router.
///
/// Per request: request scope, client rate limit, then session lookup and
/// CSRF check before any user-facing handler.
pub fn create_router(app_state: Arc<AppState>, cors_origins: &[String]) -> Router {
    let auth_routes = Router::new()
        .route("/login", get(login))
        .route("/callback", get(callback))
        .route("/logout", post(logout))
        .route("/me", get(me));

    let user_routes = Router::new()
        .nest("/auth", auth_routes)
        .route("/feeds", get(list_feeds).post(subscribe))
        .route("/feeds/:id", delete(unsubscribe))
        .route("/feeds/:id/articles", get(list_articles))
        .route("/feeds/:id/mark-read", post(mark_feed_read))
        .route("/articles/:id/read", post(set_read))
        .route("/articles/:id/star", post(set_starred))
        // Layers run bottom-up: session first, then CSRF
        .route_layer(middleware::from_fn_with_state(
            app_state.clone(),
            csrf_protect,
        ))
        .route_layer(middleware::from_fn_with_state(
            app_state.clone(),
            load_session,
        ));

    // Authenticated by shared secret, not by session
    let internal_routes = Router::new().route("/refresh", post(trigger_refresh));

    let api_routes = Router::new()
        .merge(user_routes)
        .nest("/internal", internal_routes);

    Router::new()
        .nest("/api", api_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CompressionLayer::new())
                .layer(create_cors_layer(cors_origins))
                .layer(middleware::from_fn(security_headers))
                .layer(middleware::from_fn(request_scope))
                .layer(middleware::from_fn_with_state(
                    app_state.clone(),
                    client_rate_limit,
                )),
        )
        .merge(create_health_router::<Arc<AppState>>())
        .with_state(app_state)
}

/// Create a health check router.
///
/// Kept outside the rate limiter so platform probes are never throttled.
pub fn create_health_router<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new().route("/health", get(health_check))
}

/// Health check handler.
async fn health_check() -> &'static str {
    "OK"
}
