//! CSRF protection middleware.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::auth::{is_safe_method, AuthSession, CSRF_HEADER};
use crate::web::error::ApiError;
use crate::web::state::AppState;

/// Require a valid `X-CSRF-Token` on mutating requests.
///
/// Must run after [`super::load_session`]. Safe methods pass through. A
/// mutating request without a session is rejected with 401, one with a
/// missing or wrong token with 403.
pub async fn csrf_protect(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if is_safe_method(request.method()) {
        return next.run(request).await;
    }

    let Some(auth) = request.extensions().get::<AuthSession>() else {
        return ApiError::unauthorized("Authentication required").into_response();
    };

    let provided = request
        .headers()
        .get(CSRF_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if provided.is_empty() || !state.csrf.validate(&auth.session.id, provided) {
        tracing::warn!(
            user_id = auth.user.id,
            method = %request.method(),
            path = %request.uri().path(),
            "CSRF token missing or invalid"
        );
        return ApiError::forbidden("Invalid CSRF token").into_response();
    }

    next.run(request).await
}
