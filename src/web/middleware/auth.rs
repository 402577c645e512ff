//! Session authentication middleware.
//!
//! [`load_session`] resolves the session cookie once per request and stores
//! the [`AuthSession`] in the request extensions, where [`AuthUser`] finds it.

use std::sync::Arc;

use axum::{
    async_trait,
    body::Body,
    extract::{FromRequestParts, State},
    http::{request::Parts, Request},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;

use crate::auth::AuthSession;
use crate::web::error::ApiError;
use crate::web::state::AppState;

/// Resolve the session cookie and attach the session to the request.
///
/// Requests without a valid session pass through unauthenticated; handlers
/// that need a user reject them through [`AuthUser`].
pub async fn load_session(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let session_id = CookieJar::from_headers(request.headers())
        .get(&state.cookie.name)
        .map(|cookie| cookie.value().to_string());

    if let Some(id) = session_id.filter(|id| !id.is_empty()) {
        match state.sessions.get(&id).await {
            Some(auth) => {
                tracing::Span::current().record("user_id", auth.user.id);
                request.extensions_mut().insert(auth);
            }
            None => tracing::debug!("Session cookie did not resolve to a session"),
        }
    }

    next.run(request).await
}

/// Extractor for authenticated users.
///
/// Rejects with 401 when the request carries no valid session.
#[derive(Debug, Clone)]
pub struct AuthUser(pub AuthSession);

impl AuthUser {
    /// Authenticated user's ID.
    pub fn user_id(&self) -> i64 {
        self.0.user.id
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthSession>()
            .cloned()
            .map(AuthUser)
            .ok_or_else(|| ApiError::unauthorized("Authentication required"))
    }
}
