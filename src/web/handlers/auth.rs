//! Authentication handlers.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};

use crate::web::dto::{ApiResponse, CallbackQuery, LoginResponse, SessionResponse, UserInfo};
use crate::web::error::ApiError;
use crate::web::middleware::AuthUser;
use crate::web::state::AppState;

fn session_cookie(state: &AppState, value: String) -> Cookie<'static> {
    Cookie::build((state.cookie.name.clone(), value))
        .path("/")
        .http_only(true)
        .secure(state.cookie.secure)
        .same_site(SameSite::Lax)
        .build()
}

/// GET /api/auth/login - Start an OAuth login.
pub async fn login(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<LoginResponse>>, ApiError> {
    let oauth_state = state.oauth_states.issue();
    let authorize_url = state.identity.authorize_url(&oauth_state)?;

    Ok(Json(ApiResponse::new(LoginResponse { authorize_url })))
}

/// GET /api/auth/callback - Finish an OAuth login.
pub async fn callback(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Query(query): Query<CallbackQuery>,
) -> Result<(CookieJar, Json<ApiResponse<SessionResponse>>), ApiError> {
    if !state.oauth_states.validate_and_consume(&query.state) {
        return Err(ApiError::forbidden("Invalid or expired login state"));
    }

    let identity = state.identity.exchange(&query.code).await?;
    let user = state.users.find_or_create(&identity.username).await?;
    let session = state.sessions.create(user.id).await?;

    tracing::info!(user_id = user.id, username = %user.username, "User logged in");

    let response = SessionResponse {
        user: UserInfo::from(&user),
        csrf_token: state.csrf.generate(&session.id),
    };
    let jar = jar.add(session_cookie(&state, session.id));

    Ok((jar, Json(ApiResponse::new(response))))
}

/// POST /api/auth/logout - End the current session.
pub async fn logout(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    AuthUser(auth): AuthUser,
) -> Result<(CookieJar, StatusCode), ApiError> {
    state.sessions.delete(&auth.session.id).await?;
    tracing::info!(user_id = auth.user.id, "User logged out");

    let jar = jar.remove(session_cookie(&state, String::new()));
    Ok((jar, StatusCode::NO_CONTENT))
}

/// GET /api/auth/me - Current user and CSRF token.
pub async fn me(
    State(state): State<Arc<AppState>>,
    AuthUser(auth): AuthUser,
) -> Json<ApiResponse<SessionResponse>> {
    Json(ApiResponse::new(SessionResponse {
        user: UserInfo::from(&auth.user),
        csrf_token: state.csrf.generate(&auth.session.id),
    }))
}
