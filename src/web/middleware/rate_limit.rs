//! Rate limiting middleware.

use std::{net::SocketAddr, sync::Arc};

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::rate_limit::RateLimitResult;
use crate::web::error::ApiError;
use crate::web::state::AppState;

/// Key used when no client identity can be determined.
const UNKNOWN_CLIENT: &str = "unknown";

/// Extract the client identity used as the rate limit key.
///
/// Only the platform header named in configuration is trusted. Otherwise
/// the transport peer address is used; `X-Forwarded-For` and similar
/// client-supplied headers are ignored.
pub fn client_key(req: &Request<Body>, trusted_header: Option<&str>) -> String {
    if let Some(header) = trusted_header {
        if let Some(ip) = req
            .headers()
            .get(header)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
        {
            return ip.to_string();
        }
    }

    if let Some(ConnectInfo(addr)) = req.extensions().get::<ConnectInfo<SocketAddr>>() {
        return addr.ip().to_string();
    }

    UNKNOWN_CLIENT.to_string()
}

/// Per-client rate limiting for the whole API.
pub async fn client_rate_limit(
    State(state): State<Arc<AppState>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let client = client_key(&req, state.client_ip_header.as_deref());

    if let RateLimitResult::Denied { retry_after } = state.client_limiter.check(&client) {
        tracing::warn!(
            client = %client,
            retry_after_ms = retry_after.as_millis() as u64,
            "Client rate limit exceeded"
        );
        return ApiError::rate_limited(retry_after).into_response();
    }

    next.run(req).await
}
