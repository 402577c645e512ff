//! Per-request scope: request id span and request cache.

use axum::{
    async_trait,
    body::Body,
    extract::FromRequestParts,
    http::{request::Parts, Request},
    middleware::Next,
    response::Response,
};
use tracing::Instrument;

use crate::cache::RequestCache;
use crate::web::error::ApiError;

/// Give each request its own [`RequestCache`] and tracing span.
///
/// The cache is dropped with the request.
pub async fn request_scope(mut request: Request<Body>, next: Next) -> Response {
    let request_id = uuid::Uuid::new_v4();
    let span = tracing::info_span!(
        "request",
        %request_id,
        method = %request.method(),
        path = %request.uri().path(),
        user_id = tracing::field::Empty,
    );

    request.extensions_mut().insert(RequestCache::new());
    next.run(request).instrument(span).await
}

/// Extractor for the current request's cache.
#[derive(Clone)]
pub struct RequestScope(pub RequestCache);

#[async_trait]
impl<S> FromRequestParts<S> for RequestScope
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        // Routers built without the middleware still get a cache for this request
        let cache = parts
            .extensions
            .get::<RequestCache>()
            .cloned()
            .unwrap_or_default();
        Ok(RequestScope(cache))
    }
}
