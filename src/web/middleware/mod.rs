//! Middleware for the HTTP API.

pub mod auth;
pub mod cors;
pub mod csrf;
pub mod rate_limit;
pub mod request_scope;
pub mod security;

pub use auth::{load_session, AuthUser};
pub use cors::create_cors_layer;
pub use csrf::csrf_protect;
pub use rate_limit::{client_key, client_rate_limit};
pub use request_scope::{request_scope, RequestScope};
pub use security::security_headers;
