//! HTTP API for feedgate.
//!
//! Cookie sessions, CSRF protection and per-client rate limiting in front of
//! the subscription, article and refresh endpoints.

pub mod dto;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod router;
pub mod server;
pub mod state;

pub use error::ApiError;
pub use router::create_router;
pub use server::WebServer;
pub use state::AppState;
