//! Authentication module for feedgate.
//!
//! This module provides durable sessions and their read-through cache,
//! OAuth login state tracking, CSRF tokens and the identity provider seam.

mod csrf;
mod identity;
mod oauth_state;
mod session;
mod session_cache;

pub use csrf::{is_safe_method, CsrfService, CSRF_HEADER};
pub use identity::{DevIdentityProvider, Identity, IdentityProvider};
pub use oauth_state::OAuthStateTracker;
pub use session::{
    generate_session_id, MemorySessionStore, Session, SessionStore, SqliteSessionStore,
};
pub use session_cache::{AuthSession, SessionCache};
