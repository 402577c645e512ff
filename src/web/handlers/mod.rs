//! API handlers.

pub mod articles;
pub mod auth;
pub mod feeds;
pub mod refresh;

pub use articles::*;
pub use auth::*;
pub use feeds::*;
pub use refresh::*;
