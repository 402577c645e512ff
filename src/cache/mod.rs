//! In-memory caches for feedgate.
//!
//! - [`UnreadCountCache`]: per-user feed counts shared across requests
//! - [`RequestCache`]: memoization scoped to a single request

mod request_scoped;
mod unread_counts;

pub use request_scoped::RequestCache;
pub use unread_counts::{CountMap, FeedCounts, UnreadCountCache};
