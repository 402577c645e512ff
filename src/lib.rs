//! feedgate - multi-tenant feed polling service
//!
//! Session caching, OAuth state tracking, CSRF protection, inbound and
//! outbound rate limiting, feed refresh scheduling and unread count caching
//! behind an HTTP API.

pub mod auth;
pub mod cache;
pub mod config;
pub mod datetime;
pub mod db;
pub mod error;
pub mod feeds;
pub mod logging;
pub mod rate_limit;
pub mod refresh;
pub mod tasks;
pub mod web;

pub use auth::{
    AuthSession, CsrfService, DevIdentityProvider, Identity, IdentityProvider,
    MemorySessionStore, OAuthStateTracker, Session, SessionCache, SessionStore,
    SqliteSessionStore,
};
pub use cache::{CountMap, FeedCounts, RequestCache, UnreadCountCache};
pub use config::Config;
pub use datetime::{Clock, ManualClock, SystemClock};
pub use db::{Database, SqliteUserStore, User, UserStore};
pub use error::{FeedgateError, Result};
pub use feeds::{FeedStore, SqliteFeedStore};
pub use rate_limit::{ClientRateLimiter, DomainRateLimiter, KeyedRateLimiter, RateLimitResult};
pub use refresh::{
    CycleReport, FeedFetcher, FeedRefreshScheduler, FetchOutcome, HttpFeedFetcher,
    SchedulerSettings,
};
pub use tasks::{spawn_periodic, BackgroundTasks, TaskHandle};
pub use web::{create_router, ApiError, AppState, WebServer};
