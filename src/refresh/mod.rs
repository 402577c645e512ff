//! Background feed refresh.
//!
//! - [`FeedFetcher`] / [`HttpFeedFetcher`]: conditional HTTP fetch and parse
//! - [`FeedRefreshScheduler`]: staggered, domain-rate-limited refresh cycles

mod fetcher;
mod scheduler;

pub use fetcher::{
    parse_feed, validate_url, FeedFetcher, FetchOutcome, FetchedFeed, HttpFeedFetcher,
};
pub use scheduler::{CycleReport, FeedRefreshScheduler, SchedulerSettings};
