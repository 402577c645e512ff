//! Feed refresh cycles.
//!
//! A cycle lists every subscribed feed once, spreads fetch start times over
//! the stagger window, and fetches with bounded concurrency. Each fetch
//! first takes a token from the feed's domain bucket. Failures are recorded
//! against the feed and never abort the cycle.
//!
//! Two guards make duplicate triggering harmless: only one cycle runs at a
//! time, and a feed already being fetched is skipped.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tokio::time::{sleep, sleep_until, timeout, Instant};
use tracing::{debug, error, info, warn};

use super::fetcher::{FeedFetcher, FetchOutcome};
use crate::config::RefreshConfig;
use crate::datetime::{chrono_duration, Clock};
use crate::feeds::{Feed, FeedStore, FetchedMeta};
use crate::rate_limit::{domain_of, DomainRateLimiter, RateLimitResult};
use crate::tasks::{spawn_periodic, TaskHandle};

/// Scheduler tuning.
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    /// Window over which fetch start times are spread.
    pub stagger_window: Duration,
    /// Maximum fetches in progress at once.
    pub max_concurrency: usize,
    /// Longest wait for a domain token before deferring a feed.
    pub max_defer: Duration,
    /// Upper bound on a single fetch.
    pub fetch_timeout: Duration,
    /// Consecutive failures before a feed is backed off.
    pub failure_threshold: i64,
    /// Retry cadence for backed-off feeds.
    pub backoff: Duration,
}

impl SchedulerSettings {
    /// Settings from the `[refresh]` section.
    pub fn from_config(config: &RefreshConfig) -> Self {
        Self {
            stagger_window: Duration::from_secs(config.stagger_window_secs),
            max_concurrency: config.max_concurrency.max(1),
            max_defer: Duration::from_secs(config.max_defer_secs),
            // Outer bound slightly above the transport timeout
            fetch_timeout: Duration::from_secs(config.total_timeout_secs + 5),
            failure_threshold: config.failure_threshold,
            backoff: Duration::from_secs(config.backoff_secs),
        }
    }
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self::from_config(&RefreshConfig::default())
    }
}

/// Summary of one refresh cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Another cycle was running, so this one did nothing.
    pub already_running: bool,
    /// Distinct feeds listed.
    pub feeds: usize,
    /// Feeds a fetch was issued for.
    pub attempted: usize,
    /// Fetches that returned a new document.
    pub succeeded: usize,
    /// Fetches answered with 304 Not Modified.
    pub not_modified: usize,
    /// Fetches that failed or timed out.
    pub failed: usize,
    /// Feeds left for a later cycle because their domain had no token.
    pub deferred: usize,
    /// Feeds skipped while in failure backoff.
    pub skipped_backoff: usize,
    /// Feeds skipped because another fetch for them was in progress.
    pub skipped_in_flight: usize,
    /// Articles inserted.
    pub new_articles: u64,
    /// Set when the feed list could not be read.
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FeedOutcome {
    Fetched { new_articles: u64 },
    NotModified,
    Failed,
    Deferred,
    InFlight,
}

/// Releases the single-cycle guard.
struct CycleGuard<'a>(&'a AtomicBool);

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Releases a feed's in-flight marker.
struct InFlightGuard<'a> {
    feeds: &'a Mutex<HashSet<i64>>,
    feed_id: i64,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.feeds
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.feed_id);
    }
}

/// Orchestrates periodic refresh of all subscribed feeds.
pub struct FeedRefreshScheduler {
    store: Arc<dyn FeedStore>,
    fetcher: Arc<dyn FeedFetcher>,
    domains: Arc<DomainRateLimiter>,
    clock: Arc<dyn Clock>,
    settings: SchedulerSettings,
    running: AtomicBool,
    in_flight: Mutex<HashSet<i64>>,
}

impl FeedRefreshScheduler {
    /// Create a scheduler.
    pub fn new(
        store: Arc<dyn FeedStore>,
        fetcher: Arc<dyn FeedFetcher>,
        domains: Arc<DomainRateLimiter>,
        clock: Arc<dyn Clock>,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            store,
            fetcher,
            domains,
            clock,
            settings,
            running: AtomicBool::new(false),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Whether a cycle is in progress.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn try_begin_cycle(&self) -> Option<CycleGuard<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| CycleGuard(&self.running))
    }

    /// Run one cycle to completion.
    ///
    /// Returns immediately with `already_running` set if another cycle holds
    /// the guard.
    pub async fn run_cycle(&self) -> CycleReport {
        let Some(_guard) = self.try_begin_cycle() else {
            debug!("Refresh cycle already running");
            return CycleReport {
                already_running: true,
                ..CycleReport::default()
            };
        };

        self.refresh_all().await
    }

    /// Start a cycle in the background.
    ///
    /// Returns `false` without spawning when a cycle is already running.
    pub fn trigger(self: &Arc<Self>) -> bool {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Refresh cycle already running");
            return false;
        }

        let this = self.clone();
        tokio::spawn(async move {
            let _guard = CycleGuard(&this.running);
            this.refresh_all().await;
        });
        true
    }

    /// Run a cycle every `period`.
    pub fn start(self: &Arc<Self>, period: Duration) -> TaskHandle {
        let this = self.clone();
        spawn_periodic("feed-refresh", period, move || {
            let this = this.clone();
            async move {
                this.run_cycle().await;
            }
        })
    }

    async fn refresh_all(&self) -> CycleReport {
        let started = Instant::now();
        let mut report = CycleReport::default();

        let listed = match self.store.list_refreshable_feeds().await {
            Ok(feeds) => feeds,
            Err(e) => {
                error!(error = %e, "Failed to list feeds for refresh");
                report.error = Some(e.to_string());
                return report;
            }
        };

        let mut seen = HashSet::new();
        let distinct: Vec<Feed> = listed
            .into_iter()
            .filter(|feed| seen.insert(feed.id))
            .collect();
        report.feeds = distinct.len();

        let now = self.clock.now();
        let backoff = chrono_duration(self.settings.backoff);
        let (due, backed_off): (Vec<Feed>, Vec<Feed>) = distinct
            .into_iter()
            .partition(|feed| !feed.is_backed_off(now, self.settings.failure_threshold, backoff));
        report.skipped_backoff = backed_off.len();

        if due.is_empty() {
            debug!(feeds = report.feeds, "No feeds due for refresh");
            return report;
        }

        info!(
            feeds = due.len(),
            skipped_backoff = report.skipped_backoff,
            "Starting refresh cycle"
        );

        let total = due.len() as u32;
        let window = self.settings.stagger_window;
        let outcomes: Vec<FeedOutcome> = stream::iter(due.into_iter().enumerate())
            .map(|(i, feed)| {
                let start_at = started + window * (i as u32) / total;
                async move {
                    sleep_until(start_at).await;
                    self.refresh_feed(&feed).await
                }
            })
            .buffer_unordered(self.settings.max_concurrency)
            .collect()
            .await;

        for outcome in outcomes {
            match outcome {
                FeedOutcome::Fetched { new_articles } => {
                    report.attempted += 1;
                    report.succeeded += 1;
                    report.new_articles += new_articles;
                }
                FeedOutcome::NotModified => {
                    report.attempted += 1;
                    report.not_modified += 1;
                }
                FeedOutcome::Failed => {
                    report.attempted += 1;
                    report.failed += 1;
                }
                FeedOutcome::Deferred => report.deferred += 1,
                FeedOutcome::InFlight => report.skipped_in_flight += 1,
            }
        }

        info!(
            attempted = report.attempted,
            succeeded = report.succeeded,
            not_modified = report.not_modified,
            failed = report.failed,
            deferred = report.deferred,
            new_articles = report.new_articles,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Refresh cycle complete"
        );
        report
    }

    fn mark_in_flight(&self, feed_id: i64) -> Option<InFlightGuard<'_>> {
        let mut feeds = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if !feeds.insert(feed_id) {
            return None;
        }
        Some(InFlightGuard {
            feeds: &self.in_flight,
            feed_id,
        })
    }

    /// Wait for a domain token, up to the defer limit.
    async fn acquire_domain_token(&self, domain: &str) -> bool {
        let mut waited = Duration::ZERO;
        loop {
            match self.domains.try_acquire(domain) {
                RateLimitResult::Allowed => return true,
                RateLimitResult::Denied { retry_after } => {
                    if waited + retry_after > self.settings.max_defer {
                        return false;
                    }
                    sleep(retry_after).await;
                    waited += retry_after;
                }
            }
        }
    }

    async fn refresh_feed(&self, feed: &Feed) -> FeedOutcome {
        let Some(_in_flight) = self.mark_in_flight(feed.id) else {
            debug!(feed_id = feed.id, "Feed already being refreshed");
            return FeedOutcome::InFlight;
        };

        let Some(domain) = domain_of(&feed.url) else {
            self.record_failure(feed, "invalid feed URL").await;
            return FeedOutcome::Failed;
        };

        if !self.acquire_domain_token(&domain).await {
            debug!(feed_id = feed.id, domain = %domain, "Domain rate limited, deferring feed");
            return FeedOutcome::Deferred;
        }

        let fetched = timeout(
            self.settings.fetch_timeout,
            self.fetcher.fetch(&feed.url, &feed.validators),
        )
        .await;

        match fetched {
            Ok(Ok(FetchOutcome::NotModified)) => {
                if self.record_success(feed, &FetchedMeta::default()).await {
                    debug!(feed_id = feed.id, "Feed not modified");
                    FeedOutcome::NotModified
                } else {
                    FeedOutcome::Failed
                }
            }
            Ok(Ok(FetchOutcome::Fetched(document))) => {
                let new_articles = match self
                    .store
                    .insert_articles(feed.id, &document.articles)
                    .await
                {
                    Ok(n) => n,
                    Err(e) => {
                        error!(feed_id = feed.id, error = %e, "Failed to store articles");
                        return FeedOutcome::Failed;
                    }
                };
                if !self.record_success(feed, &document.meta).await {
                    return FeedOutcome::Failed;
                }
                if new_articles > 0 {
                    info!(feed_id = feed.id, new_articles, "Feed updated");
                }
                FeedOutcome::Fetched { new_articles }
            }
            Ok(Err(e)) => {
                self.record_failure(feed, &e.to_string()).await;
                FeedOutcome::Failed
            }
            Err(_) => {
                let message = format!(
                    "fetch timed out after {}s",
                    self.settings.fetch_timeout.as_secs()
                );
                self.record_failure(feed, &message).await;
                FeedOutcome::Failed
            }
        }
    }

    async fn record_success(&self, feed: &Feed, meta: &FetchedMeta) -> bool {
        match self
            .store
            .record_fetch_success(feed.id, meta, self.clock.now())
            .await
        {
            Ok(()) => true,
            Err(e) => {
                error!(feed_id = feed.id, error = %e, "Failed to record fetch");
                false
            }
        }
    }

    async fn record_failure(&self, feed: &Feed, message: &str) {
        let failures = feed.failure_count + 1;
        if failures >= self.settings.failure_threshold {
            warn!(
                feed_id = feed.id,
                url = %feed.url,
                failures,
                error = %message,
                "Feed fetch failed, backing off"
            );
        } else {
            warn!(feed_id = feed.id, url = %feed.url, error = %message, "Feed fetch failed");
        }

        if let Err(e) = self
            .store
            .record_fetch_failure(feed.id, message, self.clock.now())
            .await
        {
            error!(feed_id = feed.id, error = %e, "Failed to record fetch failure");
        }
    }
}

impl std::fmt::Debug for FeedRefreshScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedRefreshScheduler")
            .field("settings", &self.settings)
            .field("running", &self.is_running())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_from_config() {
        let config = RefreshConfig {
            stagger_window_secs: 120,
            max_concurrency: 0,
            total_timeout_secs: 30,
            ..RefreshConfig::default()
        };
        let settings = SchedulerSettings::from_config(&config);

        assert_eq!(settings.stagger_window, Duration::from_secs(120));
        assert_eq!(settings.max_concurrency, 1);
        assert_eq!(settings.fetch_timeout, Duration::from_secs(35));
    }

    #[test]
    fn test_cycle_guard_is_exclusive() {
        let running = AtomicBool::new(false);
        {
            assert!(running
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok());
            let _guard = CycleGuard(&running);
            assert!(running
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err());
        }
        assert!(!running.load(Ordering::Acquire));
    }
}
