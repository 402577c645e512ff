//! Keyed token-bucket rate limiting.
//!
//! [`KeyedRateLimiter`] keeps one governor bucket per key, created lazily on
//! first sight and evicted once idle past a horizon. Two front-ends share it:
//!
//! - [`ClientRateLimiter`] gates inbound requests per client identity.
//! - [`DomainRateLimiter`] gates outbound feed fetches per source host.

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use governor::{
    clock::{Clock, DefaultClock},
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use tracing::debug;

use crate::config::{RateLimitConfig, RefreshConfig};

/// Single-key governor limiter.
pub type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Result of a rate limit check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitResult {
    /// A token was consumed.
    Allowed,
    /// No token available.
    Denied {
        /// Time until the next token becomes available.
        retry_after: Duration,
    },
}

impl RateLimitResult {
    /// Check if the action is allowed.
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateLimitResult::Allowed)
    }
}

#[derive(Debug)]
struct Bucket {
    limiter: DirectLimiter,
    /// Milliseconds since the owning limiter's base instant.
    last_access_ms: AtomicU64,
}

/// Token buckets keyed by string.
#[derive(Debug)]
pub struct KeyedRateLimiter {
    name: &'static str,
    quota: Quota,
    idle_horizon: Duration,
    base: Instant,
    clock: DefaultClock,
    buckets: RwLock<HashMap<String, Arc<Bucket>>>,
}

fn non_zero(n: u32) -> NonZeroU32 {
    NonZeroU32::new(n).unwrap_or(NonZeroU32::MIN)
}

impl KeyedRateLimiter {
    /// Create a limiter with the given quota.
    pub fn new(name: &'static str, quota: Quota, idle_horizon: Duration) -> Self {
        Self {
            name,
            quota,
            idle_horizon,
            base: Instant::now(),
            clock: DefaultClock::default(),
            buckets: RwLock::new(HashMap::new()),
        }
    }

    /// Sustained `per_second` tokens per second with a burst of `burst`.
    pub fn per_second(name: &'static str, per_second: u32, burst: u32, idle: Duration) -> Self {
        let quota = Quota::per_second(non_zero(per_second)).allow_burst(non_zero(burst));
        Self::new(name, quota, idle)
    }

    /// Sustained `per_minute` tokens per minute with a burst of `burst`.
    pub fn per_minute(name: &'static str, per_minute: u32, burst: u32, idle: Duration) -> Self {
        let quota = Quota::per_minute(non_zero(per_minute)).allow_burst(non_zero(burst));
        Self::new(name, quota, idle)
    }

    fn elapsed_ms(&self) -> u64 {
        self.base.elapsed().as_millis() as u64
    }

    fn bucket(&self, key: &str) -> Arc<Bucket> {
        {
            let buckets = self.buckets.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(bucket) = buckets.get(key) {
                return bucket.clone();
            }
        }

        let mut buckets = self.buckets.write().unwrap_or_else(PoisonError::into_inner);

        // Double-check after acquiring write lock
        if let Some(bucket) = buckets.get(key) {
            return bucket.clone();
        }

        let bucket = Arc::new(Bucket {
            limiter: RateLimiter::direct(self.quota),
            last_access_ms: AtomicU64::new(self.elapsed_ms()),
        });
        buckets.insert(key.to_string(), bucket.clone());
        debug!(limiter = self.name, key = %key, "Created rate limit bucket");
        bucket
    }

    /// Try to consume one token for `key`.
    ///
    /// A denial leaves the bucket untouched apart from its access time.
    pub fn check(&self, key: &str) -> RateLimitResult {
        let bucket = self.bucket(key);
        bucket
            .last_access_ms
            .store(self.elapsed_ms(), Ordering::Relaxed);

        match bucket.limiter.check() {
            Ok(()) => RateLimitResult::Allowed,
            Err(not_until) => RateLimitResult::Denied {
                retry_after: not_until.wait_time_from(self.clock.now()),
            },
        }
    }

    /// Remove buckets idle longer than the horizon.
    ///
    /// Buckets referenced by an in-flight check are kept regardless of age.
    pub fn sweep_idle(&self) -> usize {
        let now_ms = self.elapsed_ms();
        let horizon_ms = self.idle_horizon.as_millis() as u64;

        let mut buckets = self.buckets.write().unwrap_or_else(PoisonError::into_inner);
        let before = buckets.len();
        buckets.retain(|_, bucket| {
            let idle_ms = now_ms.saturating_sub(bucket.last_access_ms.load(Ordering::Relaxed));
            Arc::strong_count(bucket) > 1 || idle_ms < horizon_ms
        });
        let removed = before - buckets.len();

        if removed > 0 {
            debug!(limiter = self.name, removed, "Evicted idle rate limit buckets");
        }
        removed
    }

    /// Number of live buckets.
    pub fn len(&self) -> usize {
        self.buckets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no bucket exists.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Inbound admission control keyed by client identity.
#[derive(Debug)]
pub struct ClientRateLimiter {
    buckets: KeyedRateLimiter,
}

impl ClientRateLimiter {
    /// `per_second` sustained requests with a burst of `burst`.
    pub fn new(per_second: u32, burst: u32, idle_horizon: Duration) -> Self {
        Self {
            buckets: KeyedRateLimiter::per_second("client", per_second, burst, idle_horizon),
        }
    }

    /// Build from the `[rate_limit]` section.
    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(
            config.client_requests_per_sec,
            config.client_burst,
            Duration::from_secs(config.idle_horizon_secs),
        )
    }

    /// Admit one request from `client`, consuming a token.
    pub fn admit(&self, client: &str) -> bool {
        self.check(client).is_allowed()
    }

    /// Like [`admit`](Self::admit), reporting the retry delay on denial.
    pub fn check(&self, client: &str) -> RateLimitResult {
        self.buckets.check(client)
    }

    /// Evict idle client buckets.
    pub fn sweep_idle(&self) -> usize {
        self.buckets.sweep_idle()
    }

    /// Number of tracked clients.
    pub fn tracked_clients(&self) -> usize {
        self.buckets.len()
    }
}

/// Outbound fetch gate keyed by feed source host.
#[derive(Debug)]
pub struct DomainRateLimiter {
    buckets: KeyedRateLimiter,
}

impl DomainRateLimiter {
    /// `per_minute` sustained fetches with a burst of `burst` per domain.
    pub fn new(per_minute: u32, burst: u32, idle_horizon: Duration) -> Self {
        Self {
            buckets: KeyedRateLimiter::per_minute("domain", per_minute, burst, idle_horizon),
        }
    }

    /// Build from the `[refresh]` section.
    pub fn from_config(config: &RefreshConfig) -> Self {
        // Keep a domain's bucket across at least a couple of cycles.
        let idle = Duration::from_secs(config.interval_secs.saturating_mul(2).max(3600));
        Self::new(config.domain_requests_per_minute, config.domain_burst, idle)
    }

    /// Try to take a fetch token for `domain` without waiting.
    pub fn try_acquire(&self, domain: &str) -> RateLimitResult {
        self.buckets.check(domain)
    }

    /// Evict idle domain buckets.
    pub fn sweep_idle(&self) -> usize {
        self.buckets.sweep_idle()
    }

    /// Number of tracked domains.
    pub fn tracked_domains(&self) -> usize {
        self.buckets.len()
    }
}

/// Rate-limit key for a feed URL: its lowercased host.
pub fn domain_of(feed_url: &str) -> Option<String> {
    url::Url::parse(feed_url)
        .ok()?
        .host_str()
        .map(|h| h.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn test_burst_then_reject() {
        let limiter = ClientRateLimiter::new(2, 2, Duration::from_secs(3600));

        assert!(limiter.admit("203.0.113.5"));
        assert!(limiter.admit("203.0.113.5"));
        assert!(!limiter.admit("203.0.113.5"));
    }

    #[test]
    fn test_refill_after_one_period() {
        let limiter = ClientRateLimiter::new(2, 2, Duration::from_secs(3600));

        let results: Vec<bool> = (0..3).map(|_| limiter.admit("203.0.113.5")).collect();
        assert_eq!(results, vec![true, true, false]);

        sleep(Duration::from_millis(600));
        assert!(limiter.admit("203.0.113.5"));
    }

    #[test]
    fn test_denied_reports_retry_after() {
        let limiter = ClientRateLimiter::new(1, 1, Duration::from_secs(3600));

        assert!(limiter.check("10.0.0.1").is_allowed());
        match limiter.check("10.0.0.1") {
            RateLimitResult::Denied { retry_after } => {
                assert!(retry_after > Duration::ZERO);
                assert!(retry_after <= Duration::from_secs(1));
            }
            RateLimitResult::Allowed => panic!("Expected Denied"),
        }
    }

    #[test]
    fn test_keys_are_independent() {
        let limiter = ClientRateLimiter::new(1, 3, Duration::from_secs(3600));

        for _ in 0..3 {
            assert!(limiter.admit("198.51.100.1"));
        }
        assert!(!limiter.admit("198.51.100.1"));

        // Exhausting one key leaves another untouched
        for _ in 0..3 {
            assert!(limiter.admit("198.51.100.2"));
        }
        assert_eq!(limiter.tracked_clients(), 2);
    }

    #[test]
    fn test_buckets_created_lazily() {
        let limiter = ClientRateLimiter::new(5, 5, Duration::from_secs(3600));
        assert_eq!(limiter.tracked_clients(), 0);

        limiter.admit("a");
        limiter.admit("a");
        limiter.admit("b");
        assert_eq!(limiter.tracked_clients(), 2);
    }

    #[test]
    fn test_sweep_evicts_only_idle_buckets() {
        let limiter = KeyedRateLimiter::per_second("test", 5, 5, Duration::from_millis(100));

        limiter.check("stale");
        sleep(Duration::from_millis(150));
        limiter.check("fresh");

        assert_eq!(limiter.sweep_idle(), 1);
        assert_eq!(limiter.len(), 1);

        // The surviving bucket keeps its consumed tokens
        for _ in 0..4 {
            assert!(limiter.check("fresh").is_allowed());
        }
        assert!(!limiter.check("fresh").is_allowed());
    }

    #[test]
    fn test_sweep_keeps_bucket_in_use() {
        let limiter = KeyedRateLimiter::per_second("test", 5, 5, Duration::from_millis(10));

        let held = limiter.bucket("busy");
        sleep(Duration::from_millis(30));

        assert_eq!(limiter.sweep_idle(), 0);
        drop(held);
        assert_eq!(limiter.sweep_idle(), 1);
        assert!(limiter.is_empty());
    }

    #[test]
    fn test_domain_limiter_per_host() {
        let limiter = DomainRateLimiter::new(60, 2, Duration::from_secs(3600));

        assert!(limiter.try_acquire("example.com").is_allowed());
        assert!(limiter.try_acquire("example.com").is_allowed());
        assert!(!limiter.try_acquire("example.com").is_allowed());
        assert!(limiter.try_acquire("other.org").is_allowed());
        assert_eq!(limiter.tracked_domains(), 2);
    }

    #[test]
    fn test_domain_of() {
        assert_eq!(
            domain_of("https://Blog.Example.com/feed.xml").as_deref(),
            Some("blog.example.com")
        );
        assert_eq!(
            domain_of("http://example.com:8080/rss").as_deref(),
            Some("example.com")
        );
        assert!(domain_of("not a url").is_none());
    }
}
