//! Configuration module for feedgate.

use serde::Deserialize;
use std::path::Path;

use crate::{FeedgateError, Result};

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port number to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Deployment environment ("development" or "production").
    #[serde(default = "default_environment")]
    pub environment: String,
    /// Header injected by the hosting platform that carries the real client IP.
    ///
    /// Only set this when the platform strips any client-supplied copy of the
    /// header. When unset, the transport-layer peer address is used.
    #[serde(default)]
    pub trusted_client_ip_header: Option<String>,
    /// CORS allowed origins.
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_environment() -> String {
    "development".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            environment: default_environment(),
            trusted_client_ip_header: None,
            cors_origins: vec![],
        }
    }
}

impl ServerConfig {
    /// Whether the process runs in a hosted production context.
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,
    /// Durable session backend: "sqlite" or "memory".
    #[serde(default = "default_session_backend")]
    pub session_backend: String,
}

fn default_db_path() -> String {
    "data/feedgate.db".to_string()
}

fn default_session_backend() -> String {
    "sqlite".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            session_backend: default_session_backend(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Path to the log file.
    #[serde(default = "default_log_file")]
    pub file: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file() -> String {
    "logs/feedgate.log".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: default_log_file(),
        }
    }
}

/// Session configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Lifetime of a durable session in days.
    #[serde(default = "default_session_lifetime_days")]
    pub lifetime_days: u64,
    /// How long a cached session is trusted before re-reading the store.
    #[serde(default = "default_session_cache_ttl")]
    pub cache_ttl_secs: u64,
    /// Interval of the durable expired-session sweep.
    #[serde(default = "default_session_sweep_interval")]
    pub sweep_interval_secs: u64,
    /// Interval of the session cache sweep.
    #[serde(default = "default_session_cache_sweep_interval")]
    pub cache_sweep_interval_secs: u64,
    /// Name of the session cookie.
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,
    /// Whether the session cookie carries the Secure attribute.
    #[serde(default)]
    pub secure_cookie: bool,
}

fn default_session_lifetime_days() -> u64 {
    7
}

fn default_session_cache_ttl() -> u64 {
    300 // 5 minutes
}

fn default_session_sweep_interval() -> u64 {
    3600 // 1 hour
}

fn default_session_cache_sweep_interval() -> u64 {
    600 // 10 minutes
}

fn default_cookie_name() -> String {
    "feedgate_session".to_string()
}

impl SessionConfig {
    /// Cache TTL as a chrono duration.
    pub fn cache_ttl(&self) -> Result<chrono::Duration> {
        seconds("session.cache_ttl_secs", self.cache_ttl_secs)
    }

    /// Durable session lifetime.
    pub fn lifetime(&self) -> Result<chrono::Duration> {
        let secs = self.lifetime_days.checked_mul(86_400).ok_or_else(|| {
            FeedgateError::Config("session.lifetime_days is out of range".to_string())
        })?;
        seconds("session.lifetime_days", secs)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            lifetime_days: default_session_lifetime_days(),
            cache_ttl_secs: default_session_cache_ttl(),
            sweep_interval_secs: default_session_sweep_interval(),
            cache_sweep_interval_secs: default_session_cache_sweep_interval(),
            cookie_name: default_cookie_name(),
            secure_cookie: false,
        }
    }
}

/// CSRF configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CsrfConfig {
    /// Shared secret used to derive per-session tokens.
    ///
    /// When empty, a random secret is generated at startup.
    #[serde(default)]
    pub secret: String,
}

/// OAuth login configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthConfig {
    /// Maximum age of a login state before it is rejected.
    #[serde(default = "default_oauth_state_ttl")]
    pub state_ttl_secs: u64,
    /// Interval of the abandoned-state sweep.
    #[serde(default = "default_oauth_sweep_interval")]
    pub sweep_interval_secs: u64,
    /// Provider authorization endpoint.
    #[serde(default)]
    pub authorize_url: String,
    /// OAuth client identifier.
    #[serde(default)]
    pub client_id: String,
    /// Callback URL registered with the provider.
    #[serde(default)]
    pub redirect_uri: String,
    /// Accept the authorization code as the username (development only).
    #[serde(default)]
    pub dev_login: bool,
}

fn default_oauth_state_ttl() -> u64 {
    600 // 10 minutes
}

fn default_oauth_sweep_interval() -> u64 {
    300
}

impl OAuthConfig {
    /// Maximum login state age.
    pub fn state_ttl(&self) -> Result<chrono::Duration> {
        seconds("oauth.state_ttl_secs", self.state_ttl_secs)
    }
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            state_ttl_secs: default_oauth_state_ttl(),
            sweep_interval_secs: default_oauth_sweep_interval(),
            authorize_url: String::new(),
            client_id: String::new(),
            redirect_uri: String::new(),
            dev_login: false,
        }
    }
}

/// Inbound client rate limit configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Sustained requests per second per client.
    #[serde(default = "default_client_rps")]
    pub client_requests_per_sec: u32,
    /// Burst capacity per client.
    #[serde(default = "default_client_burst")]
    pub client_burst: u32,
    /// Buckets idle longer than this are evicted.
    #[serde(default = "default_idle_horizon")]
    pub idle_horizon_secs: u64,
    /// Interval of the idle bucket sweep.
    #[serde(default = "default_rate_limit_sweep_interval")]
    pub sweep_interval_secs: u64,
}

fn default_client_rps() -> u32 {
    10
}

fn default_client_burst() -> u32 {
    20
}

fn default_idle_horizon() -> u64 {
    3600 // 1 hour
}

fn default_rate_limit_sweep_interval() -> u64 {
    300 // 5 minutes
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            client_requests_per_sec: default_client_rps(),
            client_burst: default_client_burst(),
            idle_horizon_secs: default_idle_horizon(),
            sweep_interval_secs: default_rate_limit_sweep_interval(),
        }
    }
}

/// Feed refresh configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RefreshConfig {
    /// Whether the internal refresh loop runs.
    ///
    /// Disable when an external job calls the refresh endpoint instead.
    #[serde(default = "default_refresh_enabled")]
    pub enabled: bool,
    /// Interval between refresh cycles.
    #[serde(default = "default_refresh_interval")]
    pub interval_secs: u64,
    /// Window over which fetch start times are spread.
    #[serde(default = "default_stagger_window")]
    pub stagger_window_secs: u64,
    /// Sustained outbound fetches per minute per feed domain.
    #[serde(default = "default_domain_rpm")]
    pub domain_requests_per_minute: u32,
    /// Burst of outbound fetches per feed domain.
    #[serde(default = "default_domain_burst")]
    pub domain_burst: u32,
    /// Maximum feeds fetched concurrently.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Longest wait for a domain token within a cycle before deferring.
    #[serde(default = "default_max_defer")]
    pub max_defer_secs: u64,
    /// Connection timeout in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Read timeout in seconds.
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,
    /// Total request timeout in seconds.
    #[serde(default = "default_total_timeout")]
    pub total_timeout_secs: u64,
    /// Maximum number of redirects.
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,
    /// Maximum feed size in bytes.
    #[serde(default = "default_max_feed_size")]
    pub max_feed_size_bytes: u64,
    /// Maximum articles kept from a single fetch.
    #[serde(default = "default_max_items")]
    pub max_items_per_feed: usize,
    /// Consecutive failures before a feed is backed off.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: i64,
    /// Retry cadence for backed-off feeds.
    #[serde(default = "default_backoff")]
    pub backoff_secs: u64,
    /// Shared secret expected in the `X-Refresh-Secret` header.
    ///
    /// When empty, the refresh endpoint is disabled.
    #[serde(default)]
    pub trigger_secret: String,
}

fn default_refresh_enabled() -> bool {
    true
}

fn default_refresh_interval() -> u64 {
    900 // 15 minutes
}

fn default_stagger_window() -> u64 {
    300 // 5 minutes
}

fn default_domain_rpm() -> u32 {
    30
}

fn default_domain_burst() -> u32 {
    5
}

fn default_max_concurrency() -> usize {
    16
}

fn default_max_defer() -> u64 {
    10
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_read_timeout() -> u64 {
    20
}

fn default_total_timeout() -> u64 {
    30
}

fn default_max_redirects() -> usize {
    5
}

fn default_max_feed_size() -> u64 {
    5 * 1024 * 1024 // 5MB
}

fn default_max_items() -> usize {
    100
}

fn default_failure_threshold() -> i64 {
    5
}

fn default_backoff() -> u64 {
    6 * 3600 // 6 hours
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            enabled: default_refresh_enabled(),
            interval_secs: default_refresh_interval(),
            stagger_window_secs: default_stagger_window(),
            domain_requests_per_minute: default_domain_rpm(),
            domain_burst: default_domain_burst(),
            max_concurrency: default_max_concurrency(),
            max_defer_secs: default_max_defer(),
            connect_timeout_secs: default_connect_timeout(),
            read_timeout_secs: default_read_timeout(),
            total_timeout_secs: default_total_timeout(),
            max_redirects: default_max_redirects(),
            max_feed_size_bytes: default_max_feed_size(),
            max_items_per_feed: default_max_items(),
            failure_threshold: default_failure_threshold(),
            backoff_secs: default_backoff(),
            trigger_secret: String::new(),
        }
    }
}

/// Unread count cache configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CountsConfig {
    /// How long a user's cached counts are served.
    #[serde(default = "default_counts_ttl")]
    pub ttl_secs: u64,
    /// Interval of the expired-entry sweep.
    #[serde(default = "default_counts_sweep_interval")]
    pub sweep_interval_secs: u64,
}

fn default_counts_ttl() -> u64 {
    60
}

fn default_counts_sweep_interval() -> u64 {
    300
}

impl CountsConfig {
    /// Count cache TTL.
    pub fn ttl(&self) -> Result<chrono::Duration> {
        seconds("counts.ttl_secs", self.ttl_secs)
    }
}

impl Default for CountsConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_counts_ttl(),
            sweep_interval_secs: default_counts_sweep_interval(),
        }
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Session configuration.
    #[serde(default)]
    pub session: SessionConfig,
    /// CSRF configuration.
    #[serde(default)]
    pub csrf: CsrfConfig,
    /// OAuth configuration.
    #[serde(default)]
    pub oauth: OAuthConfig,
    /// Client rate limit configuration.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    /// Feed refresh configuration.
    #[serde(default)]
    pub refresh: RefreshConfig,
    /// Count cache configuration.
    #[serde(default)]
    pub counts: CountsConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(FeedgateError::Io)?;
        Self::parse(&content)
    }

    /// Load configuration from a TOML file and apply environment variable overrides.
    pub fn load_with_env<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| FeedgateError::Config(format!("config parse error: {e}")))
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Supported environment variables:
    /// - `FEEDGATE_CSRF_SECRET`: CSRF secret
    /// - `FEEDGATE_REFRESH_SECRET`: refresh endpoint secret
    /// - `FEEDGATE_ENV`: deployment environment
    pub fn apply_env_overrides(&mut self) {
        if let Some(secret) = non_empty_env("FEEDGATE_CSRF_SECRET") {
            self.csrf.secret = secret;
        }
        if let Some(secret) = non_empty_env("FEEDGATE_REFRESH_SECRET") {
            self.refresh.trigger_secret = secret;
        }
        if let Some(env) = non_empty_env("FEEDGATE_ENV") {
            self.server.environment = env;
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.rate_limit.client_requests_per_sec == 0 || self.rate_limit.client_burst == 0 {
            return Err(FeedgateError::Config(
                "rate_limit.client_requests_per_sec and client_burst must be positive".to_string(),
            ));
        }
        if self.refresh.domain_requests_per_minute == 0 || self.refresh.domain_burst == 0 {
            return Err(FeedgateError::Config(
                "refresh.domain_requests_per_minute and domain_burst must be positive".to_string(),
            ));
        }
        if self.refresh.max_concurrency == 0 {
            return Err(FeedgateError::Config(
                "refresh.max_concurrency must be positive".to_string(),
            ));
        }
        for (name, secs) in [
            ("session.sweep_interval_secs", self.session.sweep_interval_secs),
            (
                "session.cache_sweep_interval_secs",
                self.session.cache_sweep_interval_secs,
            ),
            ("oauth.sweep_interval_secs", self.oauth.sweep_interval_secs),
            ("rate_limit.sweep_interval_secs", self.rate_limit.sweep_interval_secs),
            ("counts.sweep_interval_secs", self.counts.sweep_interval_secs),
            ("refresh.interval_secs", self.refresh.interval_secs),
        ] {
            if secs == 0 {
                return Err(FeedgateError::Config(format!("{name} must be positive")));
            }
        }
        self.session.cache_ttl()?;
        self.session.lifetime()?;
        self.oauth.state_ttl()?;
        self.counts.ttl()?;
        match self.database.session_backend.as_str() {
            "sqlite" | "memory" => {}
            other => {
                return Err(FeedgateError::Config(format!(
                    "unknown session backend: {other}"
                )))
            }
        }
        Ok(())
    }
}

fn seconds(name: &str, secs: u64) -> Result<chrono::Duration> {
    i64::try_from(secs)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .ok_or_else(|| FeedgateError::Config(format!("{name} is out of range")))
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}
