//! Application state shared across handlers and middleware.

use std::sync::Arc;
use std::time::Duration;

use crate::auth::{
    CsrfService, DevIdentityProvider, IdentityProvider, MemorySessionStore, OAuthStateTracker,
    SessionCache, SessionStore, SqliteSessionStore,
};
use crate::cache::UnreadCountCache;
use crate::config::Config;
use crate::datetime::Clock;
use crate::db::{Database, SqliteUserStore, UserStore};
use crate::feeds::{FeedStore, SqliteFeedStore};
use crate::rate_limit::{ClientRateLimiter, DomainRateLimiter};
use crate::refresh::{FeedFetcher, FeedRefreshScheduler, SchedulerSettings};
use crate::tasks::{spawn_periodic, BackgroundTasks};
use crate::Result;

/// Session cookie settings.
#[derive(Debug, Clone)]
pub struct CookieSettings {
    /// Cookie name.
    pub name: String,
    /// Whether the cookie carries the Secure attribute.
    pub secure: bool,
}

/// Application state shared across handlers.
///
/// Every service is built once at startup and shared by reference.
#[derive(Clone)]
pub struct AppState {
    /// Session cache over the durable session store.
    pub sessions: Arc<SessionCache>,
    /// User store.
    pub users: Arc<dyn UserStore>,
    /// CSRF token service.
    pub csrf: Arc<CsrfService>,
    /// Pending OAuth login states.
    pub oauth_states: Arc<OAuthStateTracker>,
    /// Identity provider for the login callback.
    pub identity: Arc<dyn IdentityProvider>,
    /// Inbound per-client rate limiter.
    pub client_limiter: Arc<ClientRateLimiter>,
    /// Outbound per-domain rate limiter.
    pub domain_limiter: Arc<DomainRateLimiter>,
    /// Feed and article store.
    pub feeds: Arc<dyn FeedStore>,
    /// Per-user unread counts.
    pub counts: Arc<UnreadCountCache>,
    /// Feed refresh scheduler.
    pub scheduler: Arc<FeedRefreshScheduler>,
    /// Session cookie settings.
    pub cookie: CookieSettings,
    /// Header carrying the real client IP, when the platform injects one.
    pub client_ip_header: Option<String>,
    /// Secret expected by the refresh endpoint. Empty disables it.
    pub refresh_secret: String,
}

impl AppState {
    /// Build every service from configuration.
    pub fn build(
        config: &Config,
        db: &Database,
        clock: Arc<dyn Clock>,
        fetcher: Arc<dyn FeedFetcher>,
    ) -> Result<Self> {
        let session_store: Arc<dyn SessionStore> = match config.database.session_backend.as_str()
        {
            "memory" => Arc::new(MemorySessionStore::new()),
            _ => Arc::new(SqliteSessionStore::new(db.pool().clone())),
        };
        let users: Arc<dyn UserStore> = Arc::new(SqliteUserStore::new(db.pool().clone()));
        let feeds: Arc<dyn FeedStore> = Arc::new(SqliteFeedStore::new(db.pool().clone()));

        let sessions = Arc::new(SessionCache::from_config(
            &config.session,
            session_store,
            users.clone(),
            clock.clone(),
        )?);
        let csrf = Arc::new(CsrfService::from_config(
            &config.csrf.secret,
            config.server.is_production(),
        )?);
        let oauth_states = Arc::new(OAuthStateTracker::new(
            config.oauth.state_ttl()?,
            clock.clone(),
        ));
        let identity: Arc<dyn IdentityProvider> =
            Arc::new(DevIdentityProvider::from_config(&config.oauth));

        let domain_limiter = Arc::new(DomainRateLimiter::from_config(&config.refresh));
        let scheduler = Arc::new(FeedRefreshScheduler::new(
            feeds.clone(),
            fetcher,
            domain_limiter.clone(),
            clock.clone(),
            SchedulerSettings::from_config(&config.refresh),
        ));

        Ok(Self {
            sessions,
            users,
            csrf,
            oauth_states,
            identity,
            client_limiter: Arc::new(ClientRateLimiter::from_config(&config.rate_limit)),
            domain_limiter,
            feeds,
            counts: Arc::new(UnreadCountCache::from_config(&config.counts, clock)?),
            scheduler,
            cookie: CookieSettings {
                name: config.session.cookie_name.clone(),
                secure: config.session.secure_cookie,
            },
            client_ip_header: config
                .server
                .trusted_client_ip_header
                .as_ref()
                .map(|h| h.to_ascii_lowercase()),
            refresh_secret: config.refresh.trigger_secret.clone(),
        })
    }

    /// Replace the identity provider.
    pub fn with_identity_provider(mut self, identity: Arc<dyn IdentityProvider>) -> Self {
        self.identity = identity;
        self
    }

    /// Start the periodic sweeps and, when enabled, the refresh loop.
    pub fn start_background_tasks(&self, config: &Config) -> BackgroundTasks {
        let mut tasks = BackgroundTasks::new();

        let sessions = self.sessions.clone();
        tasks.push(spawn_periodic(
            "session-sweep",
            Duration::from_secs(config.session.sweep_interval_secs),
            move || {
                let sessions = sessions.clone();
                async move {
                    match sessions.sweep_expired_sessions().await {
                        Ok(0) => tracing::debug!("No expired sessions to clean up"),
                        Ok(count) => {
                            tracing::info!(deleted_count = count, "Cleaned up expired sessions")
                        }
                        Err(e) => tracing::warn!(error = %e, "Failed to clean up sessions"),
                    }
                }
            },
        ));

        let sessions = self.sessions.clone();
        tasks.push(spawn_periodic(
            "session-cache-sweep",
            Duration::from_secs(config.session.cache_sweep_interval_secs),
            move || {
                let sessions = sessions.clone();
                async move {
                    let pruned = sessions.sweep_cache();
                    tracing::debug!(pruned, "Swept session cache");
                }
            },
        ));

        let oauth_states = self.oauth_states.clone();
        tasks.push(spawn_periodic(
            "oauth-state-sweep",
            Duration::from_secs(config.oauth.sweep_interval_secs),
            move || {
                let oauth_states = oauth_states.clone();
                async move {
                    let pruned = oauth_states.sweep();
                    tracing::debug!(pruned, "Swept OAuth states");
                }
            },
        ));

        let clients = self.client_limiter.clone();
        let domains = self.domain_limiter.clone();
        tasks.push(spawn_periodic(
            "rate-limit-sweep",
            Duration::from_secs(config.rate_limit.sweep_interval_secs),
            move || {
                let clients = clients.clone();
                let domains = domains.clone();
                async move {
                    let clients_evicted = clients.sweep_idle();
                    let domains_evicted = domains.sweep_idle();
                    tracing::debug!(clients_evicted, domains_evicted, "Swept idle rate limiters");
                }
            },
        ));

        let counts = self.counts.clone();
        tasks.push(spawn_periodic(
            "count-cache-sweep",
            Duration::from_secs(config.counts.sweep_interval_secs),
            move || {
                let counts = counts.clone();
                async move {
                    let pruned = counts.sweep();
                    tracing::debug!(pruned, "Swept unread count cache");
                }
            },
        ));

        if config.refresh.enabled {
            tasks.push(
                self.scheduler
                    .start(Duration::from_secs(config.refresh.interval_secs)),
            );
        } else {
            tracing::info!("Internal refresh loop disabled; waiting for external triggers");
        }

        tasks
    }
}
