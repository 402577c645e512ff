//! Test helpers for integration tests.
//!
//! Provides a stub feed fetcher, a test application wired like production
//! around an in-memory database, and a login helper.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::http::{HeaderName, HeaderValue};
use axum_extra::extract::cookie::Cookie;
use axum_test::{TestRequest, TestServer};
use serde_json::Value;

use feedgate::feeds::{FetchValidators, FetchedMeta, NewArticle};
use feedgate::refresh::{FetchOutcome, FetchedFeed};
use feedgate::{create_router, AppState, Config, Database, FeedFetcher, FeedgateError, SystemClock};

/// Shared refresh secret used by test configurations.
pub const REFRESH_SECRET: &str = "test-refresh-secret";

/// Canned answer for one feed URL.
#[derive(Debug, Clone)]
pub enum StubResponse {
    /// A document with these articles and validators.
    Feed {
        title: String,
        articles: Vec<NewArticle>,
        validators: FetchValidators,
    },
    /// 304 Not Modified.
    NotModified,
    /// A failed fetch.
    Fail(String),
}

impl StubResponse {
    /// A document with `count` articles whose guids start with `prefix`.
    pub fn articles(prefix: &str, count: usize) -> Self {
        StubResponse::Feed {
            title: format!("{prefix} feed"),
            articles: (0..count)
                .map(|i| NewArticle::new(format!("{prefix}-{i}"), format!("{prefix} article {i}")))
                .collect(),
            validators: FetchValidators::default(),
        }
    }
}

/// [`FeedFetcher`] answering from a table, recording every call.
#[derive(Default)]
pub struct StubFetcher {
    responses: Mutex<HashMap<String, StubResponse>>,
    calls: Mutex<Vec<(String, FetchValidators)>>,
    delay: Mutex<Duration>,
}

impl StubFetcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Set the answer for `url`.
    pub fn respond(&self, url: &str, response: StubResponse) {
        self.responses
            .lock()
            .unwrap()
            .insert(url.to_string(), response);
    }

    /// Delay every fetch by `delay`.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    /// URLs fetched so far, in call order.
    pub fn fetched_urls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(url, _)| url.clone())
            .collect()
    }

    /// Validators sent with the most recent fetch of `url`.
    pub fn last_validators(&self, url: &str) -> Option<FetchValidators> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(u, _)| u == url)
            .map(|(_, v)| v.clone())
    }

    /// Number of fetches of `url`.
    pub fn fetch_count(&self, url: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(u, _)| u == url)
            .count()
    }
}

#[async_trait]
impl FeedFetcher for StubFetcher {
    async fn fetch(
        &self,
        url: &str,
        validators: &FetchValidators,
    ) -> feedgate::Result<FetchOutcome> {
        self.calls
            .lock()
            .unwrap()
            .push((url.to_string(), validators.clone()));

        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let response = self.responses.lock().unwrap().get(url).cloned();
        match response {
            Some(StubResponse::Feed {
                title,
                articles,
                validators,
            }) => Ok(FetchOutcome::Fetched(FetchedFeed {
                meta: FetchedMeta {
                    title: Some(title),
                    site_url: None,
                    validators,
                },
                articles,
            })),
            Some(StubResponse::NotModified) => Ok(FetchOutcome::NotModified),
            Some(StubResponse::Fail(msg)) => Err(FeedgateError::UpstreamFetch(msg)),
            None => Err(FeedgateError::UpstreamFetch("HTTP error: 404".to_string())),
        }
    }
}

/// Configuration for tests: generous limits, no internal refresh loop.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.csrf.secret = "test-csrf-secret".to_string();
    config.oauth.dev_login = true;
    config.rate_limit.client_requests_per_sec = 1000;
    config.rate_limit.client_burst = 1000;
    config.refresh.enabled = false;
    config.refresh.stagger_window_secs = 0;
    config.refresh.trigger_secret = REFRESH_SECRET.to_string();
    config
}

/// Application under test.
pub struct TestApp {
    pub server: TestServer,
    pub state: Arc<AppState>,
    pub db: Database,
    pub fetcher: Arc<StubFetcher>,
}

impl TestApp {
    /// Create an app with [`test_config`].
    pub async fn new() -> Self {
        Self::with_config(test_config()).await
    }

    /// Create an app with `config`.
    pub async fn with_config(config: Config) -> Self {
        let db = Database::open_in_memory()
            .await
            .expect("Failed to create test database");
        let fetcher = StubFetcher::new();
        let state = Arc::new(
            AppState::build(&config, &db, Arc::new(SystemClock), fetcher.clone())
                .expect("Failed to build app state"),
        );

        let router = create_router(state.clone(), &config.server.cors_origins);
        let server = TestServer::new(router).expect("Failed to create test server");

        Self {
            server,
            state,
            db,
            fetcher,
        }
    }

    /// Log in through the OAuth flow as `username`.
    pub async fn login(&self, username: &str) -> LoggedIn {
        let response = self.server.get("/api/auth/login").await;
        response.assert_status_ok();
        let body: Value = response.json();
        let state = oauth_state_of(body["data"]["authorize_url"].as_str().unwrap());

        let response = self
            .server
            .get("/api/auth/callback")
            .add_query_param("state", &state)
            .add_query_param("code", username)
            .await;
        response.assert_status_ok();

        let cookie = response.cookie(&self.state.cookie.name);
        let body: Value = response.json();

        LoggedIn {
            cookie,
            csrf_token: body["data"]["csrf_token"].as_str().unwrap().to_string(),
            user_id: body["data"]["user"]["id"].as_i64().unwrap(),
        }
    }
}

/// Extract the `state` parameter of an authorize URL.
pub fn oauth_state_of(authorize_url: &str) -> String {
    url::Url::parse(authorize_url)
        .unwrap()
        .query_pairs()
        .find(|(k, _)| k == "state")
        .map(|(_, v)| v.into_owned())
        .expect("authorize URL has no state")
}

/// A logged-in browser.
#[derive(Debug, Clone)]
pub struct LoggedIn {
    pub cookie: Cookie<'static>,
    pub csrf_token: String,
    pub user_id: i64,
}

impl LoggedIn {
    /// Attach the session cookie.
    pub fn session(&self, request: TestRequest) -> TestRequest {
        request.add_cookie(self.cookie.clone())
    }

    /// Attach the session cookie and CSRF token.
    pub fn authed(&self, request: TestRequest) -> TestRequest {
        self.session(request).add_header(
            HeaderName::from_static("x-csrf-token"),
            HeaderValue::from_str(&self.csrf_token).unwrap(),
        )
    }
}

/// Header name of the refresh secret.
pub fn refresh_secret_header() -> HeaderName {
    HeaderName::from_static("x-refresh-secret")
}
