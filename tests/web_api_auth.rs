//! Web API Authentication Tests
//!
//! Login flow, session cookie, CSRF and client rate limiting through the
//! full router.

mod common;

use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum_extra::extract::cookie::Cookie;
use serde_json::Value;

use common::{oauth_state_of, test_config, TestApp};

// ============================================================================
// Login Flow
// ============================================================================

#[tokio::test]
async fn test_login_returns_authorize_url_with_state() {
    let app = TestApp::new().await;

    let response = app.server.get("/api/auth/login").await;
    response.assert_status_ok();

    let body: Value = response.json();
    let url = body["data"]["authorize_url"].as_str().unwrap();
    let state = oauth_state_of(url);

    assert!(!state.is_empty());
    assert_eq!(app.state.oauth_states.len(), 1);
}

#[tokio::test]
async fn test_callback_creates_session_and_cookie() {
    let app = TestApp::new().await;
    let alice = app.login("alice").await;

    assert!(!alice.cookie.value().is_empty());
    assert_eq!(alice.cookie.http_only(), Some(true));

    let response = alice.session(app.server.get("/api/auth/me")).await;
    response.assert_status_ok();

    let body: Value = response.json();
    assert_eq!(body["data"]["user"]["username"], "alice");
    assert_eq!(body["data"]["csrf_token"], alice.csrf_token.as_str());
}

#[tokio::test]
async fn test_callback_state_is_single_use() {
    let app = TestApp::new().await;

    let body: Value = app.server.get("/api/auth/login").await.json();
    let state = oauth_state_of(body["data"]["authorize_url"].as_str().unwrap());

    let first = app
        .server
        .get("/api/auth/callback")
        .add_query_param("state", &state)
        .add_query_param("code", "alice")
        .await;
    first.assert_status_ok();

    let second = app
        .server
        .get("/api/auth/callback")
        .add_query_param("state", &state)
        .add_query_param("code", "alice")
        .await;
    second.assert_status(StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_callback_unknown_state_rejected() {
    let app = TestApp::new().await;

    let response = app
        .server
        .get("/api/auth/callback")
        .add_query_param("state", "never-issued")
        .add_query_param("code", "alice")
        .await;

    response.assert_status(StatusCode::FORBIDDEN);
    let body: Value = response.json();
    assert_eq!(body["error"]["code"], "FORBIDDEN");
}

#[tokio::test]
async fn test_same_username_same_user() {
    let app = TestApp::new().await;

    let first = app.login("alice").await;
    let second = app.login("alice").await;

    assert_eq!(first.user_id, second.user_id);
    assert_ne!(first.cookie.value(), second.cookie.value());
}

// ============================================================================
// Session
// ============================================================================

#[tokio::test]
async fn test_me_without_session_is_unauthorized() {
    let app = TestApp::new().await;

    let response = app.server.get("/api/auth/me").await;
    response.assert_status(StatusCode::UNAUTHORIZED);

    let body: Value = response.json();
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn test_unknown_session_cookie_is_unauthorized() {
    let app = TestApp::new().await;

    let response = app
        .server
        .get("/api/auth/me")
        .add_cookie(Cookie::new("feedgate_session", "forged"))
        .await;

    response.assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_logout_invalidates_session_immediately() {
    let app = TestApp::new().await;
    let alice = app.login("alice").await;

    // Warm the session cache
    alice
        .session(app.server.get("/api/auth/me"))
        .await
        .assert_status_ok();
    assert_eq!(app.state.sessions.cached_len(), 1);

    let response = alice.authed(app.server.post("/api/auth/logout")).await;
    response.assert_status(StatusCode::NO_CONTENT);
    assert_eq!(app.state.sessions.cached_len(), 0);

    let response = alice.session(app.server.get("/api/auth/me")).await;
    response.assert_status(StatusCode::UNAUTHORIZED);
}

// ============================================================================
// CSRF
// ============================================================================

#[tokio::test]
async fn test_mutation_without_session_is_unauthorized() {
    let app = TestApp::new().await;

    let response = app.server.post("/api/auth/logout").await;
    response.assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_mutation_without_csrf_token_is_forbidden() {
    let app = TestApp::new().await;
    let alice = app.login("alice").await;

    let response = alice.session(app.server.post("/api/auth/logout")).await;
    response.assert_status(StatusCode::FORBIDDEN);

    // Session survives the rejected request
    alice
        .session(app.server.get("/api/auth/me"))
        .await
        .assert_status_ok();
}

#[tokio::test]
async fn test_csrf_token_bound_to_session() {
    let app = TestApp::new().await;
    let alice = app.login("alice").await;
    let bob = app.login("bob").await;

    let response = alice
        .session(app.server.post("/api/auth/logout"))
        .add_header(
            HeaderName::from_static("x-csrf-token"),
            HeaderValue::from_str(&bob.csrf_token).unwrap(),
        )
        .await;

    response.assert_status(StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_safe_methods_skip_csrf() {
    let app = TestApp::new().await;
    let alice = app.login("alice").await;

    alice
        .session(app.server.get("/api/feeds"))
        .await
        .assert_status_ok();
}

// ============================================================================
// Rate Limiting
// ============================================================================

#[tokio::test]
async fn test_client_rate_limit_rejects_with_retry_after() {
    let mut config = test_config();
    config.rate_limit.client_requests_per_sec = 1;
    config.rate_limit.client_burst = 2;
    let app = TestApp::with_config(config).await;

    app.server.get("/api/auth/me").await;
    app.server.get("/api/auth/me").await;
    let response = app.server.get("/api/auth/me").await;

    response.assert_status(StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key("retry-after"));
    let body: Value = response.json();
    assert_eq!(body["error"]["code"], "RATE_LIMITED");
}

#[tokio::test]
async fn test_client_rate_limit_keys_on_trusted_header() {
    let mut config = test_config();
    config.server.trusted_client_ip_header = Some("Fly-Client-IP".to_string());
    config.rate_limit.client_requests_per_sec = 1;
    config.rate_limit.client_burst = 1;
    let app = TestApp::with_config(config).await;

    let header = HeaderName::from_static("fly-client-ip");
    let request = |ip: &'static str| {
        app.server
            .get("/api/auth/me")
            .add_header(header.clone(), HeaderValue::from_static(ip))
    };

    request("203.0.113.5")
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
    request("203.0.113.5")
        .await
        .assert_status(StatusCode::TOO_MANY_REQUESTS);

    // Another client has its own bucket
    request("198.51.100.7")
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_forwarded_for_is_not_trusted() {
    let mut config = test_config();
    config.rate_limit.client_requests_per_sec = 1;
    config.rate_limit.client_burst = 1;
    let app = TestApp::with_config(config).await;

    let request = |ip: &'static str| {
        app.server.get("/api/auth/me").add_header(
            HeaderName::from_static("x-forwarded-for"),
            HeaderValue::from_static(ip),
        )
    };

    request("203.0.113.5")
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
    // A spoofed address does not buy a fresh bucket
    request("198.51.100.7")
        .await
        .assert_status(StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_health_not_rate_limited() {
    let mut config = test_config();
    config.rate_limit.client_requests_per_sec = 1;
    config.rate_limit.client_burst = 1;
    let app = TestApp::with_config(config).await;

    for _ in 0..5 {
        let response = app.server.get("/health").await;
        response.assert_status_ok();
        response.assert_text("OK");
    }
}

#[tokio::test]
async fn test_security_headers_present() {
    let app = TestApp::new().await;

    let response = app.server.get("/api/auth/me").await;
    assert_eq!(
        response.headers().get("x-content-type-options").unwrap(),
        "nosniff"
    );
    assert_eq!(response.headers().get("x-frame-options").unwrap(), "DENY");
}
