//! Identity provider seam for the OAuth login flow.
//!
//! Only state tracking is handled in-process. The provider builds the
//! authorization redirect and turns a callback code into an identity.

use async_trait::async_trait;

use crate::config::OAuthConfig;
use crate::{FeedgateError, Result};

/// Identity returned by a provider after a successful exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Provider-asserted username.
    pub username: String,
}

/// OAuth identity provider.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// URL the browser is sent to in order to log in.
    fn authorize_url(&self, state: &str) -> Result<String>;

    /// Exchange an authorization code for an identity.
    async fn exchange(&self, code: &str) -> Result<Identity>;
}

/// Development provider that accepts the authorization code as the username.
///
/// When `dev_login` is off every exchange is refused.
#[derive(Debug, Clone)]
pub struct DevIdentityProvider {
    authorize_url: String,
    client_id: String,
    redirect_uri: String,
    accept_codes: bool,
}

const DEFAULT_AUTHORIZE_URL: &str = "http://localhost:8080/api/auth/callback";

impl DevIdentityProvider {
    /// Create a provider that accepts any non-empty code.
    pub fn new() -> Self {
        Self {
            authorize_url: DEFAULT_AUTHORIZE_URL.to_string(),
            client_id: "feedgate-dev".to_string(),
            redirect_uri: String::new(),
            accept_codes: true,
        }
    }

    /// Build from the `[oauth]` section.
    pub fn from_config(config: &OAuthConfig) -> Self {
        let authorize_url = if config.authorize_url.is_empty() {
            DEFAULT_AUTHORIZE_URL.to_string()
        } else {
            config.authorize_url.clone()
        };
        Self {
            authorize_url,
            client_id: config.client_id.clone(),
            redirect_uri: config.redirect_uri.clone(),
            accept_codes: config.dev_login,
        }
    }
}

impl Default for DevIdentityProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdentityProvider for DevIdentityProvider {
    fn authorize_url(&self, state: &str) -> Result<String> {
        let mut params = vec![
            ("response_type", "code"),
            ("client_id", self.client_id.as_str()),
            ("state", state),
        ];
        if !self.redirect_uri.is_empty() {
            params.push(("redirect_uri", self.redirect_uri.as_str()));
        }

        let url = url::Url::parse_with_params(&self.authorize_url, &params)
            .map_err(|e| FeedgateError::Config(format!("invalid oauth.authorize_url: {e}")))?;
        Ok(url.into())
    }

    async fn exchange(&self, code: &str) -> Result<Identity> {
        if !self.accept_codes {
            return Err(FeedgateError::Forbidden(
                "no identity provider configured".to_string(),
            ));
        }

        let username = code.trim();
        if username.is_empty() {
            return Err(FeedgateError::Validation("empty authorization code".to_string()));
        }

        Ok(Identity {
            username: username.to_string(),
        })
    }
}
