//! CSRF (Cross-Site Request Forgery) protection.
//!
//! Tokens are derived rather than stored: `HMAC-SHA256(secret, session_id)`,
//! URL-safe base64 encoded. A token stays the same for the life of its
//! session and dies with it. Rotating the secret invalidates every
//! outstanding token at once.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::{info, warn};

use crate::{FeedgateError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Bytes of a generated fallback secret.
const GENERATED_SECRET_BYTES: usize = 32;

/// Header carrying the CSRF token on mutating requests.
pub const CSRF_HEADER: &str = "x-csrf-token";

/// Per-session anti-forgery token service.
#[derive(Clone)]
pub struct CsrfService {
    mac: HmacSha256,
}

impl CsrfService {
    /// Create a service keyed with `secret`.
    pub fn new(secret: &[u8]) -> Result<Self> {
        if secret.is_empty() {
            return Err(FeedgateError::Config(
                "CSRF secret must not be empty".to_string(),
            ));
        }
        let mac = HmacSha256::new_from_slice(secret)
            .map_err(|e| FeedgateError::Config(format!("invalid CSRF secret: {e}")))?;
        Ok(Self { mac })
    }

    /// Create a service from the configured secret.
    ///
    /// Without a configured secret a random one is generated, so tokens do
    /// not survive a restart. That is logged as a warning in production.
    pub fn from_config(secret: &str, is_production: bool) -> Result<Self> {
        if !secret.is_empty() {
            return Self::new(secret.as_bytes());
        }

        if is_production {
            warn!(
                "No CSRF secret configured; using a generated secret. \
                 Tokens will be invalidated on every restart. Set FEEDGATE_CSRF_SECRET."
            );
        } else {
            info!("No CSRF secret configured; using a generated secret");
        }

        let mut bytes = [0u8; GENERATED_SECRET_BYTES];
        rand::rng().fill_bytes(&mut bytes);
        Self::new(&bytes)
    }

    /// Token for `session_id`.
    pub fn generate(&self, session_id: &str) -> String {
        let mut mac = self.mac.clone();
        mac.update(session_id.as_bytes());
        URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes())
    }

    /// Check `provided` against the token for `session_id` in constant time.
    pub fn validate(&self, session_id: &str, provided: &str) -> bool {
        let expected = self.generate(session_id);

        // Length is not secret: every token has the same length
        if provided.len() != expected.len() {
            return false;
        }

        provided.as_bytes().ct_eq(expected.as_bytes()).into()
    }
}

impl std::fmt::Debug for CsrfService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CsrfService").finish_non_exhaustive()
    }
}

/// Whether `method` is exempt from CSRF checks.
pub fn is_safe_method(method: &axum::http::Method) -> bool {
    use axum::http::Method;
    matches!(
        *method,
        Method::GET | Method::HEAD | Method::OPTIONS | Method::TRACE
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Method;

    fn service() -> CsrfService {
        CsrfService::new(b"test-secret").unwrap()
    }

    #[test]
    fn test_generate_is_deterministic() {
        let csrf = service();
        assert_eq!(csrf.generate("session-a"), csrf.generate("session-a"));
    }

    #[test]
    fn test_different_sessions_different_tokens() {
        let csrf = service();
        assert_ne!(csrf.generate("session-a"), csrf.generate("session-b"));
    }

    #[test]
    fn test_token_is_url_safe() {
        let token = service().generate("session-a");

        // 32-byte MAC = 43 base64 characters without padding
        assert_eq!(token.len(), 43);
        assert!(token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_validate() {
        let csrf = service();
        let token = csrf.generate("session-a");

        assert!(csrf.validate("session-a", &token));
        assert!(!csrf.validate("session-b", &token));
        assert!(!csrf.validate("session-a", ""));
        assert!(!csrf.validate("session-a", &token[..10]));
    }

    #[test]
    fn test_secret_rotation_invalidates_tokens() {
        let old = CsrfService::new(b"old-secret").unwrap();
        let new = CsrfService::new(b"new-secret").unwrap();
        let token = old.generate("session-a");

        assert!(!new.validate("session-a", &token));
    }

    #[test]
    fn test_empty_secret_rejected() {
        assert!(CsrfService::new(b"").is_err());
    }

    #[test]
    fn test_generated_secrets_differ() {
        let a = CsrfService::from_config("", false).unwrap();
        let b = CsrfService::from_config("", true).unwrap();
        assert_ne!(a.generate("s"), b.generate("s"));
    }

    #[test]
    fn test_configured_secret_is_stable() {
        let a = CsrfService::from_config("shared", true).unwrap();
        let b = CsrfService::from_config("shared", true).unwrap();
        assert_eq!(a.generate("s"), b.generate("s"));
    }

    #[test]
    fn test_safe_methods() {
        assert!(is_safe_method(&Method::GET));
        assert!(is_safe_method(&Method::HEAD));
        assert!(is_safe_method(&Method::OPTIONS));
        assert!(!is_safe_method(&Method::POST));
        assert!(!is_safe_method(&Method::PUT));
        assert!(!is_safe_method(&Method::DELETE));
        assert!(!is_safe_method(&Method::PATCH));
    }
}
