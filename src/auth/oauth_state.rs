//! One-time OAuth login states.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use tracing::{debug, warn};

use crate::datetime::Clock;

/// Tracks issued login states until their first validation attempt.
///
/// Every validation removes the state, so each one succeeds at most once
/// even when several callbacks race on it.
pub struct OAuthStateTracker {
    states: Mutex<HashMap<String, DateTime<Utc>>>,
    max_age: Duration,
    clock: Arc<dyn Clock>,
}

impl OAuthStateTracker {
    /// Create a tracker rejecting states older than `max_age`.
    pub fn new(max_age: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            states: Mutex::new(HashMap::new()),
            max_age,
            clock,
        }
    }

    /// Generate a random state and record it.
    pub fn issue(&self) -> String {
        let mut bytes = [0u8; 24];
        rand::rng().fill_bytes(&mut bytes);
        let state = URL_SAFE_NO_PAD.encode(bytes);
        self.store(&state);
        state
    }

    /// Record `state` as issued now.
    pub fn store(&self, state: &str) {
        let now = self.clock.now();
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(state.to_string(), now);
    }

    /// Check that `state` was issued and is fresh, consuming it either way.
    pub fn validate_and_consume(&self, state: &str) -> bool {
        let now = self.clock.now();
        let created_at = self
            .states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(state);

        match created_at {
            Some(created_at) if now - created_at < self.max_age => true,
            Some(_) => {
                debug!("OAuth state expired");
                false
            }
            None => {
                warn!("Unknown or reused OAuth state");
                false
            }
        }
    }

    /// Drop states older than the maximum age.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let mut states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        let before = states.len();
        states.retain(|_, created_at| now - *created_at < self.max_age);
        let removed = before - states.len();

        if removed > 0 {
            debug!(removed, "Swept abandoned OAuth states");
        }
        removed
    }

    /// Number of outstanding states.
    pub fn len(&self) -> usize {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no state is outstanding.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for OAuthStateTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthStateTracker")
            .field("max_age", &self.max_age)
            .field("outstanding", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datetime::ManualClock;

    fn tracker() -> (OAuthStateTracker, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        (
            OAuthStateTracker::new(Duration::minutes(10), clock.clone()),
            clock,
        )
    }

    #[test]
    fn test_validates_exactly_once() {
        let (tracker, _clock) = tracker();
        let state = tracker.issue();

        assert!(tracker.validate_and_consume(&state));
        assert!(!tracker.validate_and_consume(&state));
        assert!(!tracker.validate_and_consume(&state));
    }

    #[test]
    fn test_unknown_state_rejected() {
        let (tracker, _clock) = tracker();
        assert!(!tracker.validate_and_consume("never-issued"));
    }

    #[test]
    fn test_expired_state_rejected_and_removed() {
        let (tracker, clock) = tracker();
        tracker.store("abc");

        clock.advance(Duration::minutes(11));
        assert!(!tracker.validate_and_consume("abc"));
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_issued_states_are_distinct() {
        let (tracker, _clock) = tracker();
        let a = tracker.issue();
        let b = tracker.issue();

        assert_ne!(a, b);
        assert_eq!(tracker.len(), 2);
    }

    #[test]
    fn test_sweep_removes_only_abandoned() {
        let (tracker, clock) = tracker();
        tracker.store("old");
        clock.advance(Duration::minutes(8));
        tracker.store("new");
        clock.advance(Duration::minutes(3));

        assert_eq!(tracker.sweep(), 1);
        assert!(tracker.validate_and_consume("new"));
    }

    #[test]
    fn test_concurrent_validation_single_winner() {
        let (tracker, _clock) = tracker();
        let tracker = Arc::new(tracker);
        let state = tracker.issue();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let tracker = tracker.clone();
                let state = state.clone();
                std::thread::spawn(move || tracker.validate_and_consume(&state))
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(winners, 1);
    }
}
