//! Wall-clock time and expiry decisions.
//!
//! Expiry timestamps are Unix seconds as reported by the identity provider,
//! so freshness is judged against wall-clock time. Rate limiting and backoff
//! use monotonic `tokio::time` instead and do not go through [`Clock`].

use crate::session::Credential;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

/// Source of the current Unix time in seconds.
pub trait Clock: Send + Sync {
    /// Current Unix timestamp (seconds).
    fn now(&self) -> i64;
}

/// [`Clock`] backed by the system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

/// Settable [`Clock`] for deterministic tests.
#[derive(Debug, Default)]
pub struct ManualClock(AtomicI64);

impl ManualClock {
    /// Create a clock reading `now`.
    #[must_use]
    pub fn new(now: i64) -> Self {
        Self(AtomicI64::new(now))
    }

    /// Set the current time.
    pub fn set(&self, now: i64) {
        self.0.store(now, Ordering::SeqCst);
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        #[allow(clippy::cast_possible_wrap)]
        self.0.fetch_add(by.as_secs() as i64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Whether `credential` can be handed out at `now` with `buffer` to spare.
///
/// False when the credential is absent, its expiry is unknown, or
/// `now >= expires_at - buffer`.
#[must_use]
pub fn is_fresh(credential: Option<&Credential>, buffer: Duration, now: i64) -> bool {
    let Some(expires_at) = credential.and_then(Credential::expires_at) else {
        return false;
    };
    #[allow(clippy::cast_possible_wrap)]
    let buffer_secs = buffer.as_secs() as i64;
    now < expires_at.saturating_sub(buffer_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Session;

    const NOW: i64 = 1_700_000_000;

    fn credential_expiring_in(secs: i64) -> Credential {
        Credential::from_session(Session::new("tok", NOW + secs), NOW)
    }

    #[test]
    fn test_absent_credential_is_not_fresh() {
        assert!(!is_fresh(None, Duration::from_secs(30), NOW));
    }

    #[test]
    fn test_unknown_expiry_is_not_fresh() {
        let credential = Credential::from_session(Session::without_expiry("tok"), NOW);
        assert!(!is_fresh(Some(&credential), Duration::ZERO, NOW));
    }

    #[test]
    fn test_fresh_when_outside_buffer() {
        let credential = credential_expiring_in(3600);
        assert!(is_fresh(Some(&credential), Duration::from_secs(60), NOW));
    }

    #[test]
    fn test_stale_when_inside_buffer() {
        let credential = credential_expiring_in(10);
        assert!(!is_fresh(Some(&credential), Duration::from_secs(30), NOW));
    }

    #[test]
    fn test_boundary_at_exact_buffer_is_stale() {
        // now == expires_at - buffer
        let credential = credential_expiring_in(30);
        assert!(!is_fresh(Some(&credential), Duration::from_secs(30), NOW));
    }

    #[test]
    fn test_boundary_one_second_over_buffer_is_fresh() {
        let credential = credential_expiring_in(31);
        assert!(is_fresh(Some(&credential), Duration::from_secs(30), NOW));
    }

    #[test]
    fn test_already_expired_is_stale() {
        let credential = credential_expiring_in(-60);
        assert!(!is_fresh(Some(&credential), Duration::ZERO, NOW));
    }

    #[test]
    fn test_zero_buffer_expires_exactly_at_expiry() {
        let credential = credential_expiring_in(0);
        assert!(!is_fresh(Some(&credential), Duration::ZERO, NOW));

        let credential = credential_expiring_in(1);
        assert!(is_fresh(Some(&credential), Duration::ZERO, NOW));
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(NOW);
        assert_eq!(clock.now(), NOW);

        clock.advance(Duration::from_secs(90));
        assert_eq!(clock.now(), NOW + 90);

        clock.set(5);
        assert_eq!(clock.now(), 5);
    }

    #[test]
    fn test_system_clock_is_recent() {
        // 2023-11-14, well before any plausible test run
        assert!(SystemClock.now() > NOW);
    }
}
