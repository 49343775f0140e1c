//! Builder patterns for test sessions.

use chrono::Utc;
use credential_refresh::session::Session;

/// Fixed "now" used by tests that drive a `ManualClock`.
pub const TEST_NOW: i64 = 1_700_000_000;

/// Builder for provider sessions.
///
/// # Example
/// ```rust,ignore
/// let session = TestSessionBuilder::new()
///     .token("stale")
///     .expires_at(TEST_NOW + 10)
///     .build();
/// ```
pub struct TestSessionBuilder {
    token: String,
    expires_at: Option<i64>,
}

impl TestSessionBuilder {
    /// Session with token `test-access-token` expiring an hour after [`TEST_NOW`].
    pub fn new() -> Self {
        Self {
            token: "test-access-token".to_string(),
            expires_at: Some(TEST_NOW + 3600),
        }
    }

    pub fn token(mut self, token: &str) -> Self {
        self.token = token.to_string();
        self
    }

    /// Set the expiry as a Unix timestamp.
    pub fn expires_at(mut self, timestamp: i64) -> Self {
        self.expires_at = Some(timestamp);
        self
    }

    /// Set the expiry relative to the real wall clock.
    pub fn expires_in_from_now(mut self, seconds: i64) -> Self {
        self.expires_at = Some(Utc::now().timestamp() + seconds);
        self
    }

    /// Leave the expiry unknown.
    pub fn without_expiry(mut self) -> Self {
        self.expires_at = None;
        self
    }

    pub fn build(self) -> Session {
        match self.expires_at {
            Some(expires_at) => Session::new(self.token, expires_at),
            None => Session::without_expiry(self.token),
        }
    }
}

impl Default for TestSessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}
