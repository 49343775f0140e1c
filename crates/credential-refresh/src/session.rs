//! Session and credential types.
//!
//! A [`Session`] is what the identity provider hands out. A [`Credential`] is
//! the coordinator's owned copy of it, stamped with the time it was obtained.
//! Token values are held as [`SecretString`] and redacted in Debug output.

use crate::secret::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A session as reported by the identity provider.
#[derive(Clone)]
pub struct Session {
    /// Bearer access token.
    pub access_token: SecretString,

    /// Expiry as a Unix timestamp (seconds), if the provider reported one.
    pub expires_at: Option<i64>,
}

impl Session {
    /// Create a session with a known expiry.
    #[must_use]
    pub fn new(access_token: impl Into<String>, expires_at: i64) -> Self {
        Self {
            access_token: SecretString::from(access_token.into()),
            expires_at: Some(expires_at),
        }
    }

    /// Create a session whose expiry is unknown.
    #[must_use]
    pub fn without_expiry(access_token: impl Into<String>) -> Self {
        Self {
            access_token: SecretString::from(access_token.into()),
            expires_at: None,
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("access_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// The bearer credential owned by the coordinator.
#[derive(Clone)]
pub struct Credential {
    token: SecretString,
    expires_at: Option<i64>,
    refreshed_at: i64,
}

impl Credential {
    /// Create a credential.
    #[must_use]
    pub fn new(token: SecretString, expires_at: Option<i64>, refreshed_at: i64) -> Self {
        Self {
            token,
            expires_at,
            refreshed_at,
        }
    }

    /// Build a credential from a provider session obtained at `now`.
    #[must_use]
    pub fn from_session(session: Session, now: i64) -> Self {
        Self::new(session.access_token, session.expires_at, now)
    }

    /// The bearer token.
    #[must_use]
    pub fn token(&self) -> &SecretString {
        &self.token
    }

    /// Expiry as a Unix timestamp, `None` when unknown.
    #[must_use]
    pub fn expires_at(&self) -> Option<i64> {
        self.expires_at
    }

    /// When this credential was obtained or last confirmed (Unix seconds).
    #[must_use]
    pub fn refreshed_at(&self) -> i64 {
        self.refreshed_at
    }

    /// `Authorization` header value for this credential.
    #[must_use]
    pub fn bearer_header(&self) -> String {
        format!("Bearer {}", self.token.expose_secret())
    }

    /// Whether both credentials carry the same token value.
    #[must_use]
    pub fn same_token(&self, other: &Credential) -> bool {
        self.token.expose_secret() == other.token.expose_secret()
    }

    /// Forget the expiry so the credential is no longer considered fresh.
    pub(crate) fn invalidate_expiry(&mut self) {
        self.expires_at = None;
    }

    pub(crate) fn metadata(&self) -> PersistedSession {
        PersistedSession {
            expires_at: self.expires_at,
            refreshed_at: self.refreshed_at,
        }
    }
}

impl PartialEq for Credential {
    fn eq(&self, other: &Self) -> bool {
        self.same_token(other)
            && self.expires_at == other.expires_at
            && self.refreshed_at == other.refreshed_at
    }
}

impl Eq for Credential {}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .field("refreshed_at", &self.refreshed_at)
            .finish()
    }
}

/// Session metadata persisted next to the token value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedSession {
    /// Expiry as a Unix timestamp, if known.
    pub expires_at: Option<i64>,
    /// When the token was obtained.
    pub refreshed_at: i64,
}
