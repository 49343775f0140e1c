//! Error types for credential refresh.
//!
//! Callers distinguish failures by variant, never by message text:
//! `TokenError::NoSession` routes the user to re-authentication while
//! `TokenError::Provider` and `TokenError::Timeout` are connectivity problems
//! that the next attempt may recover from.

use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the refresh coordinator.
///
/// `Clone` because a single attempt's outcome is delivered to every waiter
/// queued behind it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    /// No session exists. Terminal for the call; not retried automatically.
    #[error("No active session")]
    NoSession,

    /// The identity provider failed to refresh the session.
    #[error("Identity provider error: {0}")]
    Provider(String),

    /// The refresh call did not settle within the configured timeout.
    #[error("Refresh timed out after {0:?}")]
    Timeout(Duration),

    /// Local credential storage failed.
    ///
    /// The coordinator logs storage failures and never returns this itself.
    /// It is here for callers that drive a [`CredentialStore`](crate::store::CredentialStore)
    /// directly and want one error type.
    #[error("Credential storage error: {0}")]
    Storage(String),

    /// The refresh attempt ended without producing an outcome
    /// (task cancelled or panicked).
    #[error("Refresh attempt aborted: {0}")]
    Aborted(String),

    /// Watch channel closed unexpectedly.
    #[error("Token channel closed")]
    ChannelClosed,
}

impl TokenError {
    /// Whether a later attempt may succeed without user interaction.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::NoSession)
    }

    /// Bounded label for metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NoSession => "no_session",
            Self::Provider(_) => "provider",
            Self::Timeout(_) => "timeout",
            Self::Storage(_) => "storage",
            Self::Aborted(_) => "aborted",
            Self::ChannelClosed => "channel_closed",
        }
    }
}

/// Errors returned by an [`IdentityProvider`](crate::provider::IdentityProvider).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// The provider holds no session, or rejected the refresh grant.
    #[error("No session")]
    NoSession,

    /// Transport failure or unexpected HTTP status.
    #[error("HTTP error: {0}")]
    Http(String),

    /// The provider answered with a body that could not be parsed.
    #[error("Invalid token response: {0}")]
    InvalidResponse(String),

    /// The provider cannot be reached right now.
    #[error("Provider unavailable: {0}")]
    Unavailable(String),
}

impl From<ProviderError> for TokenError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::NoSession => TokenError::NoSession,
            other => TokenError::Provider(other.to_string()),
        }
    }
}

/// Errors returned by a [`CredentialStore`](crate::store::CredentialStore).
///
/// Best-effort only: the coordinator logs these and never surfaces them to
/// token callers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Underlying storage I/O failed.
    #[error("Storage I/O error: {0}")]
    Io(String),

    /// A persisted value could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Lets callers use `?` on store operations inside functions returning
/// [`TokenError`].
impl From<StoreError> for TokenError {
    fn from(err: StoreError) -> Self {
        TokenError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(err.to_string())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_token_error_display() {
        assert_eq!(TokenError::NoSession.to_string(), "No active session");

        let err = TokenError::Provider("connection refused".to_string());
        assert!(err.to_string().contains("connection refused"));

        let err = TokenError::Timeout(Duration::from_secs(30));
        assert!(err.to_string().contains("30s"));

        let err = TokenError::Storage("disk full".to_string());
        assert!(err.to_string().contains("disk full"));

        let err = TokenError::Aborted("task panicked".to_string());
        assert!(err.to_string().contains("task panicked"));

        let err = TokenError::ChannelClosed;
        assert!(err.to_string().contains("closed"));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(!TokenError::NoSession.is_retryable());
        assert!(TokenError::Provider("x".into()).is_retryable());
        assert!(TokenError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(TokenError::Aborted("x".into()).is_retryable());
    }

    #[test]
    fn test_kind_labels_are_distinct() {
        let kinds = [
            TokenError::NoSession.kind(),
            TokenError::Provider(String::new()).kind(),
            TokenError::Timeout(Duration::ZERO).kind(),
            TokenError::Storage(String::new()).kind(),
            TokenError::Aborted(String::new()).kind(),
            TokenError::ChannelClosed.kind(),
        ];
        for (i, a) in kinds.iter().enumerate() {
            for b in kinds.iter().skip(i + 1) {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_provider_no_session_maps_to_no_session() {
        let err: TokenError = ProviderError::NoSession.into();
        assert_eq!(err, TokenError::NoSession);
    }

    #[test]
    fn test_provider_failures_map_to_provider() {
        let err: TokenError = ProviderError::Http("server error: 503".into()).into();
        assert!(matches!(err, TokenError::Provider(ref msg) if msg.contains("503")));

        let err: TokenError = ProviderError::InvalidResponse("missing field".into()).into();
        assert!(matches!(err, TokenError::Provider(_)));

        let err: TokenError = ProviderError::Unavailable("offline".into()).into();
        assert!(matches!(err, TokenError::Provider(_)));
    }

    #[test]
    fn test_store_error_from_serde() {
        let json_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err: StoreError = json_err.into();
        assert!(matches!(err, StoreError::Serialization(_)));

        let token_err: TokenError = err.into();
        assert!(matches!(token_err, TokenError::Storage(_)));
    }

    #[test]
    fn test_token_error_clone() {
        let err = TokenError::Provider("test".to_string());
        let cloned = err.clone();
        assert_eq!(err, cloned);
    }
}
