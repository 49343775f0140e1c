//! Identity provider collaborator.
//!
//! The coordinator consumes the provider through two operations: a cheap,
//! local lookup of the current session and a network refresh. Anything that
//! can answer both (an OAuth server, a vendor SDK, a test double) plugs in by
//! implementing [`IdentityProvider`].

pub mod http;

use crate::error::ProviderError;
use crate::session::Session;
use async_trait::async_trait;

/// Source of sessions for the refresh coordinator.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Report the session the provider currently holds.
    ///
    /// Expected to be cheap and local (no network round trip). `Ok(None)`
    /// means there is no session at all, which callers treat as authoritative.
    ///
    /// # Errors
    ///
    /// Returns `ProviderError` when the lookup itself is unavailable; callers
    /// then fall back to their cached credential.
    async fn current_session(&self) -> Result<Option<Session>, ProviderError>;

    /// Exchange the current session for a new one over the network.
    ///
    /// # Errors
    ///
    /// - `ProviderError::NoSession` if there is nothing to refresh or the
    ///   provider rejected the refresh grant
    /// - any other variant for transport or response failures
    async fn refresh_session(&self) -> Result<Session, ProviderError>;
}
