//! Public entry point.
//!
//! [`TokenManager`] is a cheap-to-clone handle around one
//! [`RefreshCoordinator`]. Build it once in the application's composition
//! root and hand clones to every consumer that needs a bearer token.
//!
//! # Example
//!
//! ```rust,ignore
//! use credential_refresh::manager::TokenManager;
//! use credential_refresh::store::FileStore;
//! use std::sync::Arc;
//!
//! let manager = TokenManager::builder(provider, Arc::new(FileStore::open(data_dir)?))
//!     .config(CoordinatorConfig::from_env()?)
//!     .build()?;
//!
//! if let Some(credential) = manager.get_token_with_refresh().await? {
//!     request.header("Authorization", credential.bearer_header());
//! }
//! ```

use crate::clock::{Clock, SystemClock};
use crate::config::{ConfigError, CoordinatorConfig};
use crate::coordinator::RefreshCoordinator;
use crate::error::TokenError;
use crate::events::{EventKind, Subscription, TokenEvent, TokenReceiver};
use crate::provider::IdentityProvider;
use crate::session::Credential;
use crate::store::CredentialStore;
use std::sync::Arc;
use tracing::debug;

/// Shared handle to the process's refresh coordinator.
#[derive(Debug, Clone)]
pub struct TokenManager {
    coordinator: Arc<RefreshCoordinator>,
}

impl TokenManager {
    /// Start building a manager around `provider` and `store`.
    pub fn builder(
        provider: Arc<dyn IdentityProvider>,
        store: Arc<dyn CredentialStore>,
    ) -> TokenManagerBuilder {
        TokenManagerBuilder {
            provider,
            store,
            clock: Arc::new(SystemClock),
            config: CoordinatorConfig::default(),
        }
    }

    /// Current credential, possibly stale. `None` when signed out.
    pub async fn get_token(&self) -> Option<Credential> {
        self.coordinator.get_token().await
    }

    /// A credential valid for at least the configured refresh buffer,
    /// refreshing first when needed. `Ok(None)` when signed out.
    ///
    /// # Errors
    ///
    /// Returns the refresh error (shared by every caller of that attempt).
    pub async fn get_token_with_refresh(&self) -> Result<Option<Credential>, TokenError> {
        self.coordinator.get_token_with_refresh().await
    }

    /// Refresh even if the current credential is fresh.
    ///
    /// # Errors
    ///
    /// Returns the refresh error (shared by every caller of that attempt).
    pub async fn force_refresh(&self) -> Result<Option<Credential>, TokenError> {
        self.coordinator.force_refresh().await
    }

    /// Forget the credential. The provider's current session is ignored
    /// until it signs in again with a different token.
    pub fn clear(&self) {
        self.coordinator.clear();
    }

    /// Register a handler for one kind of event.
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&TokenEvent) + Send + Sync + 'static,
    {
        self.coordinator.subscribe(kind, handler)
    }

    /// Watch-channel receiver tracking the current token.
    #[must_use]
    pub fn receiver(&self) -> TokenReceiver {
        self.coordinator.receiver()
    }

    /// In-memory credential; never suspends.
    #[must_use]
    pub fn cached_token(&self) -> Option<Credential> {
        self.coordinator.cached_token()
    }

    /// Consecutive failed attempts since the last success.
    #[must_use]
    pub fn failure_count(&self) -> u32 {
        self.coordinator.failure_count()
    }

    /// The underlying coordinator.
    #[must_use]
    pub fn coordinator(&self) -> &Arc<RefreshCoordinator> {
        &self.coordinator
    }
}

/// Builder returned by [`TokenManager::builder`].
pub struct TokenManagerBuilder {
    provider: Arc<dyn IdentityProvider>,
    store: Arc<dyn CredentialStore>,
    clock: Arc<dyn Clock>,
    config: CoordinatorConfig,
}

impl std::fmt::Debug for TokenManagerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenManagerBuilder")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl TokenManagerBuilder {
    /// Replace the default configuration; checked in [`build`](Self::build).
    #[must_use]
    pub fn config(mut self, config: CoordinatorConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the wall clock (tests use [`ManualClock`](crate::clock::ManualClock)).
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Validate the configuration and create the manager.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if the configuration is invalid.
    pub fn build(self) -> Result<TokenManager, ConfigError> {
        self.config.validate()?;
        debug!(
            target: "credential_refresh.coordinator",
            refresh_buffer_secs = self.config.refresh_buffer.as_secs(),
            refresh_timeout_secs = self.config.refresh_timeout.as_secs(),
            "Creating token manager"
        );

        Ok(TokenManager {
            coordinator: Arc::new(RefreshCoordinator::new(
                self.provider,
                self.store,
                self.clock,
                self.config,
            )),
        })
    }
}
