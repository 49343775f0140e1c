//! OAuth 2.0 refresh-token identity provider.
//!
//! Holds the session obtained at sign-in and exchanges its refresh token for
//! a new access token at the provider's token endpoint.
//!
//! # Example
//!
//! ```rust,ignore
//! use credential_refresh::provider::http::{HttpIdentityProvider, HttpProviderConfig};
//! use credential_refresh::secret::SecretString;
//!
//! let config = HttpProviderConfig::new_secure(
//!     "https://id.example.com/oauth/token".to_string(),
//!     "mobile-app".to_string(),
//! )?;
//! let provider = HttpIdentityProvider::new(config)?;
//! provider.sign_in(
//!     SecretString::from(access_token),
//!     SecretString::from(refresh_token),
//!     Some(3600),
//! );
//! ```
//!
//! # Security
//!
//! - Access and refresh tokens are stored as `SecretString` (never logged)
//! - Rejection bodies are logged at trace level only
//! - HTTP timeouts prevent hanging connections

use crate::error::ProviderError;
use crate::provider::IdentityProvider;
use crate::secret::{ExposeSecret, SecretString};
use crate::session::Session;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::RwLock;
use std::time::Duration;
use tracing::{debug, instrument, trace, warn};

/// Default HTTP request timeout.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Default connection timeout for HTTP client.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for [`HttpIdentityProvider`].
#[derive(Debug, Clone)]
pub struct HttpProviderConfig {
    /// Token endpoint URL (e.g., `https://id.example.com/oauth/token`).
    pub token_endpoint: String,

    /// OAuth client ID sent with every refresh grant.
    pub client_id: String,

    /// HTTP request timeout.
    pub http_timeout: Duration,
}

impl HttpProviderConfig {
    /// Create a new configuration with default timeouts.
    ///
    /// # Security Warning
    ///
    /// Refresh tokens travel in the request body. Use
    /// [`HttpProviderConfig::new_secure`] to enforce HTTPS.
    #[must_use]
    pub fn new(token_endpoint: String, client_id: String) -> Self {
        Self {
            token_endpoint,
            client_id,
            http_timeout: DEFAULT_HTTP_TIMEOUT,
        }
    }

    /// Create a new configuration requiring HTTPS.
    ///
    /// # Errors
    ///
    /// Returns `ProviderError::Unavailable` if the URL doesn't use HTTPS.
    pub fn new_secure(token_endpoint: String, client_id: String) -> Result<Self, ProviderError> {
        if !token_endpoint.starts_with("https://") {
            return Err(ProviderError::Unavailable(
                "token endpoint must use HTTPS".into(),
            ));
        }
        Ok(Self::new(token_endpoint, client_id))
    }

    /// Set the HTTP timeout.
    #[must_use]
    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }
}

// =============================================================================
// OAuth Response Types
// =============================================================================

/// OAuth 2.0 token response.
#[derive(Deserialize)]
struct OAuthTokenResponse {
    access_token: String,
    #[allow(dead_code)]
    token_type: String,
    #[serde(default)]
    expires_in: Option<u64>,
    /// Present when the provider rotates refresh tokens.
    #[serde(default)]
    refresh_token: Option<String>,
}

impl std::fmt::Debug for OAuthTokenResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthTokenResponse")
            .field("access_token", &"[REDACTED]")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

// =============================================================================
// Provider
// =============================================================================

/// Session held between sign-in and sign-out.
#[derive(Debug, Clone)]
struct HeldSession {
    access_token: SecretString,
    refresh_token: SecretString,
    expires_at: Option<i64>,
}

impl HeldSession {
    fn to_session(&self) -> Session {
        Session {
            access_token: self.access_token.clone(),
            expires_at: self.expires_at,
        }
    }
}

/// [`IdentityProvider`] speaking the OAuth 2.0 refresh-token grant.
pub struct HttpIdentityProvider {
    config: HttpProviderConfig,
    http_client: reqwest::Client,
    session: RwLock<Option<HeldSession>>,
}

impl std::fmt::Debug for HttpIdentityProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpIdentityProvider")
            .field("config", &self.config)
            .field("has_session", &self.has_session())
            .finish_non_exhaustive()
    }
}

impl HttpIdentityProvider {
    /// Create a provider with no session.
    ///
    /// # Errors
    ///
    /// Returns `ProviderError::Unavailable` if the HTTP client cannot be built.
    pub fn new(config: HttpProviderConfig) -> Result<Self, ProviderError> {
        let http_client = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .build()
            .map_err(|e| ProviderError::Unavailable(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            config,
            http_client,
            session: RwLock::new(None),
        })
    }

    /// Install the session obtained from the login flow.
    ///
    /// `expires_in` is the access token lifetime in seconds, if known.
    pub fn sign_in(
        &self,
        access_token: SecretString,
        refresh_token: SecretString,
        expires_in: Option<u64>,
    ) {
        let expires_at = expires_in.map(expires_at_from_now);
        *self
            .session
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(HeldSession {
            access_token,
            refresh_token,
            expires_at,
        });
        debug!(
            target: "credential_refresh.provider",
            client_id = %self.config.client_id,
            "Session installed"
        );
    }

    /// Forget the held session.
    pub fn sign_out(&self) {
        *self
            .session
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = None;
    }

    /// Whether a session is held.
    #[must_use]
    pub fn has_session(&self) -> bool {
        self.session
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .is_some()
    }

    fn refresh_token(&self) -> Option<SecretString> {
        self.session
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .as_ref()
            .map(|held| held.refresh_token.clone())
    }

    /// Store a refreshed session, unless the session was signed out while
    /// the request was in flight.
    fn commit(&self, response: OAuthTokenResponse) -> Result<Session, ProviderError> {
        let mut guard = self
            .session
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let Some(held) = guard.as_mut() else {
            debug!(
                target: "credential_refresh.provider",
                "Session signed out during refresh, discarding response"
            );
            return Err(ProviderError::NoSession);
        };

        held.access_token = SecretString::from(response.access_token);
        held.expires_at = response.expires_in.map(expires_at_from_now);
        if let Some(rotated) = response.refresh_token {
            held.refresh_token = SecretString::from(rotated);
        }
        Ok(held.to_session())
    }
}

fn expires_at_from_now(expires_in: u64) -> i64 {
    let now = chrono::Utc::now().timestamp();
    #[allow(clippy::cast_possible_wrap)]
    let expires_in = expires_in as i64;
    now.saturating_add(expires_in)
}

#[async_trait]
impl IdentityProvider for HttpIdentityProvider {
    async fn current_session(&self) -> Result<Option<Session>, ProviderError> {
        Ok(self
            .session
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .as_ref()
            .map(HeldSession::to_session))
    }

    #[instrument(skip_all)]
    async fn refresh_session(&self) -> Result<Session, ProviderError> {
        let Some(refresh_token) = self.refresh_token() else {
            debug!(target: "credential_refresh.provider", "No refresh token held");
            return Err(ProviderError::NoSession);
        };

        debug!(
            target: "credential_refresh.provider",
            client_id = %self.config.client_id,
            url = %self.config.token_endpoint,
            "Requesting token refresh"
        );

        let form_body = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token.expose_secret()),
            ("client_id", self.config.client_id.as_str()),
        ];

        let response = self
            .http_client
            .post(&self.config.token_endpoint)
            .form(&form_body)
            .send()
            .await
            .map_err(|e| {
                debug!(target: "credential_refresh.provider", error = %e, "HTTP request failed");
                ProviderError::Http(e.to_string())
            })?;

        let status = response.status();

        if status.is_success() {
            let token_response: OAuthTokenResponse = response.json().await.map_err(|e| {
                warn!(target: "credential_refresh.provider", error = %e, "Failed to parse token response");
                ProviderError::InvalidResponse(e.to_string())
            })?;

            debug!(
                target: "credential_refresh.provider",
                expires_in_secs = ?token_response.expires_in,
                rotated = token_response.refresh_token.is_some(),
                "Token refreshed"
            );

            self.commit(token_response)
        } else if status.as_u16() == 401 || status.as_u16() == 400 {
            let body = response.text().await.unwrap_or_else(|e| {
                trace!(target: "credential_refresh.provider", error = %e, "Failed to read error response body");
                "<failed to read body>".to_string()
            });
            warn!(
                target: "credential_refresh.provider",
                status = %status,
                "Refresh grant rejected, session is gone"
            );
            trace!(
                target: "credential_refresh.provider",
                body = %body,
                "Refresh rejection response body"
            );
            self.sign_out();
            Err(ProviderError::NoSession)
        } else if status.is_server_error() {
            warn!(
                target: "credential_refresh.provider",
                status = %status,
                "Identity provider returned server error"
            );
            Err(ProviderError::Http(format!("server error: {status}")))
        } else {
            warn!(
                target: "credential_refresh.provider",
                status = %status,
                "Unexpected response from identity provider"
            );
            Err(ProviderError::Http(format!("Unexpected status: {status}")))
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
