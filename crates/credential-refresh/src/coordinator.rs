//! Single-flight refresh coordinator.
//!
//! Owns the in-memory credential and decides, under one mutex, whether a
//! caller gets the cached credential, joins the in-flight attempt, or starts
//! a new one. Attempts run in their own task so a caller dropping its future
//! never strands the callers queued behind it.
//!
//! # State machine
//!
//! ```text
//!            refresh() while Idle
//!   Idle ─────────────────────────────▶ InFlight { epoch, waiters }
//!    ▲                                      │
//!    └──────── settle (one critical section)┘
//!              swap to Idle + detach waiters
//! ```
//!
//! Settlement commits the outcome (credential, failure counter, store)
//! only when no `clear()` happened since the attempt started. Events, the
//! watch channel and the waiters are served after the lock is released.

use crate::backoff::BackoffPolicy;
use crate::clock::{is_fresh, Clock};
use crate::config::CoordinatorConfig;
use crate::error::{StoreError, TokenError};
use crate::events::{EventKind, EventNotifier, Subscription, TokenEvent, TokenReceiver};
use crate::observability::metrics;
use crate::provider::IdentityProvider;
use crate::secret::{ExposeSecret, SecretString};
use crate::session::{Credential, PersistedSession, Session};
use crate::store::CredentialStore;
use crate::waiters::{PendingWaiter, RefreshResult, WaiterQueue};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, instrument, trace, warn};

const LOG_TARGET: &str = "credential_refresh.coordinator";

// =============================================================================
// State
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttemptOutcome {
    Succeeded,
    Failed,
}

#[derive(Debug)]
enum AttemptState {
    Idle,
    InFlight { epoch: u64, waiters: WaiterQueue },
}

#[derive(Debug)]
struct CoordinatorState {
    credential: Option<Credential>,
    failures: u32,
    last_attempt: Option<Instant>,
    last_outcome: Option<AttemptOutcome>,
    attempt: AttemptState,
    epoch: u64,
    /// Tokens invalidated by `clear()`: the one cleared and any produced by
    /// an attempt from an earlier epoch. Reported sessions carrying them are
    /// ignored until the provider reports no session or a different token.
    revoked: Vec<SecretString>,
}

impl CoordinatorState {
    fn new() -> Self {
        Self {
            credential: None,
            failures: 0,
            last_attempt: None,
            last_outcome: None,
            attempt: AttemptState::Idle,
            epoch: 0,
            revoked: Vec::new(),
        }
    }

    fn is_revoked(&self, token: &SecretString) -> bool {
        self.revoked
            .iter()
            .any(|revoked| revoked.expose_secret() == token.expose_secret())
    }
}

/// Side effects computed under the lock and performed after it is released.
struct Settlement {
    event: Option<TokenEvent>,
    publish: Option<Option<SecretString>>,
    waiters: WaiterQueue,
    result: RefreshResult,
}

// =============================================================================
// Coordinator
// =============================================================================

/// Keeps one bearer credential valid for many concurrent consumers.
///
/// Construct one per process (usually through
/// [`TokenManager`](crate::manager::TokenManager)) and share it behind an
/// `Arc`.
pub struct RefreshCoordinator {
    provider: Arc<dyn IdentityProvider>,
    store: Arc<dyn CredentialStore>,
    clock: Arc<dyn Clock>,
    config: CoordinatorConfig,
    backoff: BackoffPolicy,
    state: Mutex<CoordinatorState>,
    notifier: EventNotifier,
    token_tx: watch::Sender<Option<SecretString>>,
}

impl std::fmt::Debug for RefreshCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshCoordinator")
            .field("config", &self.config)
            .field("failures", &self.failure_count())
            .field("refreshing", &self.is_refreshing())
            .finish_non_exhaustive()
    }
}

impl RefreshCoordinator {
    /// Create a coordinator with no credential loaded.
    ///
    /// The persisted credential, if any, is loaded lazily the first time the
    /// provider cannot answer a session lookup.
    #[must_use]
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        store: Arc<dyn CredentialStore>,
        clock: Arc<dyn Clock>,
        config: CoordinatorConfig,
    ) -> Self {
        let (token_tx, _) = watch::channel(None);
        Self {
            provider,
            store,
            clock,
            backoff: config.backoff_policy(),
            config,
            state: Mutex::new(CoordinatorState::new()),
            notifier: EventNotifier::new(),
            token_tx,
        }
    }

    /// The configuration in use.
    #[must_use]
    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    /// Current credential without any freshness guarantee.
    ///
    /// Asks the provider first. When the provider cannot answer, falls back
    /// to the in-memory credential and then to the persisted one. A reported
    /// session whose token was invalidated by [`clear`](Self::clear) counts
    /// as no session.
    #[instrument(skip_all)]
    pub async fn get_token(&self) -> Option<Credential> {
        match self.provider.current_session().await {
            Ok(Some(session)) => self.mirror(session),
            Ok(None) => {
                trace!(target: LOG_TARGET, "Provider reports no session");
                self.lock_state().revoked.clear();
                None
            }
            Err(e) => {
                debug!(
                    target: LOG_TARGET,
                    error = %e,
                    "Session lookup unavailable, using cached credential"
                );
                self.cached_or_persisted()
            }
        }
    }

    /// A credential that stays valid for at least the refresh buffer.
    ///
    /// Returns `Ok(None)` when there is no session; no refresh is attempted in
    /// that case.
    ///
    /// # Errors
    ///
    /// The error of the refresh attempt this call started or joined.
    #[instrument(skip_all)]
    pub async fn get_token_with_refresh(self: &Arc<Self>) -> Result<Option<Credential>, TokenError> {
        let Some(current) = self.get_token().await else {
            return Ok(None);
        };

        if is_fresh(Some(&current), self.config.refresh_buffer, self.clock.now()) {
            return Ok(Some(current));
        }

        session_outcome(self.refresh().await)
    }

    /// Refresh regardless of the current expiry.
    ///
    /// Joins the in-flight attempt if there is one.
    ///
    /// # Errors
    ///
    /// The error of the refresh attempt this call started or joined.
    #[instrument(skip_all)]
    pub async fn force_refresh(self: &Arc<Self>) -> Result<Option<Credential>, TokenError> {
        if self.get_token().await.is_none() {
            return Ok(None);
        }

        {
            let mut state = self.lock_state();
            if let Some(credential) = state.credential.as_mut() {
                credential.invalidate_expiry();
            }
        }

        session_outcome(self.refresh().await)
    }

    /// In-memory credential, without probing or suspending.
    #[must_use]
    pub fn cached_token(&self) -> Option<Credential> {
        self.lock_state().credential.clone()
    }

    /// Consecutive failed attempts since the last success.
    #[must_use]
    pub fn failure_count(&self) -> u32 {
        self.lock_state().failures
    }

    /// Whether an attempt is in flight.
    #[must_use]
    pub fn is_refreshing(&self) -> bool {
        matches!(self.lock_state().attempt, AttemptState::InFlight { .. })
    }

    // -------------------------------------------------------------------------
    // Clear
    // -------------------------------------------------------------------------

    /// Drop the credential and all refresh bookkeeping.
    ///
    /// Does not wait for an in-flight attempt; that attempt still settles its
    /// own waiters but its result is not committed. The cleared token, and
    /// any token that in-flight attempt produces, is not picked up again
    /// from the provider.
    pub fn clear(&self) {
        let epoch = {
            let mut state = self.lock_state();
            let cleared = match state.credential.take() {
                Some(credential) => Some(credential.token().clone()),
                None => self.persisted_token(),
            };
            if let Some(token) = cleared {
                if !state.is_revoked(&token) {
                    state.revoked.push(token);
                }
            }
            state.failures = 0;
            state.last_attempt = None;
            state.last_outcome = None;
            state.epoch = state.epoch.wrapping_add(1);
            self.remove_persisted();
            state.epoch
        };

        info!(target: LOG_TARGET, epoch, "Credential cleared");
        self.notifier.publish(&TokenEvent::Cleared);
        self.token_tx.send_replace(None);
    }

    // -------------------------------------------------------------------------
    // Notifications
    // -------------------------------------------------------------------------

    /// Register a handler for one kind of [`TokenEvent`].
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&TokenEvent) + Send + Sync + 'static,
    {
        self.notifier.subscribe(kind, handler)
    }

    /// Receiver that tracks the current token.
    #[must_use]
    pub fn receiver(&self) -> TokenReceiver {
        TokenReceiver::from_watch_receiver(self.token_tx.subscribe())
    }

    /// The event notifier (for introspection).
    #[must_use]
    pub fn notifier(&self) -> &EventNotifier {
        &self.notifier
    }

    // -------------------------------------------------------------------------
    // Refresh protocol
    // -------------------------------------------------------------------------

    async fn refresh(self: &Arc<Self>) -> RefreshResult {
        let waiter: PendingWaiter = {
            let mut guard = self.lock_state();
            let state = &mut *guard;

            if let Some(credential) = self.recent_fresh_credential(state) {
                trace!(target: LOG_TARGET, "Recent attempt produced a fresh credential");
                return Ok(credential);
            }

            if let AttemptState::InFlight { waiters, .. } = &mut state.attempt {
                trace!(
                    target: LOG_TARGET,
                    queued = waiters.len() + 1,
                    "Joining in-flight refresh"
                );
                waiters.enqueue()
            } else {
                let mut waiters = WaiterQueue::new();
                let waiter = waiters.enqueue();
                let epoch = state.epoch;
                let failures = state.failures;
                state.attempt = AttemptState::InFlight { epoch, waiters };
                state.last_attempt = Some(Instant::now());
                self.spawn_attempt(failures);
                waiter
            }
        };

        waiter.wait().await
    }

    /// The cached credential if the last attempt succeeded recently enough
    /// and it is still fresh.
    fn recent_fresh_credential(&self, state: &CoordinatorState) -> Option<Credential> {
        if !matches!(state.attempt, AttemptState::Idle)
            || state.last_outcome != Some(AttemptOutcome::Succeeded)
        {
            return None;
        }
        let started = state.last_attempt?;
        if started.elapsed() >= self.config.min_refresh_interval {
            return None;
        }
        let credential = state.credential.as_ref()?;
        is_fresh(Some(credential), self.config.refresh_buffer, self.clock.now())
            .then(|| credential.clone())
    }

    fn spawn_attempt(self: &Arc<Self>, failures: u32) {
        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            let guard = AttemptGuard::new(Arc::clone(&coordinator));

            let delay = coordinator.backoff.next_delay(failures);
            if !delay.is_zero() {
                debug!(
                    target: LOG_TARGET,
                    failures,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "Backing off before refresh"
                );
                tokio::time::sleep(delay).await;
            }

            let started = Instant::now();
            let timeout = coordinator.config.refresh_timeout;
            let outcome =
                match tokio::time::timeout(timeout, coordinator.provider.refresh_session()).await {
                    Ok(Ok(session)) => Ok(session),
                    Ok(Err(e)) => Err(TokenError::from(e)),
                    Err(_) => Err(TokenError::Timeout(timeout)),
                };

            match &outcome {
                Ok(_) => metrics::record_refresh_attempt("success", None, started.elapsed()),
                Err(e) => metrics::record_refresh_attempt("error", Some(e.kind()), started.elapsed()),
            }

            guard.settle(outcome);
        });
    }

    /// Finish the in-flight attempt with `outcome`.
    fn settle(&self, outcome: Result<Session, TokenError>) {
        let now = self.clock.now();
        let settlement = {
            let mut guard = self.lock_state();
            let state = &mut *guard;

            let AttemptState::InFlight { epoch, waiters } =
                std::mem::replace(&mut state.attempt, AttemptState::Idle)
            else {
                debug!(target: LOG_TARGET, "No attempt in flight, nothing to settle");
                return;
            };
            let current = epoch == state.epoch;

            match outcome {
                Ok(session) => {
                    let credential = Credential::from_session(session, now);
                    if !current && !state.is_revoked(credential.token()) {
                        state.revoked.push(credential.token().clone());
                    }
                    if current {
                        state.credential = Some(credential.clone());
                        state.failures = 0;
                        state.last_outcome = Some(AttemptOutcome::Succeeded);
                        self.persist(&credential);
                        debug!(
                            target: LOG_TARGET,
                            expires_at = ?credential.expires_at(),
                            waiters = waiters.len(),
                            "Credential refreshed"
                        );
                    }
                    Settlement {
                        event: current.then(|| TokenEvent::Refreshed(credential.clone())),
                        publish: current.then(|| Some(credential.token().clone())),
                        waiters,
                        result: Ok(credential),
                    }
                }
                Err(TokenError::NoSession) => {
                    if current {
                        state.credential = None;
                        state.last_outcome = Some(AttemptOutcome::Failed);
                        self.remove_persisted();
                        info!(target: LOG_TARGET, "Session ended during refresh");
                    }
                    Settlement {
                        event: current.then_some(TokenEvent::RefreshFailed(TokenError::NoSession)),
                        publish: current.then_some(None),
                        waiters,
                        result: Err(TokenError::NoSession),
                    }
                }
                Err(err) => {
                    if current {
                        state.failures = state.failures.saturating_add(1);
                        state.last_outcome = Some(AttemptOutcome::Failed);
                        warn!(
                            target: LOG_TARGET,
                            error = %err,
                            failures = state.failures,
                            "Credential refresh failed"
                        );
                    }
                    Settlement {
                        event: current.then(|| TokenEvent::RefreshFailed(err.clone())),
                        publish: None,
                        waiters,
                        result: Err(err),
                    }
                }
            }
        };

        if settlement.event.is_none() {
            debug!(
                target: LOG_TARGET,
                "Credential cleared during refresh, result not committed"
            );
        }

        let Settlement {
            event,
            publish,
            waiters,
            result,
        } = settlement;

        if let Some(event) = event {
            self.notifier.publish(&event);
        }
        if let Some(token) = publish {
            self.token_tx.send_replace(token);
        }
        metrics::record_waiters(waiters.len());
        waiters.drain_all(&result);
    }

    // -------------------------------------------------------------------------
    // Memory and store
    // -------------------------------------------------------------------------

    /// Mirror a reported session into memory and the store.
    ///
    /// Returns `None` for a session carrying a revoked token.
    fn mirror(&self, session: Session) -> Option<Credential> {
        let now = self.clock.now();
        let credential = {
            let mut state = self.lock_state();
            if state.is_revoked(&session.access_token) {
                trace!(target: LOG_TARGET, "Ignoring cleared session reported by provider");
                return None;
            }
            if let Some(existing) = state.credential.as_ref().filter(|existing| {
                existing.token().expose_secret() == session.access_token.expose_secret()
                    && existing.expires_at() == session.expires_at
            }) {
                return Some(existing.clone());
            }

            // A new session supersedes everything cleared before it
            state.revoked.clear();
            let credential = Credential::from_session(session, now);
            state.credential = Some(credential.clone());
            self.persist(&credential);
            credential
        };

        trace!(target: LOG_TARGET, "Mirrored provider session");
        self.token_tx.send_replace(Some(credential.token().clone()));
        Some(credential)
    }

    /// In-memory credential, hydrated from the store when memory is empty.
    fn cached_or_persisted(&self) -> Option<Credential> {
        let mut state = self.lock_state();
        if let Some(credential) = &state.credential {
            return Some(credential.clone());
        }

        let credential = self.load_persisted()?;
        debug!(target: LOG_TARGET, "Hydrated credential from store");
        state.credential = Some(credential.clone());
        Some(credential)
    }

    fn load_persisted(&self) -> Option<Credential> {
        let token = match self.store.get(&self.config.token_key) {
            Ok(token) => token?,
            Err(e) => {
                self.store_failed("get", &e);
                return None;
            }
        };

        let metadata = match self.store.get(&self.config.session_key) {
            Ok(Some(raw)) => match serde_json::from_str::<PersistedSession>(&raw) {
                Ok(metadata) => Some(metadata),
                Err(e) => {
                    self.store_failed("get", &StoreError::from(e));
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                self.store_failed("get", &e);
                None
            }
        };

        let (expires_at, refreshed_at) = metadata.map_or((None, self.clock.now()), |m| {
            (m.expires_at, m.refreshed_at)
        });
        Some(Credential::new(
            SecretString::from(token),
            expires_at,
            refreshed_at,
        ))
    }

    fn persisted_token(&self) -> Option<SecretString> {
        match self.store.get(&self.config.token_key) {
            Ok(token) => token.map(SecretString::from),
            Err(e) => {
                self.store_failed("get", &e);
                None
            }
        }
    }

    fn persist(&self, credential: &Credential) {
        if let Err(e) = self
            .store
            .set(&self.config.token_key, credential.token().expose_secret())
        {
            self.store_failed("set", &e);
            return;
        }

        let result = serde_json::to_string(&credential.metadata())
            .map_err(StoreError::from)
            .and_then(|json| self.store.set(&self.config.session_key, &json));
        if let Err(e) = result {
            self.store_failed("set", &e);
        }
    }

    fn remove_persisted(&self) {
        for key in [&self.config.token_key, &self.config.session_key] {
            if let Err(e) = self.store.remove(key) {
                self.store_failed("remove", &e);
            }
        }
    }

    fn store_failed(&self, operation: &str, error: &StoreError) {
        warn!(
            target: "credential_refresh.store",
            operation,
            error = %error,
            "Credential store operation failed"
        );
        metrics::record_store_error(operation);
    }

    fn lock_state(&self) -> MutexGuard<'_, CoordinatorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// `NoSession` from a refresh means the caller has no token, not an error.
fn session_outcome(result: RefreshResult) -> Result<Option<Credential>, TokenError> {
    match result {
        Ok(credential) => Ok(Some(credential)),
        Err(TokenError::NoSession) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Settles the in-flight attempt with `Aborted` unless disarmed by
/// [`AttemptGuard::settle`]; covers task cancellation and panics.
struct AttemptGuard {
    coordinator: Option<Arc<RefreshCoordinator>>,
}

impl AttemptGuard {
    fn new(coordinator: Arc<RefreshCoordinator>) -> Self {
        Self {
            coordinator: Some(coordinator),
        }
    }

    fn settle(mut self, outcome: Result<Session, TokenError>) {
        if let Some(coordinator) = self.coordinator.take() {
            coordinator.settle(outcome);
        }
    }
}

impl Drop for AttemptGuard {
    fn drop(&mut self) {
        if let Some(coordinator) = self.coordinator.take() {
            warn!(target: LOG_TARGET, "Refresh attempt ended without an outcome");
            coordinator.settle(Err(TokenError::Aborted(
                "refresh task cancelled or panicked".to_string(),
            )));
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::ProviderError;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const NOW: i64 = 1_700_000_000;

    /// Provider answering refreshes from a script.
    #[derive(Default)]
    struct ScriptedProvider {
        current: Mutex<Option<Session>>,
        lookup_unavailable: std::sync::atomic::AtomicBool,
        outcomes: Mutex<VecDeque<Result<Session, ProviderError>>>,
        refresh_calls: AtomicUsize,
    }

    impl ScriptedProvider {
        fn with_session(session: Session) -> Self {
            let provider = Self::default();
            *provider.current.lock().unwrap() = Some(session);
            provider
        }

        fn push(&self, outcome: Result<Session, ProviderError>) {
            self.outcomes.lock().unwrap().push_back(outcome);
        }

        fn calls(&self) -> usize {
            self.refresh_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl IdentityProvider for ScriptedProvider {
        async fn current_session(&self) -> Result<Option<Session>, ProviderError> {
            if self.lookup_unavailable.load(Ordering::SeqCst) {
                return Err(ProviderError::Unavailable("offline".into()));
            }
            Ok(self.current.lock().unwrap().clone())
        }

        async fn refresh_session(&self) -> Result<Session, ProviderError> {
            self.refresh_calls.fetch_add(1, Ordering::SeqCst);
            let outcome = self
                .outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(ProviderError::Http("script exhausted".into())));
            if let Ok(session) = &outcome {
                *self.current.lock().unwrap() = Some(session.clone());
            }
            outcome
        }
    }

    struct Fixture {
        provider: Arc<ScriptedProvider>,
        store: Arc<MemoryStore>,
        clock: Arc<ManualClock>,
        coordinator: Arc<RefreshCoordinator>,
    }

    fn fixture(provider: ScriptedProvider, config: CoordinatorConfig) -> Fixture {
        let provider = Arc::new(provider);
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(NOW));
        let coordinator = Arc::new(RefreshCoordinator::new(
            provider.clone(),
            store.clone(),
            clock.clone(),
            config,
        ));
        Fixture {
            provider,
            store,
            clock,
            coordinator,
        }
    }

    fn fast_config() -> CoordinatorConfig {
        CoordinatorConfig::new()
            .with_refresh_buffer(Duration::from_secs(30))
            .with_backoff(Duration::ZERO, Duration::ZERO)
    }

    #[tokio::test]
    async fn test_fresh_token_returned_without_refresh() {
        let f = fixture(
            ScriptedProvider::with_session(Session::new("fresh", NOW + 3600)),
            fast_config(),
        );

        let credential = f.coordinator.get_token_with_refresh().await.unwrap().unwrap();

        assert_eq!(credential.token().expose_secret(), "fresh");
        assert_eq!(f.provider.calls(), 0);
    }

    #[tokio::test]
    async fn test_no_session_returns_none_without_refresh() {
        let f = fixture(ScriptedProvider::default(), fast_config());

        assert!(f.coordinator.get_token_with_refresh().await.unwrap().is_none());
        assert!(f.coordinator.force_refresh().await.unwrap().is_none());
        assert_eq!(f.provider.calls(), 0);
    }

    #[tokio::test]
    async fn test_stale_token_is_refreshed_and_persisted() {
        let f = fixture(
            ScriptedProvider::with_session(Session::new("old", NOW + 10)),
            fast_config(),
        );
        f.provider.push(Ok(Session::new("new", NOW + 3600)));

        let credential = f.coordinator.get_token_with_refresh().await.unwrap().unwrap();

        assert_eq!(credential.token().expose_secret(), "new");
        assert_eq!(credential.refreshed_at(), NOW);
        assert_eq!(f.provider.calls(), 1);
        assert_eq!(f.coordinator.failure_count(), 0);
        assert!(!f.coordinator.is_refreshing());
        assert_eq!(
            f.store.get("auth.access_token").unwrap().as_deref(),
            Some("new")
        );
        let metadata: PersistedSession =
            serde_json::from_str(&f.store.get("auth.session").unwrap().unwrap()).unwrap();
        assert_eq!(metadata.expires_at, Some(NOW + 3600));
    }

    #[tokio::test]
    async fn test_failure_keeps_stale_token() {
        let f = fixture(
            ScriptedProvider::with_session(Session::new("stale", NOW + 10)),
            fast_config(),
        );
        f.provider.push(Err(ProviderError::Http("server error: 503".into())));

        let err = f.coordinator.get_token_with_refresh().await.unwrap_err();

        assert!(matches!(err, TokenError::Provider(_)));
        assert_eq!(f.coordinator.failure_count(), 1);
        let cached = f.coordinator.cached_token().unwrap();
        assert_eq!(cached.token().expose_secret(), "stale");
        assert_eq!(
            f.coordinator.get_token().await.unwrap().token().expose_secret(),
            "stale"
        );
    }

    #[tokio::test]
    async fn test_no_session_during_refresh_drops_credential() {
        let f = fixture(
            ScriptedProvider::with_session(Session::new("stale", NOW + 10)),
            fast_config(),
        );
        f.provider.push(Err(ProviderError::NoSession));

        assert!(f.coordinator.get_token_with_refresh().await.unwrap().is_none());

        assert_eq!(f.coordinator.failure_count(), 0);
        assert!(f.coordinator.cached_token().is_none());
        assert!(f.store.is_empty());
    }

    #[tokio::test]
    async fn test_force_refresh_bypasses_fresh_token() {
        let f = fixture(
            ScriptedProvider::with_session(Session::new("fresh", NOW + 3600)),
            fast_config(),
        );
        f.provider.push(Ok(Session::new("forced", NOW + 7200)));

        let credential = f.coordinator.force_refresh().await.unwrap().unwrap();

        assert_eq!(credential.token().expose_secret(), "forced");
        assert_eq!(f.provider.calls(), 1);
    }

    #[tokio::test]
    async fn test_timeout_counts_as_failure() {
        struct HangingProvider;

        #[async_trait]
        impl IdentityProvider for HangingProvider {
            async fn current_session(&self) -> Result<Option<Session>, ProviderError> {
                Ok(Some(Session::new("stale", NOW)))
            }
            async fn refresh_session(&self) -> Result<Session, ProviderError> {
                std::future::pending().await
            }
        }

        let coordinator = Arc::new(RefreshCoordinator::new(
            Arc::new(HangingProvider),
            Arc::new(MemoryStore::new()),
            Arc::new(ManualClock::new(NOW)),
            fast_config().with_refresh_timeout(Duration::from_millis(20)),
        ));

        let err = coordinator.get_token_with_refresh().await.unwrap_err();

        assert_eq!(err, TokenError::Timeout(Duration::from_millis(20)));
        assert_eq!(coordinator.failure_count(), 1);
        assert!(!coordinator.is_refreshing());
    }

    #[tokio::test]
    async fn test_success_resets_failures() {
        let f = fixture(
            ScriptedProvider::with_session(Session::new("stale", NOW + 10)),
            fast_config(),
        );
        f.provider.push(Err(ProviderError::Http("boom".into())));
        f.provider.push(Err(ProviderError::Http("boom".into())));
        f.provider.push(Ok(Session::new("new", NOW + 3600)));

        assert!(f.coordinator.get_token_with_refresh().await.is_err());
        assert!(f.coordinator.get_token_with_refresh().await.is_err());
        assert_eq!(f.coordinator.failure_count(), 2);

        f.coordinator.get_token_with_refresh().await.unwrap();
        assert_eq!(f.coordinator.failure_count(), 0);
    }

    #[tokio::test]
    async fn test_recent_success_short_circuits_refresh() {
        let f = fixture(
            ScriptedProvider::with_session(Session::new("old", NOW + 10)),
            fast_config().with_min_refresh_interval(Duration::from_secs(60)),
        );
        f.provider.push(Ok(Session::new("new", NOW + 3600)));

        f.coordinator.get_token_with_refresh().await.unwrap();

        // The protocol itself returns the recent result without calling out
        let again = f.coordinator.refresh().await.unwrap();
        assert_eq!(again.token().expose_secret(), "new");
        assert_eq!(f.provider.calls(), 1);
    }

    #[tokio::test]
    async fn test_recent_failure_does_not_short_circuit() {
        let f = fixture(
            ScriptedProvider::with_session(Session::new("old", NOW + 10)),
            fast_config().with_min_refresh_interval(Duration::from_secs(60)),
        );
        f.provider.push(Err(ProviderError::Http("boom".into())));
        f.provider.push(Ok(Session::new("new", NOW + 3600)));

        assert!(f.coordinator.get_token_with_refresh().await.is_err());
        let credential = f.coordinator.get_token_with_refresh().await.unwrap().unwrap();

        assert_eq!(credential.token().expose_secret(), "new");
        assert_eq!(f.provider.calls(), 2);
    }

    #[tokio::test]
    async fn test_clear_resets_state_and_store() {
        let f = fixture(
            ScriptedProvider::with_session(Session::new("token", NOW + 3600)),
            fast_config(),
        );
        f.coordinator.get_token().await.unwrap();
        assert!(!f.store.is_empty());

        let mut receiver = f.coordinator.receiver();
        f.coordinator.clear();

        assert!(f.coordinator.cached_token().is_none());
        assert_eq!(f.coordinator.failure_count(), 0);
        assert!(f.store.is_empty());
        receiver.changed().await.unwrap();
        assert!(receiver.token().is_none());
    }

    #[tokio::test]
    async fn test_clear_sticks_while_provider_signed_in() {
        let f = fixture(
            ScriptedProvider::with_session(Session::new("token", NOW + 3600)),
            fast_config(),
        );
        f.coordinator.get_token().await.unwrap();

        f.coordinator.clear();

        assert!(f.coordinator.get_token().await.is_none());
        assert!(f.coordinator.get_token_with_refresh().await.unwrap().is_none());
        assert!(f.coordinator.force_refresh().await.unwrap().is_none());
        assert!(f.coordinator.cached_token().is_none());
        assert!(f.store.is_empty());
        assert!(f.coordinator.receiver().token().is_none());
        assert_eq!(f.provider.calls(), 0);
    }

    #[tokio::test]
    async fn test_new_sign_in_after_clear_is_adopted() {
        let f = fixture(
            ScriptedProvider::with_session(Session::new("old", NOW + 3600)),
            fast_config(),
        );
        f.coordinator.get_token().await.unwrap();
        f.coordinator.clear();
        assert!(f.coordinator.get_token().await.is_none());

        *f.provider.current.lock().unwrap() = Some(Session::new("new", NOW + 3600));

        let credential = f.coordinator.get_token().await.unwrap();
        assert_eq!(credential.token().expose_secret(), "new");
        assert_eq!(f.coordinator.cached_token(), Some(credential));
        assert!(!f.store.is_empty());
    }

    #[tokio::test]
    async fn test_clear_before_first_read_revokes_persisted_token() {
        let f = fixture(
            ScriptedProvider::with_session(Session::new("persisted", NOW + 3600)),
            fast_config(),
        );
        f.store.set("auth.access_token", "persisted").unwrap();

        f.coordinator.clear();

        assert!(f.store.is_empty());
        assert!(f.coordinator.get_token().await.is_none());
    }

    #[tokio::test]
    async fn test_lookup_unavailable_falls_back_to_store() {
        let f = fixture(ScriptedProvider::default(), fast_config());
        f.provider.lookup_unavailable.store(true, Ordering::SeqCst);
        f.store.set("auth.access_token", "persisted").unwrap();
        f.store
            .set(
                "auth.session",
                r#"{"expires_at": 1700003600, "refreshed_at": 1699990000}"#,
            )
            .unwrap();

        let credential = f.coordinator.get_token().await.unwrap();

        assert_eq!(credential.token().expose_secret(), "persisted");
        assert_eq!(credential.expires_at(), Some(NOW + 3600));
        assert_eq!(credential.refreshed_at(), 1_699_990_000);
        // Hydrated into memory
        assert_eq!(f.coordinator.cached_token(), Some(credential));
    }

    #[tokio::test]
    async fn test_corrupt_metadata_yields_unknown_expiry() {
        let f = fixture(ScriptedProvider::default(), fast_config());
        f.provider.lookup_unavailable.store(true, Ordering::SeqCst);
        f.store.set("auth.access_token", "persisted").unwrap();
        f.store.set("auth.session", "{not json").unwrap();

        let credential = f.coordinator.get_token().await.unwrap();

        assert_eq!(credential.expires_at(), None);
        assert_eq!(credential.refreshed_at(), NOW);
    }

    #[tokio::test]
    async fn test_lookup_unavailable_with_empty_store_is_no_session() {
        let f = fixture(ScriptedProvider::default(), fast_config());
        f.provider.lookup_unavailable.store(true, Ordering::SeqCst);

        assert!(f.coordinator.get_token().await.is_none());
        assert!(f.coordinator.get_token_with_refresh().await.unwrap().is_none());
        assert_eq!(f.provider.calls(), 0);
    }

    #[tokio::test]
    async fn test_mirror_keeps_refreshed_at_for_unchanged_session() {
        let f = fixture(
            ScriptedProvider::with_session(Session::new("token", NOW + 3600)),
            fast_config(),
        );

        let first = f.coordinator.get_token().await.unwrap();
        f.clock.advance(Duration::from_secs(100));
        let second = f.coordinator.get_token().await.unwrap();

        assert_eq!(first, second);
        assert_eq!(second.refreshed_at(), NOW);
    }

    #[tokio::test]
    async fn test_refresh_events_published() {
        let f = fixture(
            ScriptedProvider::with_session(Session::new("old", NOW + 10)),
            fast_config(),
        );
        f.provider.push(Err(ProviderError::Http("boom".into())));
        f.provider.push(Ok(Session::new("new", NOW + 3600)));

        let events = Arc::new(Mutex::new(Vec::new()));
        let refreshed_sink = Arc::clone(&events);
        let failed_sink = Arc::clone(&events);
        let _a = f.coordinator.subscribe(EventKind::Refreshed, move |e| {
            refreshed_sink.lock().unwrap().push(e.kind());
        });
        let _b = f.coordinator.subscribe(EventKind::RefreshFailed, move |e| {
            failed_sink.lock().unwrap().push(e.kind());
        });

        let _ = f.coordinator.get_token_with_refresh().await;
        let _ = f.coordinator.get_token_with_refresh().await;

        assert_eq!(
            *events.lock().unwrap(),
            vec![EventKind::RefreshFailed, EventKind::Refreshed]
        );
    }

    #[tokio::test]
    async fn test_debug_does_not_leak_token() {
        let f = fixture(
            ScriptedProvider::with_session(Session::new("secret-value", NOW + 3600)),
            fast_config(),
        );
        f.coordinator.get_token().await.unwrap();

        let debug_str = format!("{:?}", f.coordinator);
        assert!(!debug_str.contains("secret-value"));
    }
}
