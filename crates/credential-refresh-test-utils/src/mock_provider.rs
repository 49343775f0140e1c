//! Scriptable identity provider.

use async_trait::async_trait;
use credential_refresh::error::ProviderError;
use credential_refresh::provider::IdentityProvider;
use credential_refresh::session::Session;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::time::Instant;

/// Identity provider driven by a queue of scripted refresh outcomes.
///
/// - `current_session()` returns the held session, or the configured lookup
///   error.
/// - `refresh_session()` counts the call, waits on the gate (if held), then
///   pops the next scripted outcome. A successful outcome replaces the held
///   session unless the provider was signed out meanwhile.
///
/// With nothing scripted, refreshes fail with `ProviderError::Http`.
pub struct MockIdentityProvider {
    current: Mutex<Option<Session>>,
    lookup_error: Mutex<Option<ProviderError>>,
    outcomes: Mutex<VecDeque<Result<Session, ProviderError>>>,
    gate: Mutex<Option<Arc<Semaphore>>>,
    delay: Mutex<Option<Duration>>,
    calls: watch::Sender<usize>,
    call_times: Mutex<Vec<Instant>>,
}

impl MockIdentityProvider {
    /// Provider with no session.
    pub fn new() -> Self {
        let (calls, _) = watch::channel(0);
        Self {
            current: Mutex::new(None),
            lookup_error: Mutex::new(None),
            outcomes: Mutex::new(VecDeque::new()),
            gate: Mutex::new(None),
            delay: Mutex::new(None),
            calls,
            call_times: Mutex::new(Vec::new()),
        }
    }

    /// Provider holding `session`.
    pub fn signed_in(session: Session) -> Self {
        let provider = Self::new();
        provider.set_session(Some(session));
        provider
    }

    /// Replace the held session.
    pub fn set_session(&self, session: Option<Session>) {
        *self.current.lock().unwrap() = session;
    }

    /// Drop the held session.
    pub fn sign_out(&self) {
        self.set_session(None);
    }

    /// Make `current_session()` fail (`Some`) or answer normally (`None`).
    pub fn set_lookup_error(&self, error: Option<ProviderError>) {
        *self.lookup_error.lock().unwrap() = error;
    }

    /// Queue the outcome of a future refresh.
    pub fn push_refresh(&self, outcome: Result<Session, ProviderError>) {
        self.outcomes.lock().unwrap().push_back(outcome);
    }

    pub fn push_success(&self, session: Session) {
        self.push_refresh(Ok(session));
    }

    pub fn push_failure(&self, error: ProviderError) {
        self.push_refresh(Err(error));
    }

    /// Block every refresh until [`release_refreshes`](Self::release_refreshes).
    pub fn hold_refreshes(&self) {
        *self.gate.lock().unwrap() = Some(Arc::new(Semaphore::new(0)));
    }

    /// Let `n` held refreshes proceed.
    pub fn release_refreshes(&self, n: usize) {
        if let Some(gate) = self.gate.lock().unwrap().as_ref() {
            gate.add_permits(n);
        }
    }

    /// Sleep for `delay` inside every refresh.
    pub fn set_refresh_delay(&self, delay: Option<Duration>) {
        *self.delay.lock().unwrap() = delay;
    }

    /// Number of `refresh_session()` calls so far.
    pub fn refresh_calls(&self) -> usize {
        *self.calls.borrow()
    }

    /// When each refresh call started (tokio time).
    pub fn refresh_call_times(&self) -> Vec<Instant> {
        self.call_times.lock().unwrap().clone()
    }

    /// Wait until at least `n` refresh calls have started.
    pub async fn wait_for_refresh_calls(&self, n: usize) {
        let mut rx = self.calls.subscribe();
        rx.wait_for(|calls| *calls >= n)
            .await
            .expect("call counter sender lives as long as the provider");
    }
}

impl Default for MockIdentityProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdentityProvider for MockIdentityProvider {
    async fn current_session(&self) -> Result<Option<Session>, ProviderError> {
        if let Some(error) = self.lookup_error.lock().unwrap().clone() {
            return Err(error);
        }
        Ok(self.current.lock().unwrap().clone())
    }

    async fn refresh_session(&self) -> Result<Session, ProviderError> {
        self.call_times.lock().unwrap().push(Instant::now());
        self.calls.send_modify(|calls| *calls += 1);

        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.acquire().await.expect("gate never closed").forget();
        }

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let outcome = self
            .outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ProviderError::Http("no scripted outcome".to_string())));

        if let Ok(session) = &outcome {
            let mut current = self.current.lock().unwrap();
            if current.is_some() {
                *current = Some(session.clone());
            }
        }
        outcome
    }
}
