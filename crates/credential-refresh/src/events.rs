//! Refresh notifications.
//!
//! Two delivery styles are offered:
//!
//! - [`EventNotifier`]: typed callbacks per [`EventKind`], each registration
//!   returning a [`Subscription`] handle that unsubscribes when dropped.
//! - [`TokenReceiver`]: a watch channel carrying the current token, for
//!   long-lived consumers (e.g., a persistent connection) that re-authenticate
//!   whenever it changes.
//!
//! Handlers run outside every coordinator lock. A handler that panics is
//! logged and skipped; the remaining handlers still receive the event.

use crate::error::TokenError;
use crate::observability::metrics;
use crate::secret::SecretString;
use crate::session::Credential;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tokio::sync::watch;
use tracing::{trace, warn};

// =============================================================================
// Events
// =============================================================================

/// Notification published by the coordinator.
#[derive(Debug, Clone)]
pub enum TokenEvent {
    /// A refresh succeeded.
    Refreshed(Credential),
    /// A refresh failed; the previous credential (if any) is kept unless the
    /// error is `TokenError::NoSession`.
    RefreshFailed(TokenError),
    /// The credential was cleared (sign-out).
    Cleared,
}

impl TokenEvent {
    /// Kind used for subscription routing.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Refreshed(_) => EventKind::Refreshed,
            Self::RefreshFailed(_) => EventKind::RefreshFailed,
            Self::Cleared => EventKind::Cleared,
        }
    }
}

/// Event kinds a handler can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Refreshed,
    RefreshFailed,
    Cleared,
}

impl EventKind {
    /// Stable name (also the metric label).
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Refreshed => "refreshed",
            Self::RefreshFailed => "refresh_failed",
            Self::Cleared => "cleared",
        }
    }
}

// =============================================================================
// Notifier
// =============================================================================

type Handler = Arc<dyn Fn(&TokenEvent) + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: u64,
    handlers: Vec<(u64, EventKind, Handler)>,
}

/// Callback registry for [`TokenEvent`]s.
#[derive(Clone, Default)]
pub struct EventNotifier {
    registry: Arc<Mutex<Registry>>,
}

impl std::fmt::Debug for EventNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("EventNotifier")
            .field("handlers", &registry.handlers.len())
            .finish()
    }
}

impl EventNotifier {
    /// Create a notifier with no handlers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for events of `kind`.
    ///
    /// The handler stays registered until the returned [`Subscription`] is
    /// dropped or [`Subscription::unsubscribe`] is called.
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&TokenEvent) + Send + Sync + 'static,
    {
        let mut registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
        let id = registry.next_id;
        registry.next_id += 1;
        registry.handlers.push((id, kind, Arc::new(handler)));
        trace!(
            target: "credential_refresh.events",
            subscription_id = id,
            event = kind.as_str(),
            "Handler subscribed"
        );

        Subscription {
            id,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Deliver `event` to every handler subscribed to its kind.
    ///
    /// Returns the number of handlers that completed without panicking.
    pub fn publish(&self, event: &TokenEvent) -> usize {
        let kind = event.kind();
        let handlers: Vec<Handler> = {
            let registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
            registry
                .handlers
                .iter()
                .filter(|(_, k, _)| *k == kind)
                .map(|(_, _, handler)| Arc::clone(handler))
                .collect()
        };

        let mut delivered = 0;
        for handler in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(()) => delivered += 1,
                Err(_) => {
                    warn!(
                        target: "credential_refresh.events",
                        event = kind.as_str(),
                        "Event handler panicked, continuing delivery"
                    );
                    metrics::record_handler_panic(kind.as_str());
                }
            }
        }
        delivered
    }

    /// Number of handlers subscribed to `kind`.
    #[must_use]
    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .handlers
            .iter()
            .filter(|(_, k, _)| *k == kind)
            .count()
    }
}

/// Registration handle returned by [`EventNotifier::subscribe`].
#[must_use = "dropping a Subscription unsubscribes its handler"]
pub struct Subscription {
    id: u64,
    registry: Weak<Mutex<Registry>>,
}

impl Subscription {
    /// Remove the handler now.
    pub fn unsubscribe(self) {
        // Drop does the work
    }

    /// Identifier of this registration.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .handlers
                .retain(|(id, _, _)| *id != self.id);
        }
    }
}

// =============================================================================
// Token Receiver
// =============================================================================

/// Wrapper around a watch receiver carrying the current token.
///
/// `None` means there is no session (never signed in, cleared, or the
/// provider reported the session gone).
#[derive(Clone)]
pub struct TokenReceiver(watch::Receiver<Option<SecretString>>);

impl TokenReceiver {
    /// Create a `TokenReceiver` from a watch receiver.
    ///
    /// Useful in tests of consumers that do not need a full coordinator.
    #[must_use]
    pub fn from_watch_receiver(receiver: watch::Receiver<Option<SecretString>>) -> Self {
        Self(receiver)
    }

    /// Get the current token.
    ///
    /// Clones so the borrow on the channel is released immediately.
    #[must_use]
    pub fn token(&self) -> Option<SecretString> {
        self.0.borrow().clone()
    }

    /// Wait for the token to change.
    ///
    /// # Errors
    ///
    /// Returns `TokenError::ChannelClosed` if the coordinator is dropped.
    pub async fn changed(&mut self) -> Result<(), TokenError> {
        self.0
            .changed()
            .await
            .map_err(|_| TokenError::ChannelClosed)
    }
}

impl std::fmt::Debug for TokenReceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenReceiver")
            .field("token", &"[REDACTED]")
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
