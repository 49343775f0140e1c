//! Callers queued behind an in-flight refresh.
//!
//! Each caller that joins an attempt gets a one-shot continuation. When the
//! attempt settles, the coordinator detaches the whole queue under its lock
//! and drains it with the shared outcome, so every waiter is settled exactly
//! once and a caller arriving after the detach is never merged into the
//! draining batch.

use crate::error::TokenError;
use crate::session::Credential;
use tokio::sync::oneshot;

/// Outcome delivered to every waiter of one attempt.
pub type RefreshResult = Result<Credential, TokenError>;

/// Receiving side of a queued waiter.
#[derive(Debug)]
pub struct PendingWaiter(oneshot::Receiver<RefreshResult>);

impl PendingWaiter {
    /// Wait for the attempt this waiter joined to settle.
    ///
    /// A queue dropped without being drained resolves to
    /// `TokenError::Aborted` rather than hanging.
    pub async fn wait(self) -> RefreshResult {
        self.0.await.unwrap_or_else(|_| {
            Err(TokenError::Aborted(
                "refresh attempt dropped its waiters".into(),
            ))
        })
    }
}

/// FIFO queue of waiters for one refresh attempt.
#[derive(Debug, Default)]
pub struct WaiterQueue {
    waiters: Vec<oneshot::Sender<RefreshResult>>,
}

impl WaiterQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a waiter and return the handle its caller awaits.
    pub fn enqueue(&mut self) -> PendingWaiter {
        let (tx, rx) = oneshot::channel();
        self.waiters.push(tx);
        PendingWaiter(rx)
    }

    /// Number of queued waiters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.waiters.len()
    }

    /// Whether no waiter is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }

    /// Settle every waiter, in arrival order, with `result`.
    ///
    /// Consumes the queue. Returns how many waiters were still listening;
    /// callers that gave up are skipped.
    pub fn drain_all(self, result: &RefreshResult) -> usize {
        self.waiters
            .into_iter()
            .filter_map(|tx| tx.send(result.clone()).ok())
            .count()
    }
}
