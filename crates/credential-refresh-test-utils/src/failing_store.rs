//! Credential store whose every operation fails.

use credential_refresh::error::StoreError;
use credential_refresh::store::CredentialStore;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Store that rejects every `get`, `set` and `remove` with `StoreError::Io`.
#[derive(Debug, Default)]
pub struct FailingStore {
    attempts: AtomicUsize,
}

impl FailingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of operations attempted against this store.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    fn fail<T>(&self, operation: &str) -> Result<T, StoreError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(StoreError::Io(format!("{operation}: disk unavailable")))
    }
}

impl CredentialStore for FailingStore {
    fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
        self.fail("get")
    }

    fn set(&self, _key: &str, _value: &str) -> Result<(), StoreError> {
        self.fail("set")
    }

    fn remove(&self, _key: &str) -> Result<(), StoreError> {
        self.fail("remove")
    }
}
