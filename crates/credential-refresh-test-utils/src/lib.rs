//! # Credential Refresh Test Utilities
//!
//! Shared test utilities for the `credential-refresh` crate.
//!
//! This crate provides:
//! - A scriptable identity provider (`MockIdentityProvider`)
//! - A store whose every operation fails (`FailingStore`)
//! - Session builders (`TestSessionBuilder`)
//! - Tracing setup for tests (`init_test_tracing`)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use credential_refresh_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let provider = Arc::new(MockIdentityProvider::signed_in(
//!         TestSessionBuilder::new().token("stale").expires_at(NOW + 10).build(),
//!     ));
//!     provider.push_success(TestSessionBuilder::new().token("new").build());
//!
//!     provider.hold_refreshes();
//!     // ... start callers ...
//!     provider.wait_for_refresh_calls(1).await;
//!     provider.release_refreshes(1);
//! }
//! ```

pub mod failing_store;
pub mod mock_provider;
pub mod session_builders;
pub mod test_tracing;

// Re-export commonly used items
pub use failing_store::*;
pub use mock_provider::*;
pub use session_builders::*;
pub use test_tracing::*;
