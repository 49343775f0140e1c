//! Single-flight refresh of a bearer credential shared by many consumers.
//!
//! [`manager::TokenManager`] is the entry point: it hands out a credential
//! that stays valid for at least a configurable buffer, refreshing it
//! through an [`provider::IdentityProvider`] when needed. Concurrent callers
//! share one refresh attempt, failures back off exponentially, and the
//! credential is mirrored to a [`store::CredentialStore`] for restarts.

#![warn(clippy::pedantic)]

/// Module for exponential backoff between failed attempts
pub mod backoff;

/// Module for wall-clock time and expiry checks
pub mod clock;

/// Module for coordinator configuration
pub mod config;

/// Module for the single-flight refresh state machine
pub mod coordinator;

/// Module for error types
pub mod error;

/// Module for refresh notifications
pub mod events;

/// Module for the public token manager handle
pub mod manager;

/// Module for metrics
pub mod observability;

/// Module for identity provider clients
pub mod provider;

/// Module for secret types that prevent accidental logging
pub mod secret;

/// Module for session and credential types
pub mod session;

/// Module for best-effort credential persistence
pub mod store;

/// Module for callers waiting on an in-flight attempt
pub mod waiters;

pub use config::CoordinatorConfig;
pub use error::TokenError;
pub use events::{EventKind, Subscription, TokenEvent, TokenReceiver};
pub use manager::TokenManager;
pub use session::{Credential, Session};
