//! Observability for the refresh coordinator.
//!
//! Logging goes through `tracing` at the call sites; this module holds the
//! metric definitions.

pub mod metrics;
