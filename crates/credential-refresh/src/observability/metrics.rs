//! Metrics definitions for credential refresh.
//!
//! All metrics follow Prometheus naming conventions:
//! - `credential_refresh_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded:
//! - `status`: 2 values (success, error)
//! - `error_type`: bounded by `TokenError::kind()`
//! - `operation`: 3 values (get, set, remove)
//! - `event`: bounded by `EventKind::as_str()`
//!
//! Without an installed recorder every call is a no-op, so the host
//! application decides whether and where these are exported.

use metrics::{counter, histogram};
use std::time::Duration;

/// Record the outcome of one provider refresh attempt.
///
/// Metric: `credential_refresh_duration_seconds`, `credential_refresh_attempts_total`,
/// `credential_refresh_failures_total`
/// Labels: `status`, `error_type`
pub fn record_refresh_attempt(status: &str, error_type: Option<&str>, duration: Duration) {
    histogram!("credential_refresh_duration_seconds").record(duration.as_secs_f64());

    counter!("credential_refresh_attempts_total",
        "status" => status.to_string()
    )
    .increment(1);

    if let Some(err_type) = error_type {
        counter!("credential_refresh_failures_total",
            "error_type" => err_type.to_string()
        )
        .increment(1);
    }
}

/// Record how many waiters were settled by one attempt.
///
/// Metric: `credential_refresh_waiters`
#[allow(clippy::cast_precision_loss)]
pub fn record_waiters(count: usize) {
    histogram!("credential_refresh_waiters").record(count as f64);
}

/// Record a best-effort persistence failure.
///
/// Metric: `credential_refresh_store_errors_total`
/// Labels: `operation`
pub fn record_store_error(operation: &str) {
    counter!("credential_refresh_store_errors_total",
        "operation" => operation.to_string()
    )
    .increment(1);
}

/// Record an event handler that panicked during delivery.
///
/// Metric: `credential_refresh_event_handler_panics_total`
/// Labels: `event`
pub fn record_handler_panic(event: &str) {
    counter!("credential_refresh_event_handler_panics_total",
        "event" => event.to_string()
    )
    .increment(1);
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use metrics_util::debugging::{DebugValue, DebuggingRecorder};

    #[test]
    fn test_record_functions_without_recorder() {
        // No recorder installed: must not panic
        record_refresh_attempt("success", None, Duration::from_millis(50));
        record_refresh_attempt("error", Some("timeout"), Duration::from_secs(30));
        record_waiters(0);
        record_waiters(12);
        record_store_error("set");
        record_handler_panic("refreshed");
    }

    #[test]
    fn test_metrics_are_emitted() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            record_refresh_attempt("success", None, Duration::from_millis(50));
            record_refresh_attempt("error", Some("provider"), Duration::from_millis(100));
            record_waiters(3);
            record_store_error("remove");
            record_handler_panic("cleared");
        });

        let metrics = snapshotter.snapshot().into_vec();
        let names: Vec<String> = metrics
            .iter()
            .map(|(key, _, _, _)| key.key().name().to_string())
            .collect();

        for expected in [
            "credential_refresh_duration_seconds",
            "credential_refresh_attempts_total",
            "credential_refresh_failures_total",
            "credential_refresh_waiters",
            "credential_refresh_store_errors_total",
            "credential_refresh_event_handler_panics_total",
        ] {
            assert!(
                names.iter().any(|n| n == expected),
                "missing metric {expected}, got {names:?}"
            );
        }

        let failures = metrics
            .iter()
            .find(|(key, _, _, _)| key.key().name() == "credential_refresh_failures_total")
            .map(|(_, _, _, value)| value.clone())
            .unwrap();
        assert_eq!(*failures, DebugValue::Counter(1));
    }
}
