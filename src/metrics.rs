//! Metrics recording boundary.
//!
//! The decision engine only calls this interface; the concrete
//! exposition mechanism (scrape endpoint, push gateway, ...) lives
//! outside the crate. Recorders are injected at construction so there
//! is no package-level registry.

use std::sync::Arc;

pub trait MetricsRecorder: Send + Sync {
    /// An authentication decision was made.
    fn auth_request(&self, method: &str, result: &str);

    /// An authentication attempt failed with a classified reason.
    fn auth_error(&self, method: &str, reason: &str);

    /// A circuit breaker changed state.
    fn circuit_breaker_state(&self, name: &str, state: &str);

    /// Seconds until the given certificate expires.
    fn cert_expiry_seconds(&self, kind: &str, seconds: i64);
}

/// Recorder that drops everything. Default for tests.
pub struct NoopRecorder;

impl MetricsRecorder for NoopRecorder {
    fn auth_request(&self, _method: &str, _result: &str) {}
    fn auth_error(&self, _method: &str, _reason: &str) {}
    fn circuit_breaker_state(&self, _name: &str, _state: &str) {}
    fn cert_expiry_seconds(&self, _kind: &str, _seconds: i64) {}
}

/// Recorder that emits structured tracing events. Useful until a real
/// metrics pipeline is wired in by the host process.
pub struct LogRecorder;

impl MetricsRecorder for LogRecorder {
    fn auth_request(&self, method: &str, result: &str) {
        tracing::debug!(metric = "auth_request", method, result);
    }

    fn auth_error(&self, method: &str, reason: &str) {
        tracing::debug!(metric = "auth_error", method, reason);
    }

    fn circuit_breaker_state(&self, name: &str, state: &str) {
        tracing::info!(metric = "circuit_breaker_state", name, state);
    }

    fn cert_expiry_seconds(&self, kind: &str, seconds: i64) {
        tracing::debug!(metric = "cert_expiry_seconds", kind, seconds);
    }
}

pub fn noop() -> Arc<dyn MetricsRecorder> {
    Arc::new(NoopRecorder)
}
