//! Circuit breaker for named upstream dependencies.
//!
//! Closed → Open after `failure_threshold` consecutive failures.
//! Open → HalfOpen once the cooldown elapses; while open and cooling
//! down, `execute` fails fast with `CircuitOpen` without invoking the
//! wrapped call, which is the primary latency bound. HalfOpen closes
//! after `max(failure_threshold / 2, 1)` successes and reopens on any
//! failure.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::error::{AuthError, Result};
use crate::metrics::MetricsRecorder;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        }
    }
}

struct Inner {
    state: BreakerState,
    consecutive_failures: u32,
    half_open_successes: u32,
    last_failure_at: Option<Instant>,
}

type ClockFn = Box<dyn Fn() -> Instant + Send + Sync>;

pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    open_timeout: Duration,
    inner: Mutex<Inner>,
    metrics: Arc<dyn MetricsRecorder>,
    now_fn: ClockFn,
}

impl CircuitBreaker {
    pub fn new(
        name: impl Into<String>,
        failure_threshold: u32,
        open_timeout: Duration,
        metrics: Arc<dyn MetricsRecorder>,
    ) -> Self {
        Self::with_clock(name, failure_threshold, open_timeout, metrics, Box::new(Instant::now))
    }

    /// Construct with an injected clock so cooldown tests can move
    /// time instead of sleeping.
    pub fn with_clock(
        name: impl Into<String>,
        failure_threshold: u32,
        open_timeout: Duration,
        metrics: Arc<dyn MetricsRecorder>,
        now_fn: ClockFn,
    ) -> Self {
        Self {
            name: name.into(),
            failure_threshold: failure_threshold.max(1),
            open_timeout,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                half_open_successes: 0,
                last_failure_at: None,
            }),
            metrics,
            now_fn,
        }
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().unwrap_or_else(|p| p.into_inner()).state
    }

    /// Run `f` under breaker protection. The lock is never held while
    /// the wrapped call runs.
    pub async fn execute<T, F, Fut>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.before_call()?;
        let result = f().await;
        match &result {
            Ok(_) => self.on_success(),
            Err(e) => self.on_failure(e),
        }
        result
    }

    fn before_call(&self) -> Result<()> {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        if inner.state == BreakerState::Open {
            let cooled_down = inner
                .last_failure_at
                .map(|at| (self.now_fn)().saturating_duration_since(at) > self.open_timeout)
                .unwrap_or(true);
            if !cooled_down {
                return Err(AuthError::CircuitOpen(self.name.clone()));
            }
            self.transition(&mut inner, BreakerState::HalfOpen);
            inner.half_open_successes = 0;
        }
        Ok(())
    }

    fn on_success(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        match inner.state {
            BreakerState::HalfOpen => {
                inner.half_open_successes += 1;
                if inner.half_open_successes >= (self.failure_threshold / 2).max(1) {
                    self.transition(&mut inner, BreakerState::Closed);
                    inner.consecutive_failures = 0;
                    inner.half_open_successes = 0;
                }
            }
            _ => {
                inner.consecutive_failures = 0;
            }
        }
    }

    fn on_failure(&self, error: &AuthError) {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        inner.last_failure_at = Some((self.now_fn)());
        match inner.state {
            BreakerState::HalfOpen => {
                tracing::warn!(breaker = %self.name, error = %error, "probe failed while half-open");
                inner.half_open_successes = 0;
                self.transition(&mut inner, BreakerState::Open);
            }
            _ => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.failure_threshold {
                    tracing::warn!(
                        breaker = %self.name,
                        failures = inner.consecutive_failures,
                        error = %error,
                        "failure threshold reached"
                    );
                    self.transition(&mut inner, BreakerState::Open);
                }
            }
        }
    }

    fn transition(&self, inner: &mut Inner, to: BreakerState) {
        if inner.state != to {
            tracing::info!(breaker = %self.name, from = inner.state.as_str(), to = to.as_str(), "breaker state change");
            inner.state = to;
            self.metrics.circuit_breaker_state(&self.name, to.as_str());
        }
    }
}
