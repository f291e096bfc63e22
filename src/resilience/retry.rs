//! Bounded retry with exponential backoff and jitter.
//!
//! The wait before attempt *n* is `min(base_delay * 2^n, max_delay)`,
//! perturbed by `± jitter_fraction` to avoid thundering-herd refetches.
//! Waits honor an optional caller deadline so an upstream request
//! timeout always wins over the backoff schedule.

use std::future::Future;
use std::time::{Duration, Instant};

use rand::Rng;

use crate::error::{AuthError, Result};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Extra attempts after the first (total attempts = max_retries + 1).
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// 0.0 disables jitter; 0.2 perturbs each delay by up to ±20%.
    pub jitter_fraction: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            jitter_fraction: 0.2,
        }
    }
}

impl RetryPolicy {
    /// Run `op` until it succeeds, returns a non-transient error, or
    /// retries are exhausted. Exhaustion returns an aggregated error
    /// wrapping the last failure.
    pub async fn run<T, F, Fut>(
        &self,
        op_name: &str,
        deadline: Option<Instant>,
        mut op: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt: u32 = 0;

        loop {
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    return Err(AuthError::Canceled);
                }
            }

            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_transient() => return Err(e),
                Err(e) => {
                    if attempt >= self.max_retries {
                        tracing::warn!(
                            operation = op_name,
                            attempts = attempt + 1,
                            error = %e,
                            "retries exhausted"
                        );
                        return Err(AuthError::ProviderUnavailable(format!(
                            "{} failed after {} attempts: {}",
                            op_name,
                            attempt + 1,
                            e
                        )));
                    }

                    let delay = self.delay_for(attempt);
                    if let Some(deadline) = deadline {
                        if Instant::now() + delay >= deadline {
                            tracing::debug!(
                                operation = op_name,
                                "deadline would elapse during backoff"
                            );
                            return Err(AuthError::Canceled);
                        }
                    }

                    tracing::debug!(
                        operation = op_name,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Jittered delay before the retry following attempt `n`.
    fn delay_for(&self, attempt: u32) -> Duration {
        let exp = 2u64.saturating_pow(attempt.min(16));
        let raw = self
            .base_delay
            .saturating_mul(exp as u32)
            .min(self.max_delay);
        if self.jitter_fraction <= 0.0 {
            return raw;
        }
        let factor = rand::thread_rng()
            .gen_range(1.0 - self.jitter_fraction..1.0 + self.jitter_fraction);
        Duration::from_secs_f64(raw.as_secs_f64() * factor)
    }
}
