//! Resilience wrappers for calls made while resolving credentials.
//!
//! Remote fetches (OIDC JWKS) go through a retry policy nested inside
//! a named circuit breaker, so a provider outage degrades to a fast
//! 503 instead of hanging the authentication path.

pub mod circuit_breaker;
pub mod retry;

pub use circuit_breaker::{BreakerState, CircuitBreaker};
pub use retry::RetryPolicy;
