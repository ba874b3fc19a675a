//! Reliability patterns for calls to unreliable downstreams.
//!
//! Provides a shared-state circuit breaker so replicated services agree on a
//! dependency's health through the shared counter store instead of each
//! process keeping its own opinion.

mod circuit_breaker;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitState,
};

use crate::error::CoreError;

/// Determines if an error is worth retrying.
///
/// Returns `true` only for infrastructure outages that may clear on their
/// own. Domain errors, admission rejections, and serialization failures are
/// permanent for the request that produced them: the breaker's half-open
/// probe is the only built-in retry in this crate, and rate-limit or
/// breaker-open rejections call for waiting, not resubmitting.
///
/// # Examples
///
/// ```
/// use subcore::{error::CoreError, reliability::is_retryable};
///
/// assert!(!is_retryable(&CoreError::NotFound("plan".into())));
/// assert!(!is_retryable(&CoreError::RateLimitExceeded));
/// ```
#[must_use]
pub fn is_retryable(error: &CoreError) -> bool {
    matches!(error, CoreError::StoreUnavailable(_))
}
