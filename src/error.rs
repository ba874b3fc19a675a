//! Error types for the subscription core.
//!
//! This module defines all error types that can occur in core operations.
//! All errors implement the standard [`std::error::Error`] trait via
//! [`thiserror::Error`].
//!
//! # Error Categories
//!
//! - **Validation errors** ([`CoreError::Validation`]): malformed input rejected
//!   before it reaches a store
//! - **Domain errors** ([`CoreError::NotFound`], [`CoreError::Conflict`]):
//!   references to absent entities or invariant violations
//! - **Admission errors** ([`CoreError::RateLimitExceeded`],
//!   [`CoreError::CircuitOpen`]): the request was rejected by a protection layer
//!   before any domain work happened
//! - **Infrastructure errors** ([`CoreError::StoreUnavailable`],
//!   [`CoreError::Serialization`]): the shared store or a wire codec failed
//!
//! # Examples
//!
//! ```
//! use subcore::error::{CoreError, Result};
//!
//! fn require_positive(days: u32) -> Result<u32> {
//!     if days == 0 {
//!         return Err(CoreError::Validation("duration_days must be positive".to_owned()));
//!     }
//!     Ok(days)
//! }
//! ```

use thiserror::Error;

/// Result type alias for core operations.
///
/// All fallible functions in this crate return this type unless they wrap a
/// caller-supplied error (see
/// [`CircuitBreakerError`](crate::reliability::CircuitBreakerError)).
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors that can occur in the subscription core.
///
/// Variants map one-to-one onto the signals the transport layer translates
/// into status codes: `NotFound` → 404, `Conflict` → 409,
/// `RateLimitExceeded` → 429, `CircuitOpen` → 503, and so on. The mapping
/// itself lives outside this crate.
///
/// # Error Recovery
///
/// - **Transient** ([`StoreUnavailable`](Self::StoreUnavailable)): retry once
///   the shared store is reachable again
/// - **Caller-fixable** ([`Validation`](Self::Validation),
///   [`NotFound`](Self::NotFound), [`Conflict`](Self::Conflict)): correct the
///   request and resubmit
/// - **Back off** ([`RateLimitExceeded`](Self::RateLimitExceeded),
///   [`CircuitOpen`](Self::CircuitOpen)): wait for the window or the breaker's
///   reset timeout
#[must_use = "errors should be handled, propagated, or explicitly panicked"]
#[derive(Debug, Error)]
pub enum CoreError {
    /// Input failed validation before reaching any store.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A referenced plan or subscription does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The operation would violate a domain invariant.
    ///
    /// Produced when a user already holds an active subscription, when a plan
    /// name collides, when a plan with live subscriptions is deleted, or when
    /// a terminal subscription is asked to transition again.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The caller exhausted its fixed-window request budget.
    ///
    /// # Recovery
    ///
    /// Wait for the current 60-second window to expire. The window's
    /// remaining lifetime is available via
    /// [`RateLimiter::window_status`](crate::security::RateLimiter::window_status).
    #[error("rate limit exceeded")]
    RateLimitExceeded,

    /// A circuit breaker rejected the call without invoking the downstream
    /// operation.
    ///
    /// The string is the breaker name, so one service's outage is
    /// distinguishable from another's in logs and responses.
    ///
    /// # Recovery
    ///
    /// Wait for the breaker's reset timeout; the next call after it elapses
    /// is admitted as a recovery probe.
    #[error("circuit breaker '{0}' is open")]
    CircuitOpen(String),

    /// The shared counter store is unreachable or returned a protocol error.
    ///
    /// Kept distinct from domain errors so callers can tell an infrastructure
    /// outage apart from a bad request. The rate limiter and circuit breaker
    /// deliberately do not surface this variant from their admission paths;
    /// they fail open instead (see their module docs).
    #[error("shared store unavailable: {0}")]
    StoreUnavailable(#[from] redis::RedisError),

    /// A value could not be serialized to or from its wire form.
    ///
    /// Cache reads treat deserialization failure as a miss and never surface
    /// this variant; it is produced only when a value cannot be *written*.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration was structurally valid TOML but semantically invalid.
    #[error("invalid configuration: {0}")]
    Config(String),
}
