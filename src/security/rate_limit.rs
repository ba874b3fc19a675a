//! Fixed-window rate limiting over the shared counter store.
//!
//! Bounds request rate per caller identity using fixed one-minute windows:
//! the first request in a window atomically creates a counter with a 60-second
//! expiry, and every request increments it. Requests past the configured
//! budget are rejected until the window's key expires.
//!
//! # Fixed Window, Not Sliding
//!
//! Counters reset at window boundaries rather than rolling continuously, so a
//! caller can burst up to twice its budget across a boundary (the tail of one
//! window plus the head of the next). That approximation is acceptable for
//! this system and is intentionally not a sliding-window guarantee.
//!
//! # Failure Policy
//!
//! The limiter fails OPEN: if the shared store is unreachable, requests are
//! admitted and a warning is logged. A limiter outage must not become an API
//! outage; [`StoreUnavailable`](crate::error::CoreError::StoreUnavailable) is
//! never surfaced from the admission path.
//!
//! # Examples
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use subcore::{
//!     security::{RateLimitConfig, RateLimiter},
//!     store::MemoryCounterStore,
//! };
//!
//! # async fn example() {
//! let limiter = RateLimiter::new(Arc::new(MemoryCounterStore::new()), RateLimitConfig::default());
//!
//! match limiter.check("203.0.113.9").await {
//!     Ok(()) => println!("admitted"),
//!     Err(_) => println!("over budget"),
//! }
//! # }
//! ```

use std::{sync::Arc, time::Duration};

use tracing::{debug, instrument, warn};

use crate::{
    error::{CoreError, Result},
    security::audit::{AuditEvent, AuditEventType, audit_log, redact_identity},
    store::CounterStore,
};

/// Length of one rate-limit window.
pub const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);

/// Configuration for the fixed-window rate limiter.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    /// Requests admitted per identity per window.
    ///
    /// Default: 60
    pub requests_per_minute: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self { requests_per_minute: 60 }
    }
}

/// Snapshot of one identity's current window.
///
/// Produced by [`RateLimiter::window_status`] from the counter value and the
/// store's remaining-TTL read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowStatus {
    /// Requests counted in the current window (including rejected ones).
    pub used: u64,
    /// Requests left before rejection (zero once over budget).
    pub remaining: u64,
    /// Time until the window resets, if a window is open.
    pub resets_in: Option<Duration>,
}

/// Per-identity fixed-window rate limiter.
///
/// Shared-store backed: replicas of this service coordinate through the same
/// counters, so the budget holds across a horizontally scaled deployment
/// without any in-process state.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    config: RateLimitConfig,
}

impl RateLimiter {
    /// Creates a limiter over the given store.
    #[must_use]
    pub fn new(store: Arc<dyn CounterStore>, config: RateLimitConfig) -> Self {
        Self { store, config }
    }

    fn window_key(identity: &str) -> String {
        format!("rate:{identity}")
    }

    /// Decides admit/reject for one request from `identity`.
    ///
    /// The increment happens first and is atomic, so concurrent requests for
    /// the same identity cannot both observe the last free slot: request
    /// number `n` in a window sees counter value `n`, and values above the
    /// budget are rejected.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::RateLimitExceeded`] when the identity is over
    /// budget for the current window. Store failures do not error; the
    /// limiter fails open (see module docs).
    #[instrument(skip(self), level = "debug")]
    pub async fn check(&self, identity: &str) -> Result<()> {
        let key = Self::window_key(identity);

        let count = match self.store.incr(&key).await {
            Ok(count) => count,
            Err(error) => {
                warn!(%error, "rate-limit store unreachable, failing open");
                return Ok(());
            }
        };

        if count == 1 {
            // First request of the window owns the expiry. If it cannot be
            // applied the counter would never reset and lock the identity out,
            // so drop the key and stay open.
            match self.store.expire(&key, RATE_LIMIT_WINDOW).await {
                Ok(_) => {}
                Err(error) => {
                    warn!(%error, "failed to start rate-limit window, failing open");
                    if let Err(error) = self.store.delete(&[key.as_str()]).await {
                        warn!(%error, "failed to drop unexpirable rate-limit counter");
                    }
                    return Ok(());
                }
            }
        }

        if count > i64::from(self.config.requests_per_minute) {
            warn!(count, budget = self.config.requests_per_minute, "rate limit exceeded");
            audit_log(
                &AuditEvent::new(AuditEventType::RateLimitExceeded)
                    .with_identity(redact_identity(identity)),
            );
            return Err(CoreError::RateLimitExceeded);
        }

        debug!(count, "request admitted");
        Ok(())
    }

    /// Reports the state of `identity`'s current window.
    ///
    /// Unlike [`check`](Self::check), this is a read for dashboards and
    /// `Retry-After` headers; it does not consume budget and it does surface
    /// store failures.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::StoreUnavailable`](crate::error::CoreError::StoreUnavailable)
    /// if the store cannot be reached.
    pub async fn window_status(&self, identity: &str) -> Result<WindowStatus> {
        let key = Self::window_key(identity);
        let used = match self.store.get(&key).await? {
            Some(raw) => raw.parse::<u64>().unwrap_or(0),
            None => 0,
        };
        let resets_in = if used == 0 { None } else { self.store.ttl(&key).await? };
        Ok(WindowStatus {
            used,
            remaining: u64::from(self.config.requests_per_minute).saturating_sub(used),
            resets_in,
        })
    }
}
