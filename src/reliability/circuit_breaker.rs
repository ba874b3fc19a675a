//! Shared-state circuit breaker for protecting against cascading failures.
//!
//! The breaker tracks a downstream dependency's health in the shared counter
//! store, so every replica of this service sees the same verdict: when one
//! process trips the breaker, all of them stop calling the dependency.
//!
//! # States
//!
//! - **Closed**: normal operation, calls pass through
//! - **Open**: too many failures, calls rejected immediately
//! - **`HalfOpen`**: one recovery probe in flight, everyone else rejected
//!
//! # State Transitions
//!
//! ```text
//! Closed ──[failure_threshold failures]──> Open
//!   ▲                                        │
//!   │                                        │ [reset_timeout elapses;
//!   │                                        │  CAS admits ONE probe]
//!   └──[probe succeeds]────── HalfOpen <─────┘
//!          [probe fails] ──────────────────> Open
//! ```
//!
//! # Concurrency
//!
//! The state lives in three store keys with no transaction spanning them, so
//! the machine is built from the store's atomic primitives instead of
//! read-then-write sequences where it matters: the Open→`HalfOpen` transition
//! is a compare-and-swap, guaranteeing that of N replicas noticing an expired
//! open period, exactly one wins and probes. Callers that observe `HalfOpen`
//! are rejected until the probe resolves. Failure counting in Closed uses the
//! store's atomic increment; the count converges even under races.
//!
//! # Failure Policy
//!
//! The breaker fails OPEN on store outage: if its own state cannot be read,
//! the operation executes unprotected (with a warning) rather than being
//! rejected. The breaker exists to protect the downstream, not to add an
//! availability dependency of its own.
//!
//! # Examples
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use subcore::{
//!     reliability::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError},
//!     store::MemoryCounterStore,
//! };
//!
//! # async fn example() {
//! let breaker = CircuitBreaker::new(
//!     "payment_service",
//!     Arc::new(MemoryCounterStore::new()),
//!     CircuitBreakerConfig::default(),
//! );
//!
//! let result = breaker.call(|| async { Ok::<_, String>("charged".to_owned()) }).await;
//!
//! match result {
//!     Ok(value) => println!("got: {value}"),
//!     Err(CircuitBreakerError::Open(name)) => println!("{name} is presumed down"),
//!     Err(CircuitBreakerError::Inner(e)) => println!("operation failed: {e}"),
//! }
//! # }
//! ```

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    error::{CoreError, Result},
    security::audit::{AuditEvent, AuditEventType, audit_log},
    store::CounterStore,
};

/// Circuit breaker state.
///
/// Stored textually in the shared store; a missing state key reads as
/// [`Closed`](Self::Closed), so breakers need no provisioning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation, calls pass through.
    Closed,
    /// Dependency presumed unhealthy, calls rejected.
    Open,
    /// One recovery probe in flight.
    HalfOpen,
}

impl CircuitState {
    /// Wire form used in the shared store.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "CLOSED",
            Self::Open => "OPEN",
            Self::HalfOpen => "HALF_OPEN",
        }
    }

    /// Parses the wire form; an unknown value heals to `Closed` so a
    /// corrupted key cannot wedge the breaker shut.
    fn parse(raw: &str) -> Self {
        match raw {
            "OPEN" => Self::Open,
            "HALF_OPEN" => Self::HalfOpen,
            "CLOSED" => Self::Closed,
            other => {
                warn!(state = other, "unknown circuit state in store, treating as CLOSED");
                Self::Closed
            }
        }
    }
}

/// Configuration for a circuit breaker.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens.
    ///
    /// Default: 5
    pub failure_threshold: u64,

    /// How long the circuit stays open before admitting a recovery probe.
    ///
    /// Default: 60 seconds
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self { failure_threshold: 5, reset_timeout: Duration::from_secs(60) }
    }
}

/// How a call was admitted, decided before the operation runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    /// Circuit closed, normal pass-through.
    Pass,
    /// This caller won the CAS and carries the recovery probe.
    Probe,
    /// Circuit open (or a probe is in flight), reject.
    Reject,
    /// Breaker state unreadable, execute without bookkeeping.
    Unprotected,
}

/// Per-dependency circuit breaker backed by the shared counter store.
///
/// State is keyed by breaker name (`circuit:{name}:*`), so distinct
/// dependencies trip independently while all replicas of this service share
/// each verdict.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    name: String,
    store: Arc<dyn CounterStore>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    /// Creates a breaker for the named dependency.
    #[must_use]
    #[allow(clippy::impl_trait_in_params, reason = "Into<String> is idiomatic for constructors")]
    pub fn new(
        name: impl Into<String>,
        store: Arc<dyn CounterStore>,
        config: CircuitBreakerConfig,
    ) -> Self {
        Self { name: name.into(), store, config }
    }

    fn state_key(&self) -> String {
        format!("circuit:{}:state", self.name)
    }

    fn failures_key(&self) -> String {
        format!("circuit:{}:failures", self.name)
    }

    fn last_failure_key(&self) -> String {
        format!("circuit:{}:last_failure", self.name)
    }

    /// Reads the current state from the store.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::StoreUnavailable`] if the store cannot be
    /// reached.
    pub async fn state(&self) -> Result<CircuitState> {
        Ok(match self.store.get(&self.state_key()).await? {
            Some(raw) => CircuitState::parse(&raw),
            None => CircuitState::Closed,
        })
    }

    /// Clears all breaker state, returning the circuit to closed.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::StoreUnavailable`] if the store cannot be
    /// reached.
    pub async fn reset(&self) -> Result<()> {
        self.store
            .delete(&[&self.state_key(), &self.failures_key(), &self.last_failure_key()])
            .await?;
        Ok(())
    }

    /// Executes an operation through the circuit breaker.
    ///
    /// Admission is decided first: a closed circuit passes the call through;
    /// an open circuit rejects it until `reset_timeout` has elapsed since the
    /// last failure, at which point a compare-and-swap elects exactly one
    /// caller (across all replicas) as the recovery probe. The probe's
    /// outcome alone decides what follows: success closes the circuit and
    /// clears the failure counters, failure reopens it for another full
    /// `reset_timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`CircuitBreakerError::Open`] when the call is rejected
    /// without executing the operation, and [`CircuitBreakerError::Inner`]
    /// when the operation itself fails.
    pub async fn call<F, Fut, T, E>(&self, operation: F) -> std::result::Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        let admission = match self.admit().await {
            Ok(admission) => admission,
            Err(error) => {
                warn!(breaker = %self.name, %error, "breaker state unreadable, failing open");
                Admission::Unprotected
            }
        };

        match admission {
            Admission::Reject => {
                debug!(breaker = %self.name, "call rejected, circuit open");
                Err(CircuitBreakerError::Open(self.name.clone()))
            }
            Admission::Unprotected => operation().await.map_err(CircuitBreakerError::Inner),
            Admission::Pass => match operation().await {
                Ok(value) => Ok(value),
                Err(error) => {
                    self.record_failure().await;
                    Err(CircuitBreakerError::Inner(error))
                }
            },
            Admission::Probe => match operation().await {
                Ok(value) => {
                    self.close_after_probe().await;
                    Ok(value)
                }
                Err(error) => {
                    self.reopen_after_probe().await;
                    Err(CircuitBreakerError::Inner(error))
                }
            },
        }
    }

    /// Decides whether the current call passes, probes, or is rejected.
    async fn admit(&self) -> Result<Admission> {
        match self.state().await? {
            CircuitState::Closed => Ok(Admission::Pass),
            // A probe is in flight; its outcome will move the state.
            CircuitState::HalfOpen => Ok(Admission::Reject),
            CircuitState::Open => {
                if !self.open_period_elapsed().await? {
                    return Ok(Admission::Reject);
                }
                // Of all callers seeing the expired open period, exactly one
                // wins this swap and becomes the probe.
                let won = self
                    .store
                    .compare_and_swap(
                        &self.state_key(),
                        CircuitState::Open.as_str(),
                        CircuitState::HalfOpen.as_str(),
                    )
                    .await?;
                if won {
                    info!(breaker = %self.name, "circuit half-open, probing recovery");
                    audit_log(
                        &AuditEvent::new(AuditEventType::CircuitBreakerStateChanged)
                            .with_breaker(&self.name, CircuitState::HalfOpen.as_str()),
                    );
                    Ok(Admission::Probe)
                } else {
                    Ok(Admission::Reject)
                }
            }
        }
    }

    /// Whether `reset_timeout` has elapsed since the last recorded failure.
    ///
    /// A missing or unparseable timestamp counts as elapsed: with no evidence
    /// of a recent failure the breaker errs toward probing.
    async fn open_period_elapsed(&self) -> Result<bool> {
        let Some(raw) = self.store.get(&self.last_failure_key()).await? else {
            return Ok(true);
        };
        let Ok(last_failure) = DateTime::parse_from_rfc3339(&raw) else {
            warn!(breaker = %self.name, raw, "unparseable last-failure timestamp");
            return Ok(true);
        };
        let elapsed = Utc::now().signed_duration_since(last_failure.with_timezone(&Utc));
        let reset = chrono::Duration::from_std(self.config.reset_timeout)
            .unwrap_or_else(|_| chrono::Duration::MAX);
        Ok(elapsed >= reset)
    }

    /// Records a failure observed while the circuit is closed.
    ///
    /// Bookkeeping failures are logged and swallowed: the operation's result
    /// is already decided and must reach the caller regardless.
    async fn record_failure(&self) {
        let count = match self.store.incr(&self.failures_key()).await {
            Ok(count) => count,
            Err(error) => {
                warn!(breaker = %self.name, %error, "failed to record breaker failure");
                return;
            }
        };
        self.stamp_last_failure().await;

        if count >= i64::try_from(self.config.failure_threshold).unwrap_or(i64::MAX) {
            if let Err(error) =
                self.store.set(&self.state_key(), CircuitState::Open.as_str()).await
            {
                warn!(breaker = %self.name, %error, "failed to open circuit");
                return;
            }
            warn!(breaker = %self.name, failures = count, "circuit opened");
            audit_log(
                &AuditEvent::new(AuditEventType::CircuitBreakerStateChanged)
                    .with_breaker(&self.name, CircuitState::Open.as_str()),
            );
        }
    }

    /// Probe succeeded: close the circuit and clear the failure record.
    async fn close_after_probe(&self) {
        let closed = self
            .store
            .compare_and_swap(
                &self.state_key(),
                CircuitState::HalfOpen.as_str(),
                CircuitState::Closed.as_str(),
            )
            .await;
        match closed {
            Ok(true) => {
                if let Err(error) =
                    self.store.delete(&[&self.failures_key(), &self.last_failure_key()]).await
                {
                    warn!(breaker = %self.name, %error, "failed to clear failure counters");
                }
                info!(breaker = %self.name, "circuit closed, normal operation resumed");
                audit_log(
                    &AuditEvent::new(AuditEventType::CircuitBreakerStateChanged)
                        .with_breaker(&self.name, CircuitState::Closed.as_str()),
                );
            }
            Ok(false) => {
                warn!(breaker = %self.name, "state moved during probe, leaving as is");
            }
            Err(error) => {
                warn!(breaker = %self.name, %error, "failed to close circuit after probe");
            }
        }
    }

    /// Probe failed: reopen and restart the open period.
    ///
    /// The failure count is left alone (the breaker trips again on the
    /// probe's evidence), but the last-failure timestamp is refreshed so the
    /// circuit holds for a full `reset_timeout` before the next probe.
    async fn reopen_after_probe(&self) {
        if let Err(error) = self.store.set(&self.state_key(), CircuitState::Open.as_str()).await {
            warn!(breaker = %self.name, %error, "failed to reopen circuit after probe");
            return;
        }
        self.stamp_last_failure().await;
        warn!(breaker = %self.name, "recovery probe failed, circuit reopened");
        audit_log(
            &AuditEvent::new(AuditEventType::CircuitBreakerStateChanged)
                .with_breaker(&self.name, CircuitState::Open.as_str()),
        );
    }

    async fn stamp_last_failure(&self) {
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);
        if let Err(error) = self.store.set(&self.last_failure_key(), &now).await {
            warn!(breaker = %self.name, %error, "failed to stamp last failure");
        }
    }
}

/// Error returned by a circuit breaker call.
///
/// Distinguishes "the circuit rejected the call" from "the operation ran and
/// failed", so callers can map the former to a service-unavailable signal
/// without inspecting the inner error type.
#[derive(Debug, Error)]
pub enum CircuitBreakerError<E> {
    /// Circuit is open; the operation was not invoked. Carries the breaker
    /// name.
    #[error("circuit breaker '{0}' is open")]
    Open(String),

    /// The operation was invoked and failed with its own error.
    #[error(transparent)]
    Inner(E),
}

impl From<CircuitBreakerError<CoreError>> for CoreError {
    fn from(error: CircuitBreakerError<CoreError>) -> Self {
        match error {
            CircuitBreakerError::Open(name) => Self::CircuitOpen(name),
            CircuitBreakerError::Inner(inner) => inner,
        }
    }
}
