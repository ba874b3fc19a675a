//! Shared counter store abstraction.
//!
//! Every cross-replica coordination mechanism in this crate (the TTL cache,
//! the rate limiter, and the circuit breaker) talks to one shared
//! key-value store through the [`CounterStore`] trait. No in-process memory
//! is trusted for correctness: replicas coordinate exclusively through the
//! store's atomic primitives (INCR, conditional set, TTL expiry).
//!
//! ## Key Patterns
//!
//! ```text
//! cache:{key}                     → serialized cache value (explicit TTL)
//! rate:{identity}                 → fixed-window request counter (60 s TTL)
//! circuit:{name}:state            → CLOSED | OPEN | HALF_OPEN
//! circuit:{name}:failures         → consecutive failure count
//! circuit:{name}:last_failure     → RFC 3339 timestamp of the last failure
//! ```
//!
//! ## Implementations
//!
//! - [`RedisCounterStore`]: production implementation over a Redis
//!   connection manager
//! - [`MemoryCounterStore`]: single-process reference implementation used in
//!   tests and local development; honors TTLs against a monotonic clock

mod memory;
mod redis;

use std::time::Duration;

use async_trait::async_trait;

pub use self::{memory::MemoryCounterStore, redis::RedisCounterStore};
use crate::error::Result;

/// Contract of the shared key-value store.
///
/// Implementations must make [`incr`](Self::incr) and
/// [`compare_and_swap`](Self::compare_and_swap) atomic with respect to all
/// other callers, including callers in other processes. Everything the crate
/// guarantees under concurrency rests on those two primitives plus TTL
/// expiry; plain `get`/`set` are last-writer-wins and are only used where
/// that is acceptable.
#[async_trait]
pub trait CounterStore: Send + Sync + std::fmt::Debug {
    /// Reads the value stored under `key`, or `None` if absent or expired.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Stores `value` under `key` without an expiry. Last writer wins.
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Stores `value` under `key`, expiring after `ttl`.
    async fn set_with_expiry(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Atomically increments the counter under `key` and returns the new
    /// value. A missing key counts from zero and is created without expiry.
    async fn incr(&self, key: &str) -> Result<i64>;

    /// Applies an expiry to an existing key. Returns `false` if the key does
    /// not exist.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// Returns the remaining lifetime of `key`, `None` if the key is absent
    /// or has no expiry.
    async fn ttl(&self, key: &str) -> Result<Option<Duration>>;

    /// Deletes the given keys, returning how many existed.
    async fn delete(&self, keys: &[&str]) -> Result<u64>;

    /// Deletes every key matching a glob-style `pattern` (`*` wildcard),
    /// returning how many were removed.
    ///
    /// Backed by a full keyspace scan, acceptable only at low cardinality.
    /// Callers with large keyspaces should prefer explicit [`delete`](Self::delete).
    async fn delete_matching(&self, pattern: &str) -> Result<u64>;

    /// Atomically replaces the value under `key` with `new` if the current
    /// value equals `expected`. Returns whether the swap happened.
    ///
    /// This is the primitive that makes cross-replica state transitions safe:
    /// of N concurrent callers attempting the same transition, exactly one
    /// observes `true`.
    async fn compare_and_swap(&self, key: &str, expected: &str, new: &str) -> Result<bool>;
}
