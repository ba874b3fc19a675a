//! TTL cache over the shared counter store.
//!
//! Memoizes serializable values under caller-derived keys for a bounded
//! duration. Values travel as JSON; a value that no longer deserializes
//! (schema drift, partial write) is treated as a cache miss, never a fatal
//! error.
//!
//! Key derivation is the caller's job: build keys with [`cache_key`] from
//! the operation name and its arguments, keeping them stable and
//! collision-free for a given call signature. Do not memoize operations with
//! side effects or non-deterministic output.
//!
//! # Examples
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use subcore::{
//!     cache::{TtlCache, cache_key},
//!     store::MemoryCounterStore,
//! };
//!
//! # async fn example() -> subcore::error::Result<()> {
//! let cache = TtlCache::new(Arc::new(MemoryCounterStore::new()));
//!
//! let key = cache_key("plans:get", &["plan-basic"]);
//! let plan_name: String = cache
//!     .get_or_compute(&key, None, || async { Ok("Basic".to_owned()) })
//!     .await?;
//! assert_eq!(plan_name, "Basic");
//! # Ok(())
//! # }
//! ```

use std::{sync::Arc, time::Duration};

use serde::{Serialize, de::DeserializeOwned};
use tracing::{debug, warn};

use crate::{error::Result, store::CounterStore};

/// Default entry lifetime when the caller does not override it.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

/// Builds a stable cache key from an operation name and its arguments.
///
/// Arguments are joined with `:` in the order given, so the same call always
/// yields the same key. Callers pass each argument in a canonical textual
/// form; argument values containing `:` should be avoided or escaped by the
/// caller to preserve collision resistance.
///
/// # Examples
///
/// ```
/// use subcore::cache::cache_key;
///
/// assert_eq!(cache_key("plans:get", &["plan-basic"]), "plans:get:plan-basic");
/// assert_eq!(cache_key("plans:list", &[]), "plans:list");
/// ```
#[must_use]
pub fn cache_key(operation: &str, parts: &[&str]) -> String {
    let mut key = String::from(operation);
    for part in parts {
        key.push(':');
        key.push_str(part);
    }
    key
}

/// TTL cache backed by the shared counter store.
///
/// Cheap to clone; all clones share the underlying store handle.
#[derive(Debug, Clone)]
pub struct TtlCache {
    store: Arc<dyn CounterStore>,
    default_ttl: Duration,
}

impl TtlCache {
    /// Creates a cache with the default 300-second entry lifetime.
    #[must_use]
    pub fn new(store: Arc<dyn CounterStore>) -> Self {
        Self { store, default_ttl: DEFAULT_CACHE_TTL }
    }

    /// Creates a cache with a custom default entry lifetime.
    #[must_use]
    pub fn with_default_ttl(store: Arc<dyn CounterStore>, default_ttl: Duration) -> Self {
        Self { store, default_ttl }
    }

    /// Reads and deserializes the value under `key`.
    ///
    /// Returns `None` on absence, expiry, or a value that fails to
    /// deserialize (logged at debug level and treated as a miss).
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::StoreUnavailable`](crate::error::CoreError::StoreUnavailable)
    /// if the store cannot be reached.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let Some(raw) = self.store.get(key).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(error) => {
                debug!(key, %error, "cached value failed to deserialize, treating as miss");
                Ok(None)
            }
        }
    }

    /// Serializes and stores `value` under `key`.
    ///
    /// `ttl` of `None` applies the cache's default timeout.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Serialization`](crate::error::CoreError::Serialization)
    /// if the value cannot be serialized, or
    /// [`CoreError::StoreUnavailable`](crate::error::CoreError::StoreUnavailable)
    /// if the store cannot be reached.
    pub async fn set<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let raw = serde_json::to_string(value)?;
        self.store.set_with_expiry(key, &raw, ttl.unwrap_or(self.default_ttl)).await
    }

    /// Removes the value under `key`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::StoreUnavailable`](crate::error::CoreError::StoreUnavailable)
    /// if the store cannot be reached.
    pub async fn delete(&self, key: &str) -> Result<()> {
        self.store.delete(&[key]).await?;
        Ok(())
    }

    /// Removes every entry whose key matches a glob `pattern`.
    ///
    /// Backed by a keyspace scan. Intended for low-cardinality invalidation
    /// such as `plans:*` after an administrative mutation, not for bulk
    /// eviction over large keyspaces.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::StoreUnavailable`](crate::error::CoreError::StoreUnavailable)
    /// if the store cannot be reached.
    pub async fn invalidate_matching(&self, pattern: &str) -> Result<u64> {
        self.store.delete_matching(pattern).await
    }

    /// Returns the cached value under `key`, or computes, stores, and
    /// returns it.
    ///
    /// On a hit the computation is skipped entirely. On a miss the
    /// computation runs and its result is stored for `ttl` (default timeout
    /// when `None`). A store failure on the read or write path degrades to
    /// computing without caching (logged); the computation's own error
    /// propagates unchanged.
    ///
    /// Concurrent callers that miss simultaneously each run the computation
    /// (last write wins), which is acceptable because memoized operations are
    /// side-effect free by contract.
    ///
    /// # Errors
    ///
    /// Returns whatever error the computation itself produces.
    pub async fn get_or_compute<T, F, Fut>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        compute: F,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        match self.get::<T>(key).await {
            Ok(Some(value)) => {
                debug!(key, "cache hit");
                return Ok(value);
            }
            Ok(None) => {}
            Err(error) => {
                warn!(key, %error, "cache read failed, computing without cache");
            }
        }

        let value = compute().await?;

        if let Err(error) = self.set(key, &value, ttl).await {
            warn!(key, %error, "failed to store computed value");
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;
    use crate::store::MemoryCounterStore;

    fn cache() -> TtlCache {
        TtlCache::new(Arc::new(MemoryCounterStore::new()))
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Payload {
        id: String,
        count: u32,
    }

    #[tokio::test]
    async fn test_miss_on_absent_key() {
        let cache = cache();
        let value: Option<Payload> = cache.get("absent").await.unwrap();
        assert_eq!(value, None);
    }

    #[tokio::test]
    async fn test_set_then_get_roundtrip() {
        let cache = cache();
        let payload = Payload { id: "p-1".to_owned(), count: 3 };

        cache.set("k", &payload, None).await.unwrap();
        let value: Option<Payload> = cache.get("k").await.unwrap();
        assert_eq!(value, Some(payload));
    }

    #[tokio::test]
    async fn test_undecodable_value_is_a_miss() {
        let store = Arc::new(MemoryCounterStore::new());
        store.set("k", "{not json").await.unwrap();
        let cache = TtlCache::new(store);

        let value: Option<Payload> = cache.get("k").await.unwrap();
        assert_eq!(value, None);
    }

    #[tokio::test]
    async fn test_entry_expires() {
        let cache = cache();
        cache.set("k", &7_u32, Some(Duration::from_millis(20))).await.unwrap();

        tokio::time::sleep(Duration::from_millis(40)).await;
        let value: Option<u32> = cache.get("k").await.unwrap();
        assert_eq!(value, None);
    }

    #[tokio::test]
    async fn test_delete_removes_entry() {
        let cache = cache();
        cache.set("k", &1_u32, None).await.unwrap();
        cache.delete("k").await.unwrap();
        assert_eq!(cache.get::<u32>("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_invalidate_matching() {
        let cache = cache();
        cache.set("plans:get:a", &1_u32, None).await.unwrap();
        cache.set("plans:get:b", &2_u32, None).await.unwrap();
        cache.set("subs:get:a", &3_u32, None).await.unwrap();

        assert_eq!(cache.invalidate_matching("plans:*").await.unwrap(), 2);
        assert_eq!(cache.get::<u32>("subs:get:a").await.unwrap(), Some(3));
    }

    #[tokio::test]
    async fn test_get_or_compute_runs_once() {
        use std::sync::atomic::{AtomicU32, Ordering};

        let cache = cache();
        let calls = AtomicU32::new(0);

        for _ in 0..3 {
            let value: u32 = cache
                .get_or_compute("k", None, || async {
                    calls.fetch_add(1, Ordering::Relaxed);
                    Ok(42)
                })
                .await
                .unwrap();
            assert_eq!(value, 42);
        }

        assert_eq!(calls.load(Ordering::Relaxed), 1, "hits must skip the computation");
    }

    #[tokio::test]
    async fn test_get_or_compute_propagates_computation_error() {
        let cache = cache();
        let result: Result<u32> = cache
            .get_or_compute("k", None, || async {
                Err(crate::error::CoreError::NotFound("plan".into()))
            })
            .await;
        assert!(matches!(result, Err(crate::error::CoreError::NotFound(_))));
    }

    #[test]
    fn test_cache_key_shape() {
        assert_eq!(cache_key("subs:active", &["user-1"]), "subs:active:user-1");
        assert_eq!(cache_key("plans:list", &[]), "plans:list");
    }
}
