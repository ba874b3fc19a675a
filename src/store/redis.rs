//! Redis-backed implementation of the shared counter store.

use std::time::Duration;

use async_trait::async_trait;
use redis::{AsyncCommands, Client, Script, aio::ConnectionManager};

use super::CounterStore;
use crate::error::Result;

/// Compare-and-swap as a single server-side script.
///
/// GET + SET on the client would reintroduce the read-modify-write race this
/// primitive exists to close; EVAL executes atomically on the server.
const CAS_SCRIPT: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    redis.call('SET', KEYS[1], ARGV[2])
    return 1
end
return 0
";

/// Shared counter store over a Redis connection manager.
///
/// The connection manager multiplexes one connection and reconnects
/// transparently, so the store is cheap to clone and share across tasks.
///
/// # Examples
///
/// ```rust,no_run
/// use subcore::store::{CounterStore, RedisCounterStore};
///
/// # async fn example() -> subcore::error::Result<()> {
/// let store = RedisCounterStore::connect("redis://127.0.0.1:6379").await?;
/// store.set_with_expiry("cache:greeting", "\"hello\"", std::time::Duration::from_secs(300)).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct RedisCounterStore {
    conn: ConnectionManager,
    cas: Script,
}

impl std::fmt::Debug for RedisCounterStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCounterStore").finish_non_exhaustive()
    }
}

impl RedisCounterStore {
    /// Connects to Redis at `url` (`redis://` or `rediss://`).
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::StoreUnavailable`](crate::error::CoreError::StoreUnavailable)
    /// if the URL is malformed or the initial connection fails.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self::from_manager(conn))
    }

    /// Wraps an already-established connection manager.
    #[must_use]
    pub fn from_manager(conn: ConnectionManager) -> Self {
        Self { conn, cas: Script::new(CAS_SCRIPT) }
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let () = conn.set(key, value).await?;
        Ok(())
    }

    async fn set_with_expiry(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        // SETEX with a zero expiry is a Redis error; clamp to one second.
        let seconds = ttl.as_secs().max(1);
        let () = conn.set_ex(key, value, seconds).await?;
        Ok(())
    }

    async fn incr(&self, key: &str) -> Result<i64> {
        let mut conn = self.conn.clone();
        let value: i64 = conn.incr(key, 1).await?;
        Ok(value)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn.clone();
        let seconds = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX).max(1);
        let applied: bool = conn.expire(key, seconds).await?;
        Ok(applied)
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        let mut conn = self.conn.clone();
        // TTL returns -2 for a missing key, -1 for a key without expiry.
        let seconds: i64 = conn.ttl(key).await?;
        match u64::try_from(seconds) {
            Ok(secs) => Ok(Some(Duration::from_secs(secs))),
            Err(_) => Ok(None),
        }
    }

    async fn delete(&self, keys: &[&str]) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.clone();
        let removed: u64 = conn.del(keys).await?;
        Ok(removed)
    }

    async fn delete_matching(&self, pattern: &str) -> Result<u64> {
        let mut conn = self.conn.clone();
        let keys: Vec<String> = conn.keys(pattern).await?;
        if keys.is_empty() {
            return Ok(0);
        }
        let removed: u64 = conn.del(keys).await?;
        Ok(removed)
    }

    async fn compare_and_swap(&self, key: &str, expected: &str, new: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let swapped: i64 =
            self.cas.key(key).arg(expected).arg(new).invoke_async(&mut conn).await?;
        Ok(swapped == 1)
    }
}
