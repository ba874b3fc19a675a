//! In-process reference implementation of the shared counter store.

use std::{
    collections::HashMap,
    sync::Mutex,
    time::{Duration, Instant},
};

use async_trait::async_trait;

use super::CounterStore;
use crate::error::Result;

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| deadline <= now)
    }
}

/// Single-process counter store for tests and local development.
///
/// Implements the full [`CounterStore`] contract, including TTL expiry
/// (evaluated lazily against a monotonic clock) and atomic
/// increment/compare-and-swap (serialized by an internal mutex, the local
/// stand-in for the atomicity a real shared store provides across
/// processes). It is NOT a substitute for a shared store in replicated
/// deployments: state lives in this process only.
///
/// # Examples
///
/// ```rust
/// use subcore::store::{CounterStore, MemoryCounterStore};
///
/// # async fn example() -> subcore::error::Result<()> {
/// let store = MemoryCounterStore::new();
/// assert_eq!(store.incr("rate:10.0.0.1").await?, 1);
/// assert_eq!(store.incr("rate:10.0.0.1").await?, 2);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct MemoryCounterStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryCounterStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f` over the live (non-expired) entry for `key`, pruning it
    /// first if its TTL has lapsed.
    fn with_live_entry<T>(
        entries: &mut HashMap<String, Entry>,
        key: &str,
        f: impl FnOnce(Option<&mut Entry>) -> T,
    ) -> T {
        let now = Instant::now();
        if entries.get(key).is_some_and(|entry| entry.is_expired(now)) {
            entries.remove(key);
        }
        f(entries.get_mut(key))
    }
}

/// Matches a glob pattern where `*` spans any run of characters.
///
/// Only `*` is supported; that is the only wildcard the crate's key patterns
/// use.
fn glob_match(pattern: &str, input: &str) -> bool {
    match pattern.split_once('*') {
        None => pattern == input,
        Some((prefix, rest)) => {
            let Some(remaining) = input.strip_prefix(prefix) else {
                return false;
            };
            if rest.is_empty() {
                return true;
            }
            (0..=remaining.len())
                .any(|i| remaining.is_char_boundary(i) && glob_match(rest, &remaining[i..]))
        }
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut entries = self.entries.lock().expect("store mutex poisoned");
        Ok(Self::with_live_entry(&mut entries, key, |entry| {
            entry.map(|e| e.value.clone())
        }))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.entries.lock().expect("store mutex poisoned");
        entries.insert(key.to_owned(), Entry { value: value.to_owned(), expires_at: None });
        Ok(())
    }

    async fn set_with_expiry(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut entries = self.entries.lock().expect("store mutex poisoned");
        entries.insert(
            key.to_owned(),
            Entry { value: value.to_owned(), expires_at: Some(Instant::now() + ttl) },
        );
        Ok(())
    }

    async fn incr(&self, key: &str) -> Result<i64> {
        let mut entries = self.entries.lock().expect("store mutex poisoned");
        let now = Instant::now();
        if entries.get(key).is_some_and(|entry| entry.is_expired(now)) {
            entries.remove(key);
        }
        match entries.get_mut(key) {
            Some(entry) => {
                let next = entry.value.parse::<i64>().unwrap_or(0) + 1;
                entry.value = next.to_string();
                Ok(next)
            }
            None => {
                entries.insert(key.to_owned(), Entry { value: "1".to_owned(), expires_at: None });
                Ok(1)
            }
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut entries = self.entries.lock().expect("store mutex poisoned");
        Ok(Self::with_live_entry(&mut entries, key, |entry| match entry {
            Some(entry) => {
                entry.expires_at = Some(Instant::now() + ttl);
                true
            }
            None => false,
        }))
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        let mut entries = self.entries.lock().expect("store mutex poisoned");
        Ok(Self::with_live_entry(&mut entries, key, |entry| {
            entry
                .and_then(|e| e.expires_at)
                .map(|deadline| deadline.saturating_duration_since(Instant::now()))
        }))
    }

    async fn delete(&self, keys: &[&str]) -> Result<u64> {
        let mut entries = self.entries.lock().expect("store mutex poisoned");
        let now = Instant::now();
        let mut removed = 0;
        for key in keys {
            if let Some(entry) = entries.remove(*key)
                && !entry.is_expired(now)
            {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn delete_matching(&self, pattern: &str) -> Result<u64> {
        let mut entries = self.entries.lock().expect("store mutex poisoned");
        let now = Instant::now();
        let matching: Vec<String> = entries
            .iter()
            .filter(|(key, entry)| !entry.is_expired(now) && glob_match(pattern, key))
            .map(|(key, _)| key.clone())
            .collect();
        let removed = matching.len() as u64;
        for key in matching {
            entries.remove(&key);
        }
        Ok(removed)
    }

    async fn compare_and_swap(&self, key: &str, expected: &str, new: &str) -> Result<bool> {
        let mut entries = self.entries.lock().expect("store mutex poisoned");
        Ok(Self::with_live_entry(&mut entries, key, |entry| match entry {
            Some(entry) if entry.value == expected => {
                entry.value = new.to_owned();
                true
            }
            _ => false,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_missing_key_returns_none() {
        let store = MemoryCounterStore::new();
        assert_eq!(store.get("absent").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let store = MemoryCounterStore::new();
        store.set("k", "v").await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn test_expired_value_reads_as_absent() {
        let store = MemoryCounterStore::new();
        store.set_with_expiry("k", "v", Duration::from_millis(20)).await.unwrap();
        assert!(store.get("k").await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_incr_counts_from_one() {
        let store = MemoryCounterStore::new();
        assert_eq!(store.incr("n").await.unwrap(), 1);
        assert_eq!(store.incr("n").await.unwrap(), 2);
        assert_eq!(store.incr("n").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_incr_restarts_after_expiry() {
        let store = MemoryCounterStore::new();
        store.incr("n").await.unwrap();
        store.expire("n", Duration::from_millis(20)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(store.incr("n").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_expire_on_missing_key_is_false() {
        let store = MemoryCounterStore::new();
        assert!(!store.expire("absent", Duration::from_secs(1)).await.unwrap());
    }

    #[tokio::test]
    async fn test_ttl_reports_remaining_lifetime() {
        let store = MemoryCounterStore::new();
        store.set_with_expiry("k", "v", Duration::from_secs(60)).await.unwrap();

        let remaining = store.ttl("k").await.unwrap().unwrap();
        assert!(remaining <= Duration::from_secs(60));
        assert!(remaining > Duration::from_secs(58));
    }

    #[tokio::test]
    async fn test_ttl_none_without_expiry() {
        let store = MemoryCounterStore::new();
        store.set("k", "v").await.unwrap();
        assert_eq!(store.ttl("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_delete_counts_existing_keys() {
        let store = MemoryCounterStore::new();
        store.set("a", "1").await.unwrap();
        store.set("b", "2").await.unwrap();
        assert_eq!(store.delete(&["a", "b", "c"]).await.unwrap(), 2);
        assert_eq!(store.get("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_delete_matching_removes_by_pattern() {
        let store = MemoryCounterStore::new();
        store.set("plans:get:1", "x").await.unwrap();
        store.set("plans:list", "y").await.unwrap();
        store.set("rate:10.0.0.1", "z").await.unwrap();

        assert_eq!(store.delete_matching("plans:*").await.unwrap(), 2);
        assert!(store.get("rate:10.0.0.1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_compare_and_swap_success_and_failure() {
        let store = MemoryCounterStore::new();
        store.set("state", "OPEN").await.unwrap();

        assert!(store.compare_and_swap("state", "OPEN", "HALF_OPEN").await.unwrap());
        assert_eq!(store.get("state").await.unwrap().as_deref(), Some("HALF_OPEN"));

        // Second caller attempting the same transition loses.
        assert!(!store.compare_and_swap("state", "OPEN", "HALF_OPEN").await.unwrap());
    }

    #[tokio::test]
    async fn test_compare_and_swap_on_missing_key_fails() {
        let store = MemoryCounterStore::new();
        assert!(!store.compare_and_swap("absent", "OPEN", "HALF_OPEN").await.unwrap());
    }

    #[test]
    fn test_glob_match_literal() {
        assert!(glob_match("plans:list", "plans:list"));
        assert!(!glob_match("plans:list", "plans:list:2"));
    }

    #[test]
    fn test_glob_match_wildcards() {
        assert!(glob_match("plans:*", "plans:get:abc"));
        assert!(glob_match("*:state", "circuit:payments:state"));
        assert!(glob_match("circuit:*:state", "circuit:payments:state"));
        assert!(!glob_match("circuit:*:state", "circuit:payments:failures"));
    }
}
