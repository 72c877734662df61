//! Ephemeral TTL key-value cache.
//!
//! Snapshots, checkpoints and live progress are advisory state with a
//! bounded lifetime. The `EphemeralCache` trait hides whether entries live
//! in an in-process map (development, tests) or an external TTL-capable KV
//! (production); callers see the same four operations either way.
//! Last-writer-wins semantics are acceptable because nothing behind this
//! interface is a source of truth.

use crate::errors::StoreError;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// TTL-capable key-value store for advisory pipeline state.
pub trait EphemeralCache: Send + Sync {
    /// Store `value` under `key` for at most `ttl`.
    fn put(&self, key: &str, value: Value, ttl: Duration) -> Result<(), StoreError>;

    /// Fetch a live entry, or `None` if absent or expired.
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;

    /// Remove an entry; removing a missing key is not an error.
    fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Live keys starting with `prefix`, sorted.
    fn keys(&self, prefix: &str) -> Result<Vec<String>, StoreError>;
}

struct Entry {
    value: Value,
    expires_at: Instant,
}

/// In-process cache used in development and tests.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every expired entry. The cache also expires lazily on read, so
    /// the sweep only bounds memory, not correctness.
    pub fn sweep(&self) -> Result<usize, StoreError> {
        let mut entries = self.entries.lock().map_err(|_| StoreError::LockPoisoned)?;
        let now = Instant::now();
        let before = entries.len();
        entries.retain(|_, e| e.expires_at > now);
        Ok(before - entries.len())
    }

    /// Number of live entries.
    pub fn len(&self) -> Result<usize, StoreError> {
        let entries = self.entries.lock().map_err(|_| StoreError::LockPoisoned)?;
        let now = Instant::now();
        Ok(entries.values().filter(|e| e.expires_at > now).count())
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }
}

impl EphemeralCache for MemoryCache {
    fn put(&self, key: &str, value: Value, ttl: Duration) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().map_err(|_| StoreError::LockPoisoned)?;
        entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let mut entries = self.entries.lock().map_err(|_| StoreError::LockPoisoned)?;
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().map_err(|_| StoreError::LockPoisoned)?;
        entries.remove(key);
        Ok(())
    }

    fn keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let entries = self.entries.lock().map_err(|_| StoreError::LockPoisoned)?;
        let now = Instant::now();
        let mut keys: Vec<String> = entries
            .iter()
            .filter(|(k, e)| k.starts_with(prefix) && e.expires_at > now)
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn put_get_round_trip() {
        let cache = MemoryCache::new();
        cache
            .put("progress:e1", json!({"completed": 5}), Duration::from_secs(60))
            .unwrap();
        let value = cache.get("progress:e1").unwrap().unwrap();
        assert_eq!(value["completed"], 5);
    }

    #[test]
    fn expired_entries_read_as_absent() {
        let cache = MemoryCache::new();
        cache
            .put("k", json!(1), Duration::from_millis(5))
            .unwrap();
        std::thread::sleep(Duration::from_millis(20));
        assert!(cache.get("k").unwrap().is_none());
        assert!(cache.is_empty().unwrap());
    }

    #[test]
    fn keys_filters_by_prefix() {
        let cache = MemoryCache::new();
        let ttl = Duration::from_secs(60);
        cache.put("error:e1:step_a", json!(1), ttl).unwrap();
        cache.put("error:e1:step_b", json!(2), ttl).unwrap();
        cache.put("error:e2:step_a", json!(3), ttl).unwrap();
        cache.put("progress:e1", json!(4), ttl).unwrap();

        let keys = cache.keys("error:e1:").unwrap();
        assert_eq!(keys, vec!["error:e1:step_a", "error:e1:step_b"]);
    }

    #[test]
    fn delete_is_idempotent() {
        let cache = MemoryCache::new();
        cache.put("k", json!(1), Duration::from_secs(60)).unwrap();
        cache.delete("k").unwrap();
        cache.delete("k").unwrap();
        assert!(cache.get("k").unwrap().is_none());
    }

    #[test]
    fn sweep_drops_expired_entries() {
        let cache = MemoryCache::new();
        cache.put("a", json!(1), Duration::from_millis(5)).unwrap();
        cache.put("b", json!(2), Duration::from_secs(60)).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        let dropped = cache.sweep().unwrap();
        assert_eq!(dropped, 1);
        assert_eq!(cache.keys("").unwrap(), vec!["b"]);
    }

    #[test]
    fn overwrite_refreshes_ttl() {
        let cache = MemoryCache::new();
        cache.put("k", json!(1), Duration::from_millis(5)).unwrap();
        cache.put("k", json!(2), Duration::from_secs(60)).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(cache.get("k").unwrap().unwrap(), json!(2));
    }
}
