//! In-process fallback storage used while the external cache is unreachable.
//!
//! Implements the same three operations as the remote backend but without
//! real TTL expiry: entries live until they are deleted or the process
//! restarts. That tradeoff is acceptable because the fallback only ever
//! carries data for the outage window.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;

/// Concurrent in-memory key/value map with the cache-store operation set.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    entries: Arc<DashMap<String, String>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    /// Store a value. The TTL is accepted for interface parity and ignored.
    pub fn set(&self, key: &str, value: &str, _ttl: Option<Duration>) {
        self.entries.insert(key.to_string(), value.to_string());
    }

    pub fn delete(&self, key: &str) {
        self.entries.remove(key);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_delete_roundtrip() {
        let store = MemoryStore::new();
        assert!(store.get("k").is_none());

        store.set("k", "v", Some(Duration::from_secs(60)));
        assert_eq!(store.get("k").as_deref(), Some("v"));

        store.delete("k");
        assert!(store.get("k").is_none());
    }

    #[test]
    fn ttl_is_not_enforced() {
        let store = MemoryStore::new();
        store.set("k", "v", Some(Duration::from_millis(1)));
        std::thread::sleep(Duration::from_millis(5));
        // Entries survive their nominal TTL in the fallback.
        assert_eq!(store.get("k").as_deref(), Some("v"));
    }

    #[test]
    fn clones_share_storage() {
        let store = MemoryStore::new();
        let clone = store.clone();
        store.set("k", "v", None);
        assert_eq!(clone.get("k").as_deref(), Some("v"));
    }
}
