//! In-memory key-value store
//!
//! Single-process backend for development and tests. Entries expire
//! lazily on access; `purge_expired` reclaims memory eagerly.

use crate::{KvStore, StoreError, StoreResult};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(value: &str, ttl: Option<Duration>, now: Instant) -> Self {
        Self {
            value: value.to_string(),
            expires_at: ttl.map(|ttl| now + ttl),
        }
    }

    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// DashMap-backed store; clones share the same entries
#[derive(Debug, Clone, Default)]
pub struct MemoryKvStore {
    entries: Arc<DashMap<String, Entry>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of physically stored entries, expired ones included
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every expired entry, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_live(now));
        before.saturating_sub(self.entries.len())
    }

    fn live_value(&self, key: &str, now: Instant) -> Option<String> {
        let expired = match self.entries.get(key) {
            Some(entry) if entry.is_live(now) => return Some(entry.value.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove_if(key, |_, entry| !entry.is_live(now));
        }
        None
    }

    fn add(&self, key: &str, delta: i64) -> StoreResult<i64> {
        let now = Instant::now();
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::new("0", None, now));
        if !entry.is_live(now) {
            *entry = Entry::new("0", None, now);
        }

        let current: i64 = entry.value.parse().map_err(|_| StoreError::Corrupt {
            key: key.to_string(),
            message: format!("not an integer: {}", entry.value),
        })?;
        let next = current + delta;
        entry.value = next.to_string();
        Ok(next)
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        self.entries
            .insert(key.to_string(), Entry::new(value, ttl, Instant::now()));
        Ok(())
    }

    async fn insert_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> StoreResult<bool> {
        let now = Instant::now();
        match self.entries.entry(key.to_string()) {
            MapEntry::Occupied(mut occupied) => {
                if occupied.get().is_live(now) {
                    Ok(false)
                } else {
                    occupied.insert(Entry::new(value, ttl, now));
                    Ok(true)
                }
            }
            MapEntry::Vacant(vacant) => {
                vacant.insert(Entry::new(value, ttl, now));
                Ok(true)
            }
        }
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.live_value(key, Instant::now()))
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        Ok(self.live_value(key, Instant::now()).is_some())
    }

    async fn delete(&self, keys: &[String]) -> StoreResult<u64> {
        let now = Instant::now();
        let removed = keys
            .iter()
            .filter_map(|key| self.entries.remove(key))
            .filter(|(_, entry)| entry.is_live(now))
            .count();
        Ok(removed as u64)
    }

    async fn increment(&self, key: &str) -> StoreResult<i64> {
        self.add(key, 1)
    }

    async fn decrement(&self, key: &str) -> StoreResult<i64> {
        self.add(key, -1)
    }

    async fn scan_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let now = Instant::now();
        Ok(self
            .entries
            .iter()
            .filter(|item| item.key().starts_with(prefix) && item.value().is_live(now))
            .map(|item| item.key().clone())
            .collect())
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_exists() {
        let store = MemoryKvStore::new();
        store.set("a", "1", None).await.unwrap();

        assert_eq!(store.get("a").await.unwrap(), Some("1".to_string()));
        assert!(store.exists("a").await.unwrap());
        assert!(!store.exists("b").await.unwrap());
    }

    #[tokio::test]
    async fn test_entries_expire() {
        let store = MemoryKvStore::new();
        store
            .set("short", "v", Some(Duration::from_millis(20)))
            .await
            .unwrap();
        assert!(store.exists("short").await.unwrap());

        tokio::time::sleep(Duration::from_millis(40)).await;

        assert!(!store.exists("short").await.unwrap());
        assert_eq!(store.get("short").await.unwrap(), None);
        // lazily removed on access
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_insert_if_absent() {
        let store = MemoryKvStore::new();
        assert!(store.insert_if_absent("k", "first", None).await.unwrap());
        assert!(!store.insert_if_absent("k", "second", None).await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), Some("first".to_string()));
    }

    #[tokio::test]
    async fn test_insert_if_absent_replaces_expired() {
        let store = MemoryKvStore::new();
        store
            .set("k", "old", Some(Duration::from_millis(10)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(25)).await;

        assert!(store.insert_if_absent("k", "new", None).await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), Some("new".to_string()));
    }

    #[tokio::test]
    async fn test_concurrent_insert_if_absent_single_winner() {
        let store = MemoryKvStore::new();
        let mut handles = Vec::new();
        for i in 0..32 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .insert_if_absent("contested", &i.to_string(), None)
                    .await
                    .unwrap()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_counters() {
        let store = MemoryKvStore::new();
        assert_eq!(store.increment("count").await.unwrap(), 1);
        assert_eq!(store.increment("count").await.unwrap(), 2);
        assert_eq!(store.decrement("count").await.unwrap(), 1);
        assert_eq!(store.get("count").await.unwrap(), Some("1".to_string()));
    }

    #[tokio::test]
    async fn test_increment_non_integer_is_corrupt() {
        let store = MemoryKvStore::new();
        store.set("count", "many", None).await.unwrap();
        assert!(matches!(
            store.increment("count").await,
            Err(StoreError::Corrupt { .. })
        ));
    }

    #[tokio::test]
    async fn test_delete_counts_live_entries_only() {
        let store = MemoryKvStore::new();
        store.set("a", "1", None).await.unwrap();
        store
            .set("b", "1", Some(Duration::from_millis(5)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(15)).await;

        let removed = store
            .delete(&["a".to_string(), "b".to_string(), "c".to_string()])
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_scan_prefix() {
        let store = MemoryKvStore::new();
        store.set("revoked:1", "x", None).await.unwrap();
        store.set("revoked:2", "x", None).await.unwrap();
        store.set("other:1", "x", None).await.unwrap();

        let mut keys = store.scan_prefix("revoked:").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["revoked:1", "revoked:2"]);
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let store = MemoryKvStore::new();
        store.set("keep", "x", None).await.unwrap();
        store
            .set("drop", "x", Some(Duration::from_millis(5)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(15)).await;

        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.len(), 1);
    }
}
