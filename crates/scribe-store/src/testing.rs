//! Fault-injecting store for outage and latency tests

use crate::{KvStore, MemoryKvStore, StoreError, StoreResult};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Wraps a [`MemoryKvStore`]; can be switched into failing or slow mode at runtime
#[derive(Debug, Clone, Default)]
pub struct FlakyKvStore {
    inner: MemoryKvStore,
    failing: Arc<AtomicBool>,
    latency_ms: Arc<AtomicU64>,
}

impl FlakyKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every subsequent call fails with [`StoreError::Unavailable`]
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Every subsequent call sleeps before running
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn inner(&self) -> &MemoryKvStore {
        &self.inner
    }

    async fn gate(&self) -> StoreResult<()> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("simulated outage".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl KvStore for FlakyKvStore {
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        self.gate().await?;
        self.inner.set(key, value, ttl).await
    }

    async fn insert_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> StoreResult<bool> {
        self.gate().await?;
        self.inner.insert_if_absent(key, value, ttl).await
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.gate().await?;
        self.inner.get(key).await
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        self.gate().await?;
        self.inner.exists(key).await
    }

    async fn delete(&self, keys: &[String]) -> StoreResult<u64> {
        self.gate().await?;
        self.inner.delete(keys).await
    }

    async fn increment(&self, key: &str) -> StoreResult<i64> {
        self.gate().await?;
        self.inner.increment(key).await
    }

    async fn decrement(&self, key: &str) -> StoreResult<i64> {
        self.gate().await?;
        self.inner.decrement(key).await
    }

    async fn scan_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        self.gate().await?;
        self.inner.scan_prefix(prefix).await
    }

    async fn ping(&self) -> StoreResult<()> {
        self.gate().await
    }

    fn backend_name(&self) -> &'static str {
        "flaky-memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_toggle_failure() {
        let store = FlakyKvStore::new();
        store.set("k", "v", None).await.unwrap();

        store.set_failing(true);
        assert!(matches!(
            store.exists("k").await,
            Err(StoreError::Unavailable(_))
        ));

        store.set_failing(false);
        assert!(store.exists("k").await.unwrap());
    }
}
