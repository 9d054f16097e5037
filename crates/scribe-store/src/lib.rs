//! Scribe Store - TTL key-value store abstraction
//!
//! Provides the small key-value surface the revocation store is built on:
//! expiring writes, reads, deletes, counters and prefix scans.
//! Every operation is atomic per key at the store level.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

pub mod memory;
pub mod postgres;
#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use memory::MemoryKvStore;
pub use postgres::PgKvStore;

/// Key-value store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Store operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Corrupt value under {key}: {message}")]
    Corrupt { key: String, message: String },
}

impl From<StoreError> for scribe_core::ScribeError {
    fn from(err: StoreError) -> Self {
        scribe_core::ScribeError::Store(err.to_string())
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Trait for TTL-aware key-value backends
///
/// Expired keys behave exactly like absent keys for every operation.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Store `value` under `key`, replacing any previous value
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()>;

    /// Store `value` only if `key` is absent; returns whether the write happened
    async fn insert_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> StoreResult<bool>;

    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    async fn exists(&self, key: &str) -> StoreResult<bool>;

    /// Delete keys, returning how many live entries were removed
    async fn delete(&self, keys: &[String]) -> StoreResult<u64>;

    /// Atomically add 1 to an integer counter (missing counters start at 0)
    async fn increment(&self, key: &str) -> StoreResult<i64>;

    /// Atomically subtract 1 from an integer counter
    async fn decrement(&self, key: &str) -> StoreResult<i64>;

    /// List live keys starting with `prefix`
    async fn scan_prefix(&self, prefix: &str) -> StoreResult<Vec<String>>;

    /// Round-trip to the backend
    async fn ping(&self) -> StoreResult<()>;

    /// Short backend name for logs and the admin surface
    fn backend_name(&self) -> &'static str;
}
