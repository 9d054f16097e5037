//! Token revocation store
//!
//! Records "this exact token is revoked until its natural expiry" in a
//! shared [`KvStore`]. Entries are keyed by the SHA-256 of the token string
//! and carry a TTL equal to the token's remaining lifetime, so no entry
//! outlives the token it revokes.
//!
//! Failure policy:
//! - Reads fail closed: an unreachable or slow store reports every token as revoked
//! - Writes fail loudly: a revocation that could not be stored is an error
//!
//! Every store call is bounded by the configured operation timeout.

use crate::metrics;
use chrono::{DateTime, Utc};
use scribe_store::{KvStore, StoreError, StoreResult};
use sha2::{Digest, Sha256};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, warn};

pub const REVOKED_KEY_PREFIX: &str = "blacklist:token:";
pub const REVOKED_COUNT_KEY: &str = "blacklist:count";

/// Revocation store errors
#[derive(Debug, Error)]
pub enum RevocationError {
    #[error("Revocation store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),
}

/// Result of a revoke call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevokeOutcome {
    /// A new entry was written
    Revoked,
    /// A live entry already existed
    AlreadyRevoked,
    /// The token had already expired; nothing was stored
    AlreadyExpired,
}

/// Revocation store over a shared TTL key-value service
pub struct RevocationStore {
    kv: Arc<dyn KvStore>,
    timeout: Duration,
}

impl RevocationStore {
    pub fn new(kv: Arc<dyn KvStore>, timeout: Duration) -> Self {
        Self { kv, timeout }
    }

    pub fn backend(&self) -> &'static str {
        self.kv.backend_name()
    }

    /// Revoke `token` until `expires_at`
    ///
    /// # Returns
    ///
    /// * `Ok(RevokeOutcome)` - Whether an entry was written
    /// * `Err(RevocationError)` - The store could not be written; the token is NOT revoked
    pub async fn revoke(
        &self,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<RevokeOutcome, RevocationError> {
        self.revoke_at(token, expires_at, Utc::now()).await
    }

    pub(crate) async fn revoke_at(
        &self,
        token: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<RevokeOutcome, RevocationError> {
        let ttl = match (expires_at - now).to_std() {
            Ok(ttl) if !ttl.is_zero() => ttl,
            _ => {
                debug!(token = %token_fingerprint(token), "Token already expired, not revoking");
                return Ok(RevokeOutcome::AlreadyExpired);
            }
        };

        let key = revocation_key(token);
        let value = expires_at.timestamp().to_string();
        let inserted = self
            .call("revoke", self.kv.insert_if_absent(&key, &value, Some(ttl)))
            .await?;
        if !inserted {
            return Ok(RevokeOutcome::AlreadyRevoked);
        }

        metrics::REVOCATIONS.inc();
        // The entry is durable at this point; a counter miss only skews observability.
        if let Err(e) = self.call("count", self.kv.increment(REVOKED_COUNT_KEY)).await {
            warn!(error = %e, "Failed to increment revocation counter");
        }
        debug!(
            token = %token_fingerprint(token),
            ttl_secs = ttl.as_secs(),
            "Token revoked"
        );
        Ok(RevokeOutcome::Revoked)
    }

    /// Whether `token` is revoked; true whenever the store cannot answer
    pub async fn is_revoked(&self, token: &str) -> bool {
        match self.call("is_revoked", self.kv.exists(&revocation_key(token))).await {
            Ok(revoked) => revoked,
            Err(e) => {
                error!(
                    token = %token_fingerprint(token),
                    error = %e,
                    "Revocation check failed; treating token as revoked"
                );
                true
            }
        }
    }

    /// Administrative unrevoke; returns whether an entry existed
    pub async fn remove(&self, token: &str) -> Result<bool, RevocationError> {
        let removed = self
            .call("remove", self.kv.delete(&[revocation_key(token)]))
            .await?;
        if removed == 0 {
            return Ok(false);
        }
        self.call("count", self.kv.decrement(REVOKED_COUNT_KEY))
            .await?;
        Ok(true)
    }

    /// Remove every entry and reset the counter; returns how many entries were live
    pub async fn clear_all(&self) -> Result<u64, RevocationError> {
        let keys = self
            .call("clear_all", self.kv.scan_prefix(REVOKED_KEY_PREFIX))
            .await?;
        let removed = self.call("clear_all", self.kv.delete(&keys)).await?;
        self.call(
            "clear_all",
            self.kv.delete(&[REVOKED_COUNT_KEY.to_string()]),
        )
        .await?;
        warn!(removed, "All token revocations cleared");
        Ok(removed)
    }

    /// Value of the population counter
    pub async fn count(&self) -> Result<u64, RevocationError> {
        let value = self.call("count", self.kv.get(REVOKED_COUNT_KEY)).await?;
        let count = match value {
            Some(raw) => raw.parse::<i64>().map_err(|_| StoreError::Corrupt {
                key: REVOKED_COUNT_KEY.to_string(),
                message: format!("not an integer: {raw}"),
            })?,
            None => 0,
        };
        Ok(count.max(0) as u64)
    }

    /// Reset the counter to the number of live entries
    ///
    /// Entries that lapse naturally do not decrement the counter; this
    /// brings it back in line.
    pub async fn reconcile_count(&self) -> Result<u64, RevocationError> {
        let live = self
            .call("reconcile", self.kv.scan_prefix(REVOKED_KEY_PREFIX))
            .await?
            .len() as u64;
        self.call(
            "reconcile",
            self.kv.set(REVOKED_COUNT_KEY, &live.to_string(), None),
        )
        .await?;
        debug!(live, "Revocation counter reconciled");
        Ok(live)
    }

    pub async fn healthy(&self) -> bool {
        match self.call("health", self.kv.ping()).await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Revocation store health check failed");
                false
            }
        }
    }

    async fn call<T>(
        &self,
        operation: &'static str,
        fut: impl Future<Output = StoreResult<T>>,
    ) -> StoreResult<T> {
        let result = match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(self.timeout)),
        };
        if result.is_err() {
            metrics::record_store_failure(operation);
        }
        result
    }
}

/// Store key for a token: a fixed-width digest instead of the raw token
pub fn revocation_key(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{REVOKED_KEY_PREFIX}{:x}", hasher.finalize())
}

/// Short, non-reversible token identifier for logs
pub fn token_fingerprint(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..12].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use scribe_store::testing::FlakyKvStore;
    use scribe_store::MemoryKvStore;

    fn store() -> (RevocationStore, MemoryKvStore) {
        let kv = MemoryKvStore::new();
        let store = RevocationStore::new(Arc::new(kv.clone()), Duration::from_millis(200));
        (store, kv)
    }

    fn later() -> DateTime<Utc> {
        Utc::now() + ChronoDuration::minutes(10)
    }

    #[tokio::test]
    async fn test_revoke_and_check() {
        let (store, _) = store();
        assert!(!store.is_revoked("token-a").await);

        let outcome = store.revoke("token-a", later()).await.unwrap();
        assert_eq!(outcome, RevokeOutcome::Revoked);
        assert!(store.is_revoked("token-a").await);
        assert!(!store.is_revoked("token-b").await);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_revoke_twice_is_idempotent() {
        let (store, _) = store();
        store.revoke("token-a", later()).await.unwrap();

        let outcome = store.revoke("token-a", later()).await.unwrap();
        assert_eq!(outcome, RevokeOutcome::AlreadyRevoked);
        assert!(store.is_revoked("token-a").await);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_past_expiry_stores_nothing() {
        let (store, kv) = store();
        let outcome = store
            .revoke("token-a", Utc::now() - ChronoDuration::seconds(1))
            .await
            .unwrap();

        assert_eq!(outcome, RevokeOutcome::AlreadyExpired);
        assert!(!store.is_revoked("token-a").await);
        assert!(kv.is_empty());
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_entry_does_not_outlive_token() {
        let (store, _) = store();
        let expires = Utc::now() + ChronoDuration::seconds(1);
        store.revoke("token-a", expires).await.unwrap();
        assert!(store.is_revoked("token-a").await);

        tokio::time::sleep(Duration::from_millis(1_200)).await;
        assert!(!store.is_revoked("token-a").await);
    }

    #[tokio::test]
    async fn test_keys_are_hashed() {
        let (store, kv) = store();
        let token = "header.payload.signature";
        store.revoke(token, later()).await.unwrap();

        let keys = kv.scan_prefix(REVOKED_KEY_PREFIX).await.unwrap();
        assert_eq!(keys, vec![revocation_key(token)]);
        assert!(!keys[0].contains(token));
        assert_eq!(keys[0].len(), REVOKED_KEY_PREFIX.len() + 64);
    }

    #[tokio::test]
    async fn test_remove() {
        let (store, _) = store();
        store.revoke("token-a", later()).await.unwrap();
        store.revoke("token-b", later()).await.unwrap();

        assert!(store.remove("token-a").await.unwrap());
        assert!(!store.remove("token-a").await.unwrap());
        assert!(!store.is_revoked("token-a").await);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_clear_all() {
        let (store, _) = store();
        for token in ["a", "b", "c"] {
            store.revoke(token, later()).await.unwrap();
        }

        assert_eq!(store.clear_all().await.unwrap(), 3);
        assert_eq!(store.count().await.unwrap(), 0);
        assert!(!store.is_revoked("b").await);
    }

    #[tokio::test]
    async fn test_reconcile_after_natural_expiry() {
        let (store, _) = store();
        store
            .revoke("short", Utc::now() + ChronoDuration::seconds(1))
            .await
            .unwrap();
        store.revoke("long", later()).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 2);

        tokio::time::sleep(Duration::from_millis(1_200)).await;

        assert_eq!(store.reconcile_count().await.unwrap(), 1);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_read_failure_is_revoked() {
        let kv = FlakyKvStore::new();
        let store = RevocationStore::new(Arc::new(kv.clone()), Duration::from_millis(200));

        kv.set_failing(true);
        assert!(store.is_revoked("never-seen").await);
        assert!(!store.healthy().await);
    }

    #[tokio::test]
    async fn test_write_failure_is_hard_error() {
        let kv = FlakyKvStore::new();
        let store = RevocationStore::new(Arc::new(kv.clone()), Duration::from_millis(200));

        kv.set_failing(true);
        assert!(matches!(
            store.revoke("token-a", later()).await,
            Err(RevocationError::StoreUnavailable(_))
        ));

        kv.set_failing(false);
        assert!(!store.is_revoked("token-a").await);
    }

    #[tokio::test]
    async fn test_timeout_is_failure() {
        let kv = FlakyKvStore::new();
        let store = RevocationStore::new(Arc::new(kv.clone()), Duration::from_millis(20));

        kv.set_latency(Duration::from_millis(100));
        assert!(store.is_revoked("never-seen").await);
        assert!(matches!(
            store.revoke("token-a", later()).await,
            Err(RevocationError::StoreUnavailable(StoreError::Timeout(_)))
        ));
    }

    #[test]
    fn test_fingerprint_is_short_and_stable() {
        let a = token_fingerprint("some.jwt.value");
        assert_eq!(a.len(), 12);
        assert_eq!(a, token_fingerprint("some.jwt.value"));
        assert_ne!(a, token_fingerprint("other.jwt.value"));
    }
}
