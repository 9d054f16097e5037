//! PostgreSQL implementation of the key-value store
//!
//! Entries live in a single `kv_entries` table. Expiry is evaluated
//! against the database clock so every instance agrees on it.

use crate::{KvStore, StoreError, StoreResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;

const LIVE: &str = "(expires_at IS NULL OR expires_at > NOW())";

/// PostgreSQL-backed store shared by every API instance
#[derive(Clone)]
pub struct PgKvStore {
    pool: PgPool,
}

impl PgKvStore {
    /// Wrap an existing pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool against `url`
    pub async fn connect(url: &str, pool_size: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(pool_size)
            .acquire_timeout(Duration::from_secs(5))
            .connect(url)
            .await
            .map_err(db_error)?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Initialize schema (run once on setup)
    pub async fn init_schema(&self) -> StoreResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kv_entries (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                expires_at TIMESTAMPTZ NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_kv_entries_expires_at ON kv_entries (expires_at)",
        )
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(())
    }

    /// Delete every expired row, returning how many were removed
    pub async fn purge_expired(&self) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM kv_entries WHERE expires_at <= NOW()")
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(result.rows_affected())
    }

    async fn add(&self, key: &str, delta: i64) -> StoreResult<i64> {
        let value: String = sqlx::query_scalar(
            r#"
            INSERT INTO kv_entries (key, value, expires_at)
            VALUES ($1, $2::bigint::text, NULL)
            ON CONFLICT (key) DO UPDATE SET
                value = (
                    CASE WHEN kv_entries.expires_at IS NOT NULL AND kv_entries.expires_at <= NOW()
                         THEN 0
                         ELSE kv_entries.value::bigint
                    END + $2::bigint
                )::text,
                expires_at = CASE WHEN kv_entries.expires_at IS NOT NULL AND kv_entries.expires_at <= NOW()
                                  THEN NULL
                                  ELSE kv_entries.expires_at
                             END
            RETURNING value
            "#,
        )
        .bind(key)
        .bind(delta)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error)?;

        value.parse().map_err(|_| StoreError::Corrupt {
            key: key.to_string(),
            message: format!("not an integer: {value}"),
        })
    }
}

fn db_error(err: sqlx::Error) -> StoreError {
    StoreError::Unavailable(err.to_string())
}

fn expiry(ttl: Option<Duration>) -> StoreResult<Option<DateTime<Utc>>> {
    ttl.map(|ttl| {
        chrono::Duration::from_std(ttl)
            .map(|ttl| Utc::now() + ttl)
            .map_err(|e| StoreError::Unavailable(format!("ttl out of range: {e}")))
    })
    .transpose()
}

#[async_trait]
impl KvStore for PgKvStore {
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO kv_entries (key, value, expires_at) VALUES ($1, $2, $3)
            ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, expires_at = EXCLUDED.expires_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(expiry(ttl)?)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn insert_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> StoreResult<bool> {
        // A live row makes the conditional update a no-op and RETURNING yields nothing.
        let inserted: Option<bool> = sqlx::query_scalar(
            r#"
            INSERT INTO kv_entries (key, value, expires_at) VALUES ($1, $2, $3)
            ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, expires_at = EXCLUDED.expires_at
                WHERE kv_entries.expires_at IS NOT NULL AND kv_entries.expires_at <= NOW()
            RETURNING TRUE
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(expiry(ttl)?)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(inserted.is_some())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        sqlx::query_scalar(&format!(
            "SELECT value FROM kv_entries WHERE key = $1 AND {LIVE}"
        ))
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        sqlx::query_scalar(&format!(
            "SELECT EXISTS(SELECT 1 FROM kv_entries WHERE key = $1 AND {LIVE})"
        ))
        .bind(key)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error)
    }

    async fn delete(&self, keys: &[String]) -> StoreResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let removed: i64 = sqlx::query_scalar(&format!(
            r#"
            WITH gone AS (
                DELETE FROM kv_entries WHERE key = ANY($1) RETURNING expires_at
            )
            SELECT COUNT(*) FROM gone WHERE {LIVE}
            "#
        ))
        .bind(keys)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(removed.max(0) as u64)
    }

    async fn increment(&self, key: &str) -> StoreResult<i64> {
        self.add(key, 1).await
    }

    async fn decrement(&self, key: &str) -> StoreResult<i64> {
        self.add(key, -1).await
    }

    async fn scan_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        sqlx::query_scalar(&format!(
            "SELECT key FROM kv_entries WHERE starts_with(key, $1) AND {LIVE}"
        ))
        .bind(prefix)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn connect() -> PgKvStore {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let store = PgKvStore::connect(&url, 2).await.unwrap();
        store.init_schema().await.unwrap();
        store
    }

    #[test]
    fn test_expiry_conversion() {
        assert!(expiry(None).unwrap().is_none());
        let at = expiry(Some(Duration::from_secs(60))).unwrap().unwrap();
        assert!(at > Utc::now());
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL"]
    async fn test_roundtrip_against_database() {
        let store = connect().await;
        let key = format!("test:{}", Utc::now().timestamp_nanos_opt().unwrap_or_default());

        assert!(store
            .insert_if_absent(&key, "v", Some(Duration::from_secs(30)))
            .await
            .unwrap());
        assert!(!store.insert_if_absent(&key, "w", None).await.unwrap());
        assert_eq!(store.get(&key).await.unwrap(), Some("v".to_string()));
        assert_eq!(store.delete(&[key.clone()]).await.unwrap(), 1);
        assert!(!store.exists(&key).await.unwrap());
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL"]
    async fn test_counter_against_database() {
        let store = connect().await;
        let key = format!("counter:{}", Utc::now().timestamp_nanos_opt().unwrap_or_default());

        assert_eq!(store.increment(&key).await.unwrap(), 1);
        assert_eq!(store.increment(&key).await.unwrap(), 2);
        assert_eq!(store.decrement(&key).await.unwrap(), 1);
        store.delete(&[key]).await.unwrap();
    }
}
