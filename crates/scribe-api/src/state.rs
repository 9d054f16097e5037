//! Application state management

use crate::auth::{
    AuthService, IdentityStore, MemoryIdentityStore, PasswordHasher, PgIdentityStore,
    RevocationStore, TokenService,
};
use crate::middleware::rate_limit::RateLimiter;
use scribe_core::{AppConfig, RevocationBackend};
use scribe_store::{KvStore, MemoryKvStore, PgKvStore, StoreError};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Backend handle for reclaiming expired key-value entries
#[derive(Clone)]
enum StorePurger {
    Memory(MemoryKvStore),
    Postgres(PgKvStore),
}

impl StorePurger {
    async fn purge(&self) -> Result<u64, StoreError> {
        match self {
            StorePurger::Memory(store) => Ok(store.purge_expired() as u64),
            StorePurger::Postgres(store) => store.purge_expired().await,
        }
    }
}

/// Application state shared across handlers
pub struct AppState {
    /// Application configuration
    pub config: AppConfig,
    pub tokens: Arc<TokenService>,
    pub revocations: Arc<RevocationStore>,
    pub limiter: Arc<RateLimiter>,
    pub identities: Arc<dyn IdentityStore>,
    pub auth: AuthService,
    /// Server start time
    pub start_time: Instant,
    /// Request counter
    pub request_count: AtomicU64,
    /// Ready status
    pub is_ready: AtomicBool,
    purger: Option<StorePurger>,
}

impl AppState {
    /// Wire the services over the given stores
    pub fn new(
        config: AppConfig,
        kv: Arc<dyn KvStore>,
        identities: Arc<dyn IdentityStore>,
    ) -> anyhow::Result<Self> {
        let tokens = Arc::new(TokenService::new(&config.auth));
        let revocations = Arc::new(RevocationStore::new(
            kv,
            Duration::from_millis(config.revocation.operation_timeout_ms),
        ));
        let limiter = Arc::new(RateLimiter::new(&config.rate_limits));
        let passwords = PasswordHasher::from_config(&config.auth)?;

        let auth = AuthService::new(
            identities.clone(),
            tokens.clone(),
            revocations.clone(),
            limiter.clone(),
            passwords,
        );

        Ok(Self {
            config,
            tokens,
            revocations,
            limiter,
            identities,
            auth,
            start_time: Instant::now(),
            request_count: AtomicU64::new(0),
            is_ready: AtomicBool::new(true),
            purger: None,
        })
    }

    /// Single-process state with in-memory stores
    pub fn in_memory(config: AppConfig) -> anyhow::Result<Self> {
        let kv = MemoryKvStore::new();
        let mut state = Self::new(
            config,
            Arc::new(kv.clone()),
            Arc::new(MemoryIdentityStore::new()),
        )?;
        state.purger = Some(StorePurger::Memory(kv));
        Ok(state)
    }

    /// Build state for the configured revocation backend
    ///
    /// The postgres backend shares one pool between revocation entries and
    /// user accounts and creates both schemas on startup.
    pub async fn from_config(config: AppConfig) -> anyhow::Result<Self> {
        match config.revocation.backend {
            RevocationBackend::Memory => {
                warn!("Using in-memory stores; revocations are not shared across instances");
                Self::in_memory(config)
            }
            RevocationBackend::Postgres => {
                let kv = PgKvStore::connect(
                    &config.revocation.postgres_url,
                    config.revocation.pool_size,
                )
                .await?;
                kv.init_schema().await?;

                let identities = PgIdentityStore::new(kv.pool().clone());
                identities.init_schema().await?;

                info!(pool_size = config.revocation.pool_size, "Connected to PostgreSQL");
                let mut state = Self::new(config, Arc::new(kv.clone()), Arc::new(identities))?;
                state.purger = Some(StorePurger::Postgres(kv));
                Ok(state)
            }
        }
    }

    /// Start periodic cleanup of stale rate-limit windows and expired
    /// revocation entries
    pub fn spawn_maintenance(&self, every: Duration) -> Vec<JoinHandle<()>> {
        let mut handles = vec![self.limiter.clone().spawn_sweeper(every)];

        if let Some(purger) = self.purger.clone() {
            handles.push(tokio::spawn(async move {
                let mut interval = tokio::time::interval(every);
                interval.tick().await;
                loop {
                    interval.tick().await;
                    match purger.purge().await {
                        Ok(removed) => debug!(removed, "Purged expired store entries"),
                        Err(e) => warn!(error = %e, "Store purge failed"),
                    }
                }
            }));
        }

        handles
    }

    /// Increment request counter
    pub fn increment_requests(&self) -> u64 {
        self.request_count.fetch_add(1, Ordering::SeqCst)
    }

    /// Get total request count
    pub fn get_request_count(&self) -> u64 {
        self.request_count.load(Ordering::SeqCst)
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Check if service is ready
    pub fn is_ready(&self) -> bool {
        self.is_ready.load(Ordering::SeqCst)
    }

    /// Set ready status
    pub fn set_ready(&self, ready: bool) {
        self.is_ready.store(ready, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_state_is_ready() {
        let state = AppState::in_memory(AppConfig::default()).unwrap();
        assert!(state.is_ready());
        assert_eq!(state.revocations.backend(), "memory");
        assert!(state.revocations.healthy().await);

        state.set_ready(false);
        assert!(!state.is_ready());
    }

    #[tokio::test]
    async fn test_request_counter() {
        let state = AppState::in_memory(AppConfig::default()).unwrap();
        assert_eq!(state.increment_requests(), 0);
        assert_eq!(state.increment_requests(), 1);
        assert_eq!(state.get_request_count(), 2);
    }

    #[tokio::test]
    async fn test_maintenance_tasks_spawn() {
        let state = AppState::in_memory(AppConfig::default()).unwrap();
        let handles = state.spawn_maintenance(Duration::from_millis(10));
        assert_eq!(handles.len(), 2);
        for handle in handles {
            handle.abort();
        }
    }
}
