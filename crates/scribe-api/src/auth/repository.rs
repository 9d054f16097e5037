//! Identity store
//!
//! Account lookups and creation used by the auth service. Two backends:
//! - [`MemoryIdentityStore`] for development and tests
//! - [`PgIdentityStore`] backed by the `users` table

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scribe_core::{Identity, UserRole};
use sqlx::PgPool;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Identity store errors
#[derive(Debug, Error)]
pub enum IdentityStoreError {
    #[error("Username already exists")]
    DuplicateUsername,

    #[error("Email already exists")]
    DuplicateEmail,

    #[error("Identity store unavailable: {0}")]
    Unavailable(String),
}

/// Stored account
#[derive(Debug, Clone)]
pub struct UserRecord {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub display_name: Option<String>,
    pub role: UserRole,
    pub is_active: bool,
    pub email_verified: bool,
    pub created_at: DateTime<Utc>,
}

impl UserRecord {
    /// The identity embedded in tokens
    pub fn identity(&self) -> Identity {
        Identity {
            id: self.id,
            username: self.username.clone(),
            email: self.email.clone(),
            role: self.role,
        }
    }
}

/// Account to be created
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub display_name: Option<String>,
    pub role: UserRole,
}

/// Account lookups needed by authentication
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Match `identifier` against username first, then email
    async fn find_by_username_or_email(
        &self,
        identifier: &str,
    ) -> Result<Option<UserRecord>, IdentityStoreError>;

    async fn find_by_username(&self, username: &str)
        -> Result<Option<UserRecord>, IdentityStoreError>;

    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>, IdentityStoreError>;

    /// Active accounts only
    async fn find_active_by_id(&self, id: Uuid) -> Result<Option<UserRecord>, IdentityStoreError>;

    /// Create an account; uniqueness of username and email is enforced atomically
    async fn create(&self, user: NewUser) -> Result<UserRecord, IdentityStoreError>;

    async fn set_active(&self, id: Uuid, active: bool) -> Result<bool, IdentityStoreError>;
}

// ============================================================================
// In-memory
// ============================================================================

#[derive(Debug, Default)]
pub struct MemoryIdentityStore {
    users: RwLock<HashMap<Uuid, UserRecord>>,
}

impl MemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdentityStore for MemoryIdentityStore {
    async fn find_by_username_or_email(
        &self,
        identifier: &str,
    ) -> Result<Option<UserRecord>, IdentityStoreError> {
        if let Some(user) = self.find_by_username(identifier).await? {
            return Ok(Some(user));
        }
        self.find_by_email(identifier).await
    }

    async fn find_by_username(
        &self,
        username: &str,
    ) -> Result<Option<UserRecord>, IdentityStoreError> {
        let users = self.users.read().await;
        Ok(users.values().find(|u| u.username == username).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>, IdentityStoreError> {
        let users = self.users.read().await;
        Ok(users
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn find_active_by_id(&self, id: Uuid) -> Result<Option<UserRecord>, IdentityStoreError> {
        let users = self.users.read().await;
        Ok(users.get(&id).filter(|u| u.is_active).cloned())
    }

    async fn create(&self, user: NewUser) -> Result<UserRecord, IdentityStoreError> {
        let mut users = self.users.write().await;
        if users.values().any(|u| u.username == user.username) {
            return Err(IdentityStoreError::DuplicateUsername);
        }
        if users
            .values()
            .any(|u| u.email.eq_ignore_ascii_case(&user.email))
        {
            return Err(IdentityStoreError::DuplicateEmail);
        }

        let record = UserRecord {
            id: Uuid::new_v4(),
            username: user.username,
            email: user.email,
            password_hash: user.password_hash,
            display_name: user.display_name,
            role: user.role,
            is_active: true,
            email_verified: false,
            created_at: Utc::now(),
        };
        users.insert(record.id, record.clone());
        Ok(record)
    }

    async fn set_active(&self, id: Uuid, active: bool) -> Result<bool, IdentityStoreError> {
        let mut users = self.users.write().await;
        Ok(match users.get_mut(&id) {
            Some(user) => {
                user.is_active = active;
                true
            }
            None => false,
        })
    }
}

// ============================================================================
// PostgreSQL
// ============================================================================

const USER_COLUMNS: &str =
    "id, username, email, password_hash, display_name, role, is_active, email_verified, created_at";

#[derive(Debug, Clone, sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    username: String,
    email: String,
    password_hash: String,
    display_name: Option<String>,
    role: String,
    is_active: bool,
    email_verified: bool,
    created_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for UserRecord {
    type Error = IdentityStoreError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        let role = row
            .role
            .parse()
            .map_err(|e: scribe_core::ScribeError| IdentityStoreError::Unavailable(e.to_string()))?;
        Ok(Self {
            id: row.id,
            username: row.username,
            email: row.email,
            password_hash: row.password_hash,
            display_name: row.display_name,
            role,
            is_active: row.is_active,
            email_verified: row.email_verified,
            created_at: row.created_at,
        })
    }
}

/// `users` table store
#[derive(Clone)]
pub struct PgIdentityStore {
    pool: PgPool,
}

impl PgIdentityStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Initialize schema (run once on setup)
    pub async fn init_schema(&self) -> Result<(), IdentityStoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id UUID PRIMARY KEY,
                username TEXT NOT NULL CONSTRAINT users_username_key UNIQUE,
                email TEXT NOT NULL CONSTRAINT users_email_key UNIQUE,
                password_hash TEXT NOT NULL,
                display_name TEXT NULL,
                role TEXT NOT NULL DEFAULT 'user',
                is_active BOOLEAN NOT NULL DEFAULT TRUE,
                email_verified BOOLEAN NOT NULL DEFAULT FALSE,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn fetch_one_where(
        &self,
        condition: &str,
        value: &str,
    ) -> Result<Option<UserRecord>, IdentityStoreError> {
        sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE {condition}"
        ))
        .bind(value)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?
        .map(UserRecord::try_from)
        .transpose()
    }
}

fn db_error(err: sqlx::Error) -> IdentityStoreError {
    IdentityStoreError::Unavailable(err.to_string())
}

#[async_trait]
impl IdentityStore for PgIdentityStore {
    async fn find_by_username_or_email(
        &self,
        identifier: &str,
    ) -> Result<Option<UserRecord>, IdentityStoreError> {
        if let Some(user) = self.find_by_username(identifier).await? {
            return Ok(Some(user));
        }
        self.find_by_email(identifier).await
    }

    async fn find_by_username(
        &self,
        username: &str,
    ) -> Result<Option<UserRecord>, IdentityStoreError> {
        self.fetch_one_where("username = $1", username).await
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>, IdentityStoreError> {
        self.fetch_one_where("lower(email) = lower($1)", email).await
    }

    async fn find_active_by_id(&self, id: Uuid) -> Result<Option<UserRecord>, IdentityStoreError> {
        sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1 AND is_active"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?
        .map(UserRecord::try_from)
        .transpose()
    }

    async fn create(&self, user: NewUser) -> Result<UserRecord, IdentityStoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            INSERT INTO users (id, username, email, password_hash, display_name, role, is_active, email_verified, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, TRUE, FALSE, NOW())
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.display_name)
        .bind(user.role.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            let constraint = match &e {
                sqlx::Error::Database(db) => db.constraint().map(str::to_owned),
                _ => None,
            };
            match constraint.as_deref() {
                Some("users_username_key") => IdentityStoreError::DuplicateUsername,
                Some("users_email_key") => IdentityStoreError::DuplicateEmail,
                _ => db_error(e),
            }
        })?;
        UserRecord::try_from(row)
    }

    async fn set_active(&self, id: Uuid, active: bool) -> Result<bool, IdentityStoreError> {
        let result = sqlx::query("UPDATE users SET is_active = $2 WHERE id = $1")
            .bind(id)
            .bind(active)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(result.rows_affected() > 0)
    }
}
