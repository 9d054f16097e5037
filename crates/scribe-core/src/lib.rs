//! Scribe Core - Domain types, errors and configuration
//!
//! This crate defines the pieces shared by every other scribe crate:
//! - The identity record embedded in tokens
//! - User roles and token kinds
//! - Common error types
//! - Configuration management

pub mod config;

pub use config::{
    AppConfig, AuthConfig, ConfigError, LoggingConfig, RateLimitConfig, RateLimitRule,
    RevocationBackend, RevocationConfig, ServerConfig,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

// ============================================================================
// Error Types
// ============================================================================

/// Core error types for scribe operations
#[derive(Error, Debug)]
pub enum ScribeError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, ScribeError>;

// ============================================================================
// Identity
// ============================================================================

/// User role
///
/// Closed set of roles a token may carry:
/// - User: regular author/reader
/// - Moderator: may moderate content
/// - Admin: full access including the revocation admin surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    User,
    Moderator,
    Admin,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::User => "user",
            UserRole::Moderator => "moderator",
            UserRole::Admin => "admin",
        }
    }
}

impl std::str::FromStr for UserRole {
    type Err = ScribeError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user" => Ok(UserRole::User),
            "moderator" => Ok(UserRole::Moderator),
            "admin" => Ok(UserRole::Admin),
            other => Err(ScribeError::Validation(format!("unknown role: {other}"))),
        }
    }
}

impl std::fmt::Display for UserRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind tag carried inside every token
///
/// A token's kind is fixed at issuance and must match the key that
/// verifies it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::Access => "access",
            TokenKind::Refresh => "refresh",
        }
    }
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity record supplied by the identity store
///
/// This is the only shape token issuance accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub role: UserRole,
}

impl Identity {
    pub fn new(username: impl Into<String>, email: impl Into<String>, role: UserRole) -> Self {
        Self {
            id: Uuid::new_v4(),
            username: username.into(),
            email: email.into(),
            role,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parse_roundtrip() {
        for role in [UserRole::User, UserRole::Moderator, UserRole::Admin] {
            assert_eq!(role.as_str().parse::<UserRole>().unwrap(), role);
        }
        assert_eq!("ADMIN".parse::<UserRole>().unwrap(), UserRole::Admin);
        assert!("superuser".parse::<UserRole>().is_err());
    }

    #[test]
    fn test_token_kind_serde() {
        let json = serde_json::to_string(&TokenKind::Refresh).unwrap();
        assert_eq!(json, "\"refresh\"");
        let kind: TokenKind = serde_json::from_str("\"access\"").unwrap();
        assert_eq!(kind, TokenKind::Access);
    }

    #[test]
    fn test_identity_new_assigns_id() {
        let a = Identity::new("alice", "alice@example.com", UserRole::User);
        let b = Identity::new("alice", "alice@example.com", UserRole::User);
        assert_ne!(a.id, b.id);
        assert!(!a.is_admin());
    }
}
