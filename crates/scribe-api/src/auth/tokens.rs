//! Token issuance and validation
//!
//! Tokens are decoded against an ordered list of `(kind, key)` pairs:
//! access first, then refresh. The first decode that verifies and whose
//! kind tag matches the key wins. Every other outcome collapses to
//! [`TokenError::InvalidToken`]; the underlying reason is only logged.

use super::claims::{ClaimsCodec, CodecError, SigningKey, TokenClaims};
use crate::metrics;
use chrono::{DateTime, Utc};
use scribe_core::{AuthConfig, Identity, TokenKind, UserRole};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use utoipa::ToSchema;
use uuid::Uuid;

/// Token service errors
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("Invalid token")]
    InvalidToken,

    #[error("Failed to issue token: {0}")]
    Issue(#[from] CodecError),
}

/// Freshly issued access + refresh pair
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    /// Access token lifetime in seconds
    pub expires_in: u64,
}

/// Issues and validates access and refresh tokens
#[derive(Debug)]
pub struct TokenService {
    codec: ClaimsCodec,
    issuer: String,
    /// Decode order: access, then refresh
    keys: [SigningKey; 2],
    access_ttl_secs: u64,
    refresh_ttl_secs: u64,
}

impl TokenService {
    pub fn new(config: &AuthConfig) -> Self {
        if config.access_secret == config.refresh_secret {
            warn!("Access and refresh signing secrets are identical; kind tags are the only separation");
        }
        Self {
            codec: ClaimsCodec::new(&config.issuer),
            issuer: config.issuer.clone(),
            keys: [
                SigningKey::new(TokenKind::Access, config.access_secret.as_bytes()),
                SigningKey::new(TokenKind::Refresh, config.refresh_secret.as_bytes()),
            ],
            access_ttl_secs: config.access_ttl_secs,
            refresh_ttl_secs: config.refresh_ttl_secs,
        }
    }

    pub fn access_ttl_secs(&self) -> u64 {
        self.access_ttl_secs
    }

    pub fn refresh_ttl_secs(&self) -> u64 {
        self.refresh_ttl_secs
    }

    pub fn issue_access_token(&self, identity: &Identity) -> Result<String, TokenError> {
        self.issue_at(identity, TokenKind::Access, Utc::now())
    }

    pub fn issue_refresh_token(&self, identity: &Identity) -> Result<String, TokenError> {
        self.issue_at(identity, TokenKind::Refresh, Utc::now())
    }

    pub fn issue_pair(&self, identity: &Identity) -> Result<TokenPair, TokenError> {
        Ok(TokenPair {
            access_token: self.issue_access_token(identity)?,
            refresh_token: self.issue_refresh_token(identity)?,
            expires_in: self.access_ttl_secs,
        })
    }

    /// Issue a token as if the clock read `now`
    pub fn issue_at(
        &self,
        identity: &Identity,
        kind: TokenKind,
        now: DateTime<Utc>,
    ) -> Result<String, TokenError> {
        let ttl = match kind {
            TokenKind::Access => self.access_ttl_secs,
            TokenKind::Refresh => self.refresh_ttl_secs,
        };
        let ttl = i64::try_from(ttl).unwrap_or(i64::MAX);
        let claims = TokenClaims::new(identity, kind, &self.issuer, now, ttl);
        let token = self.codec.encode(&claims, self.key(kind))?;
        metrics::record_issued(kind);
        Ok(token)
    }

    /// Decode with whichever key matches the token's kind, without checking expiry
    pub fn decode(&self, token: &str) -> Result<TokenClaims, TokenError> {
        for key in &self.keys {
            match self.codec.decode(token, key) {
                Ok(claims) if claims.kind == key.kind() => return Ok(claims),
                Ok(claims) => debug!(
                    key = %key.kind(),
                    tagged = %claims.kind,
                    "Token kind does not match verifying key"
                ),
                Err(e) => debug!(key = %key.kind(), error = %e, "Token rejected by key"),
            }
        }
        Err(TokenError::InvalidToken)
    }

    /// True iff the token verifies under the key for its kind and has not expired
    pub fn validate(&self, token: &str) -> bool {
        self.validate_at(token, Utc::now())
    }

    pub fn validate_at(&self, token: &str, now: DateTime<Utc>) -> bool {
        self.decode(token)
            .map(|claims| !claims.is_expired_at(now))
            .unwrap_or(false)
    }

    /// Decode, require `kind` and reject expired tokens
    pub fn validate_kind(&self, token: &str, kind: TokenKind) -> Result<TokenClaims, TokenError> {
        self.validate_kind_at(token, kind, Utc::now())
    }

    pub fn validate_kind_at(
        &self,
        token: &str,
        kind: TokenKind,
        now: DateTime<Utc>,
    ) -> Result<TokenClaims, TokenError> {
        let claims = self.decode(token)?;
        if claims.kind != kind {
            debug!(expected = %kind, found = %claims.kind, "Token presented as the wrong kind");
            return Err(TokenError::InvalidToken);
        }
        if let Err(e) = ClaimsCodec::check_expiry(&claims, now) {
            debug!(error = %e, "Token rejected");
            return Err(TokenError::InvalidToken);
        }
        Ok(claims)
    }

    pub fn extract_subject(&self, token: &str) -> Result<Uuid, TokenError> {
        let claims = self.decode(token)?;
        Uuid::parse_str(&claims.sub).map_err(|_| TokenError::InvalidToken)
    }

    pub fn extract_username(&self, token: &str) -> Result<String, TokenError> {
        Ok(self.decode(token)?.username)
    }

    pub fn extract_role(&self, token: &str) -> Result<UserRole, TokenError> {
        Ok(self.decode(token)?.role)
    }

    pub fn extract_kind(&self, token: &str) -> Result<TokenKind, TokenError> {
        Ok(self.decode(token)?.kind)
    }

    /// Expired, or not decodable at all
    pub fn is_expired(&self, token: &str) -> bool {
        self.decode(token)
            .map(|claims| claims.is_expired_at(Utc::now()))
            .unwrap_or(true)
    }

    pub fn expiry_of(&self, token: &str) -> Option<DateTime<Utc>> {
        self.decode(token).ok().and_then(|claims| claims.expires_at())
    }

    fn key(&self, kind: TokenKind) -> &SigningKey {
        match kind {
            TokenKind::Access => &self.keys[0],
            TokenKind::Refresh => &self.keys[1],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use proptest::prelude::*;

    fn config() -> AuthConfig {
        AuthConfig {
            access_secret: "access-secret-for-tests".to_string(),
            refresh_secret: "refresh-secret-for-tests".to_string(),
            access_ttl_secs: 60,
            refresh_ttl_secs: 600,
            ..AuthConfig::default()
        }
    }

    fn identity() -> Identity {
        Identity::new("bob", "bob@example.com", UserRole::User)
    }

    #[test]
    fn test_issue_and_validate_pair() {
        let service = TokenService::new(&config());
        let id = identity();
        let pair = service.issue_pair(&id).unwrap();

        assert!(service.validate(&pair.access_token));
        assert!(service.validate(&pair.refresh_token));
        assert_ne!(pair.access_token, pair.refresh_token);
        assert_eq!(pair.expires_in, 60);

        assert_eq!(service.extract_subject(&pair.access_token).unwrap(), id.id);
        assert_eq!(service.extract_username(&pair.refresh_token).unwrap(), "bob");
        assert_eq!(service.extract_role(&pair.access_token).unwrap(), UserRole::User);
        assert_eq!(
            service.extract_kind(&pair.refresh_token).unwrap(),
            TokenKind::Refresh
        );
    }

    #[test]
    fn test_validity_ends_after_ttl() {
        let service = TokenService::new(&config());
        let issued = Utc::now();
        let token = service
            .issue_at(&identity(), TokenKind::Access, issued)
            .unwrap();

        assert!(service.validate_at(&token, issued));
        assert!(service.validate_at(&token, issued + Duration::seconds(60)));
        assert!(!service.validate_at(&token, issued + Duration::seconds(61)));
    }

    #[test]
    fn test_validate_kind() {
        let service = TokenService::new(&config());
        let pair = service.issue_pair(&identity()).unwrap();

        assert!(service
            .validate_kind(&pair.refresh_token, TokenKind::Refresh)
            .is_ok());
        assert!(matches!(
            service.validate_kind(&pair.access_token, TokenKind::Refresh),
            Err(TokenError::InvalidToken)
        ));
        assert!(matches!(
            service.validate_kind(&pair.refresh_token, TokenKind::Access),
            Err(TokenError::InvalidToken)
        ));
    }

    #[test]
    fn test_expired_token_queries() {
        let service = TokenService::new(&config());
        let issued = Utc::now() - Duration::hours(1);
        let token = service
            .issue_at(&identity(), TokenKind::Access, issued)
            .unwrap();

        assert!(!service.validate(&token));
        assert!(service.is_expired(&token));
        // inspection still works once expired
        let expiry = service.expiry_of(&token).unwrap();
        assert_eq!(expiry.timestamp(), issued.timestamp() + 60);
        assert!(matches!(
            service.validate_kind(&token, TokenKind::Access),
            Err(TokenError::InvalidToken)
        ));
    }

    #[test]
    fn test_garbage_token() {
        let service = TokenService::new(&config());
        assert!(!service.validate("not-a-token"));
        assert!(service.is_expired("not-a-token"));
        assert!(service.expiry_of("not-a-token").is_none());
        assert!(matches!(
            service.extract_subject("not-a-token"),
            Err(TokenError::InvalidToken)
        ));
    }

    #[test]
    fn test_foreign_secret_rejected() {
        let service = TokenService::new(&config());
        let other = TokenService::new(&AuthConfig {
            access_secret: "someone-else".to_string(),
            refresh_secret: "someone-else-refresh".to_string(),
            ..config()
        });
        let token = other.issue_access_token(&identity()).unwrap();

        assert!(!service.validate(&token));
    }

    #[test]
    fn test_identical_secrets_keep_kinds_apart() {
        let shared = AuthConfig {
            refresh_secret: "access-secret-for-tests".to_string(),
            ..config()
        };
        let service = TokenService::new(&shared);
        let pair = service.issue_pair(&identity()).unwrap();

        assert!(service
            .validate_kind(&pair.access_token, TokenKind::Refresh)
            .is_err());
        assert!(service
            .validate_kind(&pair.refresh_token, TokenKind::Access)
            .is_err());
    }

    fn role_strategy() -> impl Strategy<Value = UserRole> {
        prop_oneof![
            Just(UserRole::User),
            Just(UserRole::Moderator),
            Just(UserRole::Admin),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_no_cross_kind_acceptance(
            username in "[a-z][a-z0-9_]{2,20}",
            domain in "[a-z]{3,10}",
            role in role_strategy(),
            shared_secret in any::<bool>(),
        ) {
            let mut cfg = config();
            if shared_secret {
                cfg.refresh_secret = cfg.access_secret.clone();
            }
            let service = TokenService::new(&cfg);
            let id = Identity::new(username.clone(), format!("{username}@{domain}.com"), role);
            let pair = service.issue_pair(&id).unwrap();

            prop_assert!(service.validate_kind(&pair.access_token, TokenKind::Access).is_ok());
            prop_assert!(service.validate_kind(&pair.refresh_token, TokenKind::Refresh).is_ok());
            prop_assert!(service.validate_kind(&pair.access_token, TokenKind::Refresh).is_err());
            prop_assert!(service.validate_kind(&pair.refresh_token, TokenKind::Access).is_err());
            prop_assert_eq!(service.extract_role(&pair.refresh_token).unwrap(), role);
        }
    }
}
