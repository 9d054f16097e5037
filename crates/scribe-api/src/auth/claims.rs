//! Signed token payloads
//!
//! Encodes and decodes claims with HMAC-SHA256. Each [`SigningKey`] is bound
//! to one [`TokenKind`]; access and refresh tokens are signed with distinct
//! secrets.
//!
//! Decoding verifies the signature and issuer before any claim is trusted.
//! Expiry is deliberately left to the caller so tokens can be inspected
//! after they lapse.

use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use scribe_core::{Identity, TokenKind, UserRole};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Claims embedded in every token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Token issuer
    pub iss: String,
    /// Subject - user ID
    pub sub: String,
    /// Per-issuance nonce; two tokens for the same user in the same second never collide
    pub jti: String,
    /// Issued at (Unix seconds)
    pub iat: i64,
    /// Expiration (Unix seconds)
    pub exp: i64,
    pub username: String,
    /// Only carried by access tokens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub role: UserRole,
    #[serde(rename = "type")]
    pub kind: TokenKind,
}

impl TokenClaims {
    /// Build claims for `identity`, valid for `ttl_secs` from `now`
    pub fn new(
        identity: &Identity,
        kind: TokenKind,
        issuer: &str,
        now: DateTime<Utc>,
        ttl_secs: i64,
    ) -> Self {
        let iat = now.timestamp();
        Self {
            iss: issuer.to_string(),
            sub: identity.id.to_string(),
            jti: Uuid::new_v4().to_string(),
            iat,
            exp: iat.saturating_add(ttl_secs),
            username: identity.username.clone(),
            email: match kind {
                TokenKind::Access => Some(identity.email.clone()),
                TokenKind::Refresh => None,
            },
            role: identity.role,
            kind,
        }
    }

    /// Expired once `now` is strictly past `exp`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.exp < now.timestamp()
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.exp, 0).single()
    }

    pub fn issued_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.iat, 0).single()
    }
}

/// Claims codec errors
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Invalid token signature")]
    InvalidSignature,

    #[error("Malformed token: {0}")]
    Malformed(String),

    #[error("Token has expired")]
    Expired,

    #[error("Failed to encode token: {0}")]
    Encoding(String),
}

/// Secret bound to a single token kind
#[derive(Clone)]
pub struct SigningKey {
    kind: TokenKind,
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl SigningKey {
    pub fn new(kind: TokenKind, secret: &[u8]) -> Self {
        Self {
            kind,
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
        }
    }

    pub fn kind(&self) -> TokenKind {
        self.kind
    }
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKey")
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// HS256 encoder/decoder for [`TokenClaims`]
#[derive(Debug, Clone)]
pub struct ClaimsCodec {
    validation: Validation,
}

impl ClaimsCodec {
    pub fn new(issuer: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[issuer]);
        validation.set_required_spec_claims(&["exp", "iat", "iss", "sub"]);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.leeway = 0;
        Self { validation }
    }

    /// Sign `claims` with `key`
    ///
    /// # Returns
    ///
    /// * `Ok(String)` - Compact JWS token
    /// * `Err(CodecError)` - If the claims are inconsistent or signing fails
    pub fn encode(&self, claims: &TokenClaims, key: &SigningKey) -> Result<String, CodecError> {
        if claims.exp <= claims.iat {
            return Err(CodecError::Encoding(
                "expiry must be after issuance".to_string(),
            ));
        }
        encode(&Header::new(Algorithm::HS256), claims, &key.encoding)
            .map_err(|e| CodecError::Encoding(e.to_string()))
    }

    /// Verify and decode `token` with `key`
    ///
    /// Does not check expiry and does not compare the kind tag against the
    /// key; both are the caller's decision.
    pub fn decode(&self, token: &str, key: &SigningKey) -> Result<TokenClaims, CodecError> {
        let data = decode::<TokenClaims>(token, &key.decoding, &self.validation).map_err(|e| {
            match e.kind() {
                ErrorKind::InvalidSignature => CodecError::InvalidSignature,
                ErrorKind::ExpiredSignature => CodecError::Expired,
                _ => CodecError::Malformed(e.to_string()),
            }
        })?;

        if data.claims.exp <= data.claims.iat {
            return Err(CodecError::Malformed(
                "expiry is not after issuance".to_string(),
            ));
        }
        Ok(data.claims)
    }

    /// Reject claims that are past their expiry at `now`
    pub fn check_expiry(claims: &TokenClaims, now: DateTime<Utc>) -> Result<(), CodecError> {
        if claims.is_expired_at(now) {
            Err(CodecError::Expired)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn identity() -> Identity {
        Identity::new("alice", "alice@example.com", UserRole::Moderator)
    }

    #[test]
    fn test_encode_decode() {
        let codec = ClaimsCodec::new("scribe");
        let key = SigningKey::new(TokenKind::Access, b"access-secret");
        let claims = TokenClaims::new(&identity(), TokenKind::Access, "scribe", Utc::now(), 60);

        let token = codec.encode(&claims, &key).unwrap();
        let decoded = codec.decode(&token, &key).unwrap();

        assert_eq!(decoded, claims);
        assert_eq!(decoded.email.as_deref(), Some("alice@example.com"));
        assert_eq!(decoded.role, UserRole::Moderator);
    }

    #[test]
    fn test_refresh_claims_omit_email() {
        let claims = TokenClaims::new(&identity(), TokenKind::Refresh, "scribe", Utc::now(), 60);
        assert!(claims.email.is_none());

        let json = serde_json::to_value(&claims).unwrap();
        assert_eq!(json["type"], "refresh");
        assert!(json.get("email").is_none());
    }

    #[test]
    fn test_nonce_differs_within_same_instant() {
        let codec = ClaimsCodec::new("scribe");
        let key = SigningKey::new(TokenKind::Access, b"access-secret");
        let now = Utc::now();
        let id = identity();

        let a = codec
            .encode(&TokenClaims::new(&id, TokenKind::Access, "scribe", now, 60), &key)
            .unwrap();
        let b = codec
            .encode(&TokenClaims::new(&id, TokenKind::Access, "scribe", now, 60), &key)
            .unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_wrong_key_is_invalid_signature() {
        let codec = ClaimsCodec::new("scribe");
        let access = SigningKey::new(TokenKind::Access, b"secret-one");
        let refresh = SigningKey::new(TokenKind::Refresh, b"secret-two");
        let claims = TokenClaims::new(&identity(), TokenKind::Access, "scribe", Utc::now(), 60);

        let token = codec.encode(&claims, &access).unwrap();
        assert!(matches!(
            codec.decode(&token, &refresh),
            Err(CodecError::InvalidSignature)
        ));
    }

    #[test]
    fn test_garbage_is_malformed() {
        let codec = ClaimsCodec::new("scribe");
        let key = SigningKey::new(TokenKind::Access, b"secret");
        assert!(matches!(
            codec.decode("invalid.token.here", &key),
            Err(CodecError::Malformed(_))
        ));
    }

    #[test]
    fn test_foreign_issuer_rejected() {
        let key = SigningKey::new(TokenKind::Access, b"secret");
        let claims = TokenClaims::new(&identity(), TokenKind::Access, "elsewhere", Utc::now(), 60);
        let token = ClaimsCodec::new("elsewhere").encode(&claims, &key).unwrap();

        assert!(ClaimsCodec::new("scribe").decode(&token, &key).is_err());
    }

    #[test]
    fn test_decode_ignores_expiry() {
        let codec = ClaimsCodec::new("scribe");
        let key = SigningKey::new(TokenKind::Refresh, b"secret");
        let issued = Utc::now() - Duration::hours(2);
        let claims = TokenClaims::new(&identity(), TokenKind::Refresh, "scribe", issued, 60);

        let token = codec.encode(&claims, &key).unwrap();
        let decoded = codec.decode(&token, &key).unwrap();

        assert!(decoded.is_expired_at(Utc::now()));
        assert!(matches!(
            ClaimsCodec::check_expiry(&decoded, Utc::now()),
            Err(CodecError::Expired)
        ));
    }

    #[test]
    fn test_expiry_boundary() {
        let now = Utc::now();
        let claims = TokenClaims::new(&identity(), TokenKind::Access, "scribe", now, 10);

        assert!(!claims.is_expired_at(now + Duration::seconds(10)));
        assert!(claims.is_expired_at(now + Duration::seconds(11)));
    }

    #[test]
    fn test_non_positive_ttl_rejected() {
        let codec = ClaimsCodec::new("scribe");
        let key = SigningKey::new(TokenKind::Access, b"secret");
        let claims = TokenClaims::new(&identity(), TokenKind::Access, "scribe", Utc::now(), 0);

        assert!(matches!(
            codec.encode(&claims, &key),
            Err(CodecError::Encoding(_))
        ));
    }
}
