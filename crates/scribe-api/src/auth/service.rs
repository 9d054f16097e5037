//! Authentication service layer
//!
//! Login, registration, refresh-token rotation and logout over the token
//! service, the revocation store and the identity store.
//!
//! A token pair moves through `issued -> in use -> rotated or revoked`.
//! Refresh tokens are single-use: redeeming one revokes it, and the
//! revocation is written atomically so two concurrent redemptions of the
//! same token cannot both succeed.

use super::password::{validate_password_strength, PasswordHasher};
use super::repository::{IdentityStore, IdentityStoreError, NewUser, UserRecord};
use super::revocation::{token_fingerprint, RevocationStore, RevokeOutcome};
use super::tokens::{TokenError, TokenPair, TokenService};
use crate::audit::{audit_log, AuditEvent, RequestContext};
use crate::error::AuthError;
use crate::metrics;
use crate::middleware::rate_limit::{Operation, RateLimiter};
use chrono::{DateTime, Utc};
use scribe_core::{TokenKind, UserRole};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

/// User registration request
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct RegisterRequest {
    #[validate(length(min = 3, max = 50, message = "Username must be 3-50 characters"))]
    pub username: String,
    #[validate(email(message = "Invalid email format"))]
    pub email: String,
    pub password: String,
    #[validate(length(max = 100, message = "Display name must be at most 100 characters"))]
    pub display_name: Option<String>,
}

/// User login request
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LoginRequest {
    /// Username or email
    pub username_or_email: String,
    pub password: String,
}

/// Token refresh request
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// Logout request
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LogoutRequest {
    pub refresh_token: String,
}

/// Authentication response with tokens
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AuthResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: u64,
    pub user: UserInfo,
}

impl AuthResponse {
    fn new(pair: TokenPair, user: UserInfo) -> Self {
        Self {
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
            token_type: "Bearer".to_string(),
            expires_in: pair.expires_in,
            user,
        }
    }
}

/// User information response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserInfo {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub display_name: Option<String>,
    pub role: String,
    pub email_verified: bool,
    pub created_at: DateTime<Utc>,
}

impl From<&UserRecord> for UserInfo {
    fn from(user: &UserRecord) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            email: user.email.clone(),
            display_name: user.display_name.clone(),
            role: user.role.to_string(),
            email_verified: user.email_verified,
            created_at: user.created_at,
        }
    }
}

impl From<IdentityStoreError> for AuthError {
    fn from(err: IdentityStoreError) -> Self {
        match err {
            IdentityStoreError::DuplicateUsername => AuthError::DuplicateUsername,
            IdentityStoreError::DuplicateEmail => AuthError::DuplicateEmail,
            IdentityStoreError::Unavailable(msg) => AuthError::Internal(msg),
        }
    }
}

impl From<TokenError> for AuthError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::InvalidToken => AuthError::InvalidToken,
            TokenError::Issue(e) => AuthError::Internal(e.to_string()),
        }
    }
}

/// Authentication service
pub struct AuthService {
    identities: Arc<dyn IdentityStore>,
    tokens: Arc<TokenService>,
    revocations: Arc<RevocationStore>,
    limiter: Arc<RateLimiter>,
    passwords: PasswordHasher,
}

impl AuthService {
    pub fn new(
        identities: Arc<dyn IdentityStore>,
        tokens: Arc<TokenService>,
        revocations: Arc<RevocationStore>,
        limiter: Arc<RateLimiter>,
        passwords: PasswordHasher,
    ) -> Self {
        Self {
            identities,
            tokens,
            revocations,
            limiter,
            passwords,
        }
    }

    /// Register a new account with role `user` and issue a token pair
    ///
    /// # Returns
    ///
    /// * `Ok(AuthResponse)` - Tokens for the new account
    /// * `Err(AuthError)` - Validation failure, weak password, or duplicate username/email
    pub async fn register(
        &self,
        request: RegisterRequest,
        context: &RequestContext,
    ) -> Result<AuthResponse, AuthError> {
        let result = self.register_inner(&request).await;
        match &result {
            Ok(response) => audit_log(&AuditEvent::RegistrationSuccess {
                user_id: response.user.id,
                username: response.user.username.clone(),
                role: response.user.role.clone(),
                context: context.clone(),
            }),
            Err(e) => audit_log(&AuditEvent::RegistrationFailure {
                username: request.username.clone(),
                reason: e.to_string(),
                context: context.clone(),
            }),
        }
        result
    }

    async fn register_inner(&self, request: &RegisterRequest) -> Result<AuthResponse, AuthError> {
        request
            .validate()
            .map_err(|e| AuthError::Validation(e.to_string()))?;
        validate_password_strength(&request.password).map_err(AuthError::WeakPassword)?;

        let username = request.username.trim().to_string();
        let email = request.email.trim().to_lowercase();

        if self.identities.find_by_username(&username).await?.is_some() {
            return Err(AuthError::DuplicateUsername);
        }
        if self.identities.find_by_email(&email).await?.is_some() {
            return Err(AuthError::DuplicateEmail);
        }

        let password_hash = self
            .passwords
            .hash(&request.password)
            .map_err(|e| AuthError::Internal(e.to_string()))?;

        // create() re-checks uniqueness atomically for concurrent registrations
        let user = self
            .identities
            .create(NewUser {
                username,
                email,
                password_hash,
                display_name: request.display_name.clone(),
                role: UserRole::User,
            })
            .await?;

        info!(user_id = %user.id, username = %user.username, "User registered");
        let pair = self.tokens.issue_pair(&user.identity())?;
        Ok(AuthResponse::new(pair, UserInfo::from(&user)))
    }

    /// Authenticate by username or email and issue a fresh token pair
    ///
    /// Attempts are rate limited per identifier, case-folded so that case
    /// variants of one email share a window. Unknown account, wrong password
    /// and inactive account all fail the same way.
    pub async fn login(
        &self,
        request: LoginRequest,
        context: &RequestContext,
    ) -> Result<AuthResponse, AuthError> {
        let identifier = request.username_or_email.trim();
        let limit_key = identifier.to_lowercase();

        if !self.limiter.allow(Operation::AuthAttempt, &limit_key) {
            audit_log(&AuditEvent::RateLimitExceeded {
                operation: Operation::AuthAttempt.to_string(),
                actor: limit_key,
                context: context.clone(),
            });
            return Err(AuthError::RateLimited(Operation::AuthAttempt));
        }

        let fail = |reason: &str| {
            audit_log(&AuditEvent::LoginFailure {
                identifier: identifier.to_string(),
                reason: reason.to_string(),
                context: context.clone(),
            });
            AuthError::InvalidCredentials
        };

        let Some(user) = self.identities.find_by_username_or_email(identifier).await? else {
            return Err(fail("unknown account"));
        };

        let matches = self
            .passwords
            .verify(&request.password, &user.password_hash)
            .map_err(|e| {
                error!(user_id = %user.id, error = %e, "Stored password hash is unusable");
                AuthError::Internal(e.to_string())
            })?;
        if !matches {
            return Err(fail("invalid password"));
        }
        if !user.is_active {
            return Err(fail("account inactive"));
        }

        let pair = self.tokens.issue_pair(&user.identity())?;
        audit_log(&AuditEvent::LoginSuccess {
            user_id: user.id,
            username: user.username.clone(),
            context: context.clone(),
        });
        Ok(AuthResponse::new(pair, UserInfo::from(&user)))
    }

    /// Exchange a refresh token for a new pair, revoking the old token
    ///
    /// # Returns
    ///
    /// * `Err(AuthError::TokenRevoked)` - Token already redeemed or logged out
    /// * `Err(AuthError::InvalidToken)` - Bad signature, wrong kind, expired, or unknown/inactive user
    /// * `Err(AuthError::StoreUnavailable)` - The old token could not be revoked; no pair is issued
    pub async fn refresh(
        &self,
        refresh_token: &str,
        context: &RequestContext,
    ) -> Result<AuthResponse, AuthError> {
        if self.revocations.is_revoked(refresh_token).await {
            self.replay_detected(refresh_token, context);
            return Err(AuthError::TokenRevoked);
        }

        let claims = self
            .tokens
            .validate_kind(refresh_token, TokenKind::Refresh)
            .map_err(|e| self.invalid_token(e, context))?;

        let user_id = Uuid::parse_str(&claims.sub).map_err(|_| AuthError::InvalidToken)?;
        let Some(user) = self.identities.find_active_by_id(user_id).await? else {
            debug!(user_id = %user_id, "Refresh for unknown or inactive account");
            return Err(AuthError::InvalidToken);
        };

        let expires_at = claims.expires_at().ok_or(AuthError::InvalidToken)?;
        match self.revocations.revoke(refresh_token, expires_at).await {
            Ok(RevokeOutcome::Revoked) => {}
            // lost a race with a concurrent redemption of the same token
            Ok(RevokeOutcome::AlreadyRevoked) => {
                self.replay_detected(refresh_token, context);
                return Err(AuthError::TokenRevoked);
            }
            Ok(RevokeOutcome::AlreadyExpired) => return Err(AuthError::InvalidToken),
            Err(e) => {
                error!(error = %e, "Could not revoke redeemed refresh token");
                return Err(AuthError::StoreUnavailable);
            }
        }

        let pair = self.tokens.issue_pair(&user.identity())?;
        metrics::TOKEN_ROTATIONS.inc();
        audit_log(&AuditEvent::TokenRefresh {
            user_id: user.id,
            username: user.username.clone(),
            context: context.clone(),
        });
        Ok(AuthResponse::new(pair, UserInfo::from(&user)))
    }

    /// Revoke a refresh token and, when given, the caller's access token
    ///
    /// Idempotent: logging out with an already-revoked token succeeds.
    pub async fn logout(
        &self,
        refresh_token: &str,
        access_token: Option<&str>,
        context: &RequestContext,
    ) -> Result<(), AuthError> {
        let claims = self
            .tokens
            .validate_kind(refresh_token, TokenKind::Refresh)
            .map_err(|e| self.invalid_token(e, context))?;

        self.revoke_for_logout(refresh_token, claims.expires_at())
            .await?;

        let mut access_token_revoked = false;
        if let Some(access_token) = access_token {
            match self.tokens.validate_kind(access_token, TokenKind::Access) {
                Ok(access) => {
                    self.revoke_for_logout(access_token, access.expires_at())
                        .await?;
                    access_token_revoked = true;
                }
                Err(_) => debug!("Access token not revocable at logout; skipping"),
            }
        }

        let user_id = Uuid::parse_str(&claims.sub).unwrap_or_else(|_| Uuid::nil());
        audit_log(&AuditEvent::Logout {
            user_id,
            username: claims.username,
            access_token_revoked,
            context: context.clone(),
        });
        Ok(())
    }

    async fn revoke_for_logout(
        &self,
        token: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<(), AuthError> {
        let expires_at = expires_at.ok_or(AuthError::InvalidToken)?;
        match self.revocations.revoke(token, expires_at).await {
            Ok(outcome) => {
                debug!(?outcome, token = %token_fingerprint(token), "Logout revocation");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Could not revoke token at logout");
                Err(AuthError::StoreUnavailable)
            }
        }
    }

    fn replay_detected(&self, token: &str, context: &RequestContext) {
        warn!(token = %token_fingerprint(token), "Revoked refresh token presented");
        audit_log(&AuditEvent::RefreshTokenReplay {
            token_fingerprint: token_fingerprint(token),
            context: context.clone(),
        });
    }

    fn invalid_token(&self, err: TokenError, context: &RequestContext) -> AuthError {
        audit_log(&AuditEvent::InvalidToken {
            reason: err.to_string(),
            context: context.clone(),
        });
        err.into()
    }
}
