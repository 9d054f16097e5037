//! Authentication and token lifecycle
//!
//! This module provides the token lifecycle with the following components:
//! - Claims encoding and decoding under per-kind signing keys
//! - Token issuance and validation
//! - The revocation store over a key-value backend
//! - Password hashing with Argon2
//! - The identity store
//! - Middleware for request authentication and role checks
//! - The service that orchestrates login, registration, refresh and logout

pub mod claims;
pub mod middleware;
pub mod password;
pub mod repository;
pub mod revocation;
pub mod service;
pub mod tokens;

pub use claims::{ClaimsCodec, CodecError, SigningKey, TokenClaims};
pub use middleware::{auth_middleware, bearer_token, require_role, AuthenticatedUser};
pub use password::{validate_password_strength, PasswordError, PasswordHasher};
pub use repository::{
    IdentityStore, IdentityStoreError, MemoryIdentityStore, NewUser, PgIdentityStore, UserRecord,
};
pub use revocation::{
    revocation_key, token_fingerprint, RevocationError, RevocationStore, RevokeOutcome,
};
pub use service::{
    AuthResponse, AuthService, LoginRequest, LogoutRequest, RefreshRequest, RegisterRequest,
    UserInfo,
};
pub use tokens::{TokenError, TokenPair, TokenService};
