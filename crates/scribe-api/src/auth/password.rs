//! Password hashing and strength policy
//!
//! Argon2id with costs taken from [`AuthConfig`]. Hashes are PHC strings,
//! so verification reads the parameters back from the stored hash and
//! keeps working after the configured costs change.

use argon2::password_hash::{
    rand_core::OsRng, PasswordHash, PasswordHasher as _, PasswordVerifier as _, SaltString,
};
use argon2::{Algorithm, Argon2, Params, Version};
use scribe_core::AuthConfig;
use thiserror::Error;

/// Password hashing errors
#[derive(Debug, Error)]
pub enum PasswordError {
    #[error("Invalid hashing parameters: {0}")]
    InvalidParams(String),

    #[error("Failed to hash password: {0}")]
    HashingFailed(String),

    #[error("Invalid password hash format")]
    InvalidHashFormat,

    #[error("Failed to verify password: {0}")]
    VerificationFailed(String),
}

/// Argon2id hasher
#[derive(Debug, Clone)]
pub struct PasswordHasher {
    params: Params,
}

impl PasswordHasher {
    /// # Arguments
    ///
    /// * `memory_cost` - Memory in KiB
    /// * `time_cost` - Iterations
    /// * `parallelism` - Lanes
    pub fn new(memory_cost: u32, time_cost: u32, parallelism: u32) -> Result<Self, PasswordError> {
        let params = Params::new(memory_cost, time_cost, parallelism, Some(32))
            .map_err(|e| PasswordError::InvalidParams(e.to_string()))?;
        Ok(Self { params })
    }

    pub fn from_config(config: &AuthConfig) -> Result<Self, PasswordError> {
        Self::new(
            config.password_memory_cost,
            config.password_time_cost,
            config.password_parallelism,
        )
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }

    pub fn hash(&self, password: &str) -> Result<String, PasswordError> {
        let salt = SaltString::generate(&mut OsRng);
        self.argon2()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| PasswordError::HashingFailed(e.to_string()))
    }

    /// `Ok(false)` on mismatch; `Err` only when the stored hash is unusable
    pub fn verify(&self, password: &str, hash: &str) -> Result<bool, PasswordError> {
        let parsed = PasswordHash::new(hash).map_err(|_| PasswordError::InvalidHashFormat)?;
        match self.argon2().verify_password(password.as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(e) => Err(PasswordError::VerificationFailed(e.to_string())),
        }
    }
}

/// Minimum password policy applied at registration
///
/// At least 8 characters with an uppercase letter, a lowercase letter,
/// a digit and a non-alphanumeric character.
pub fn validate_password_strength(password: &str) -> Result<(), String> {
    if password.chars().count() < 8 {
        return Err("Password must be at least 8 characters long".to_string());
    }
    if !password.chars().any(char::is_uppercase) {
        return Err("Password must contain at least one uppercase letter".to_string());
    }
    if !password.chars().any(char::is_lowercase) {
        return Err("Password must contain at least one lowercase letter".to_string());
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        return Err("Password must contain at least one digit".to_string());
    }
    if password.chars().all(char::is_alphanumeric) {
        return Err("Password must contain at least one special character".to_string());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // Light parameters keep the suite fast
    fn hasher() -> PasswordHasher {
        PasswordHasher::new(8 * 1024, 1, 1).unwrap()
    }

    #[test]
    fn test_hash_and_verify() {
        let hasher = hasher();
        let hash = hasher.hash("Correct#Horse1").unwrap();

        assert!(hash.starts_with("$argon2id$"));
        assert!(hash.contains("m=8192,t=1,p=1"));
        assert!(hasher.verify("Correct#Horse1", &hash).unwrap());
        assert!(!hasher.verify("Wrong#Horse1", &hash).unwrap());
    }

    #[test]
    fn test_salted_hashes_differ() {
        let hasher = hasher();
        let a = hasher.hash("Same#Password1").unwrap();
        let b = hasher.hash("Same#Password1").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_verify_reads_params_from_hash() {
        let old = hasher().hash("Rotate#Costs1").unwrap();
        let newer = PasswordHasher::new(16 * 1024, 2, 1).unwrap();
        assert!(newer.verify("Rotate#Costs1", &old).unwrap());
    }

    #[test]
    fn test_invalid_hash_format() {
        assert!(matches!(
            hasher().verify("x", "not-a-phc-string"),
            Err(PasswordError::InvalidHashFormat)
        ));
    }

    #[test]
    fn test_invalid_params() {
        assert!(matches!(
            PasswordHasher::new(1, 1, 1),
            Err(PasswordError::InvalidParams(_))
        ));
    }

    #[test]
    fn test_strength_policy() {
        assert!(validate_password_strength("Abcdef1!").is_ok());
        assert!(validate_password_strength("Ab1!").is_err());
        assert!(validate_password_strength("abcdefg1!").is_err());
        assert!(validate_password_strength("ABCDEFG1!").is_err());
        assert!(validate_password_strength("Abcdefgh!").is_err());
        assert!(validate_password_strength("Abcdefgh1").is_err());
    }
}
