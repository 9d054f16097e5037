//! Scribe Configuration Management
//!
//! Handles configuration from environment variables and TOML files
//! with sensible defaults for development.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

const DEV_ACCESS_SECRET: &str = "development-access-secret-change-in-production";
const DEV_REFRESH_SECRET: &str = "development-refresh-secret-change-in-production";

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Server configuration
    pub server: ServerConfig,

    /// Token issuance configuration
    pub auth: AuthConfig,

    /// Revocation store backend
    pub revocation: RevocationConfig,

    /// Per-operation rate limits
    pub rate_limits: RateLimitConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Load from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::FileReadError {
            path: path.clone(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path,
            message: e.to_string(),
        })
    }

    /// Merge with environment variables (env takes precedence)
    pub fn with_env_override(mut self) -> Result<Self, ConfigError> {
        self.apply_env()?;
        Ok(self)
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        // Server
        if let Ok(host) = std::env::var("API_HOST") {
            self.server.host = host;
        }
        if let Some(port) = parse_env("API_PORT")? {
            self.server.port = port;
        }
        if let Ok(origins) = std::env::var("CORS_ORIGINS") {
            self.server.cors_origins = origins
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }

        // Tokens
        if let Ok(secret) = std::env::var("JWT_SECRET") {
            self.auth.access_secret = secret;
        }
        if let Ok(secret) = std::env::var("JWT_REFRESH_SECRET") {
            self.auth.refresh_secret = secret;
        }
        if let Some(ttl) = parse_env("JWT_ACCESS_EXPIRATION_SECS")? {
            self.auth.access_ttl_secs = ttl;
        }
        if let Some(ttl) = parse_env("JWT_REFRESH_EXPIRATION_SECS")? {
            self.auth.refresh_ttl_secs = ttl;
        }
        if let Ok(issuer) = std::env::var("JWT_ISSUER") {
            self.auth.issuer = issuer;
        }

        // Revocation store
        if let Ok(backend) = std::env::var("REVOCATION_BACKEND") {
            self.revocation.backend = backend.parse()?;
        }
        if let Ok(url) = std::env::var("DATABASE_URL") {
            self.revocation.postgres_url = url;
        }
        if let Some(timeout) = parse_env("REVOCATION_TIMEOUT_MS")? {
            self.revocation.operation_timeout_ms = timeout;
        }

        // Rate limits: RATE_LIMIT_<TAG>=<max>/<window_secs>
        for (tag, rule) in self.rate_limits.rules.iter_mut() {
            let key = format!("RATE_LIMIT_{}", tag.to_uppercase());
            if let Ok(value) = std::env::var(&key) {
                *rule = RateLimitRule::parse(&key, &value)?;
            }
        }
        if let Some(secs) = parse_env("RATE_LIMIT_SWEEP_SECS")? {
            self.rate_limits.sweep_interval_secs = secs;
        }

        // Logging
        if let Ok(level) = std::env::var("LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(json) = parse_env("LOG_JSON")? {
            self.logging.json_format = json;
        }

        Ok(())
    }

    /// Reject configurations that would weaken token handling
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.auth.access_secret.is_empty() {
            return Err(ConfigError::MissingRequired("JWT_SECRET".to_string()));
        }
        if self.auth.refresh_secret.is_empty() {
            return Err(ConfigError::MissingRequired("JWT_REFRESH_SECRET".to_string()));
        }
        if self.auth.access_secret == self.auth.refresh_secret {
            return Err(ConfigError::InvalidValue {
                key: "JWT_REFRESH_SECRET".to_string(),
                value: "<must differ from JWT_SECRET>".to_string(),
            });
        }
        if self.auth.access_ttl_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "JWT_ACCESS_EXPIRATION_SECS".to_string(),
                value: "0".to_string(),
            });
        }
        if self.auth.refresh_ttl_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "JWT_REFRESH_EXPIRATION_SECS".to_string(),
                value: "0".to_string(),
            });
        }
        for (tag, rule) in &self.rate_limits.rules {
            if rule.max_requests == 0 || rule.window_secs == 0 {
                return Err(ConfigError::InvalidValue {
                    key: format!("rate_limits.rules.{tag}"),
                    value: format!("{}/{}", rule.max_requests, rule.window_secs),
                });
            }
        }
        if self.revocation.backend == RevocationBackend::Postgres
            && self.revocation.postgres_url.is_empty()
        {
            return Err(ConfigError::MissingRequired("DATABASE_URL".to_string()));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(key) {
        Ok(value) => value
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value,
            }),
        Err(_) => Ok(None),
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Request timeout in seconds
    pub request_timeout_secs: u64,

    /// Allowed origins for CORS
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            request_timeout_secs: 30,
            cors_origins: vec![],
        }
    }
}

/// Token issuance configuration
///
/// Access and refresh tokens are signed with distinct HMAC secrets.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Secret for access tokens
    pub access_secret: String,

    /// Secret for refresh tokens (must differ from `access_secret`)
    pub refresh_secret: String,

    /// Access token lifetime in seconds
    pub access_ttl_secs: u64,

    /// Refresh token lifetime in seconds
    pub refresh_ttl_secs: u64,

    /// Issuer tag written into and required from every token
    pub issuer: String,

    /// Argon2 memory cost in KiB
    pub password_memory_cost: u32,

    /// Argon2 iterations
    pub password_time_cost: u32,

    /// Argon2 lanes
    pub password_parallelism: u32,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            access_secret: DEV_ACCESS_SECRET.to_string(),
            refresh_secret: DEV_REFRESH_SECRET.to_string(),
            access_ttl_secs: 3600,       // 1 hour
            refresh_ttl_secs: 7 * 86400, // 7 days
            issuer: "scribe".to_string(),
            password_memory_cost: 65536, // 64 MB
            password_time_cost: 3,
            password_parallelism: 4,
        }
    }
}

/// Where revocation entries live
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RevocationBackend {
    Memory,
    Postgres,
}

impl std::str::FromStr for RevocationBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            _ => Err(ConfigError::InvalidValue {
                key: "REVOCATION_BACKEND".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for RevocationBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Memory => f.write_str("memory"),
            Self::Postgres => f.write_str("postgres"),
        }
    }
}

/// Revocation store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RevocationConfig {
    /// Backing key-value store
    pub backend: RevocationBackend,

    /// PostgreSQL connection URL (postgres backend only)
    pub postgres_url: String,

    /// PostgreSQL connection pool size
    pub pool_size: u32,

    /// Upper bound for a single store call; slower calls count as failures
    pub operation_timeout_ms: u64,
}

impl Default for RevocationConfig {
    fn default() -> Self {
        Self {
            backend: RevocationBackend::Memory,
            postgres_url: String::new(),
            pool_size: 10,
            operation_timeout_ms: 500,
        }
    }
}

/// A fixed-window limit: at most `max_requests` per `window_secs`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitRule {
    pub max_requests: u32,
    pub window_secs: u64,
}

impl RateLimitRule {
    pub const fn new(max_requests: u32, window_secs: u64) -> Self {
        Self {
            max_requests,
            window_secs,
        }
    }

    /// Parse `<max>/<window_secs>`
    fn parse(key: &str, value: &str) -> Result<Self, ConfigError> {
        let invalid = || ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        };
        let (max, window) = value.split_once('/').ok_or_else(invalid)?;
        Ok(Self {
            max_requests: max.trim().parse().map_err(|_| invalid())?,
            window_secs: window.trim().parse().map_err(|_| invalid())?,
        })
    }
}

/// Rate limit table keyed by operation tag
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub rules: BTreeMap<String, RateLimitRule>,

    /// How often stale windows are swept (0 disables the sweeper)
    pub sweep_interval_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        let rules = [
            ("post_creation", RateLimitRule::new(10, 3600)),
            ("comment_creation", RateLimitRule::new(50, 3600)),
            ("reaction", RateLimitRule::new(200, 3600)),
            ("auth", RateLimitRule::new(5, 3600)),
            ("general", RateLimitRule::new(60, 60)),
            ("follow", RateLimitRule::new(20, 3600)),
            ("search", RateLimitRule::new(30, 60)),
            ("upload", RateLimitRule::new(10, 3600)),
        ]
        .into_iter()
        .map(|(tag, rule)| (tag.to_string(), rule))
        .collect();

        Self {
            rules,
            sweep_interval_secs: 300,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// JSON format for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Missing required configuration: {0}")]
    MissingRequired(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.auth.access_ttl_secs, 3600);
        assert_eq!(config.auth.refresh_ttl_secs, 604800);
        assert_eq!(config.revocation.backend, RevocationBackend::Memory);
        assert_eq!(
            config.rate_limits.rules.get("auth"),
            Some(&RateLimitRule::new(5, 3600))
        );
        assert_eq!(config.rate_limits.rules.len(), 8);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_identical_secrets_rejected() {
        let mut config = AppConfig::default();
        config.auth.refresh_secret = config.auth.access_secret.clone();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_zero_window_rejected() {
        let mut config = AppConfig::default();
        config
            .rate_limits
            .rules
            .insert("search".to_string(), RateLimitRule::new(30, 0));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_postgres_backend_requires_url() {
        let mut config = AppConfig::default();
        config.revocation.backend = RevocationBackend::Postgres;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingRequired(_))
        ));
    }

    #[test]
    fn test_backend_parse() {
        assert_eq!(
            "memory".parse::<RevocationBackend>().unwrap(),
            RevocationBackend::Memory
        );
        assert_eq!(
            "PostgreSQL".parse::<RevocationBackend>().unwrap(),
            RevocationBackend::Postgres
        );
        assert!("redis".parse::<RevocationBackend>().is_err());
    }

    #[test]
    fn test_env_overrides() {
        temp_env::with_vars(
            [
                ("JWT_ACCESS_EXPIRATION_SECS", Some("900")),
                ("RATE_LIMIT_SEARCH", Some("5/10")),
                ("REVOCATION_TIMEOUT_MS", Some("250")),
            ],
            || {
                let config = AppConfig::from_env().unwrap();
                assert_eq!(config.auth.access_ttl_secs, 900);
                assert_eq!(
                    config.rate_limits.rules.get("search"),
                    Some(&RateLimitRule::new(5, 10))
                );
                assert_eq!(config.revocation.operation_timeout_ms, 250);
            },
        );
    }

    #[test]
    fn test_env_invalid_value() {
        temp_env::with_var("RATE_LIMIT_AUTH", Some("five-per-hour"), || {
            assert!(matches!(
                AppConfig::from_env(),
                Err(ConfigError::InvalidValue { .. })
            ));
        });
    }

    #[test]
    fn test_toml_partial_file() {
        let parsed: AppConfig = toml::from_str(
            r#"
            [auth]
            access_ttl_secs = 120

            [rate_limits.rules.upload]
            max_requests = 3
            window_secs = 60
            "#,
        )
        .unwrap();
        assert_eq!(parsed.auth.access_ttl_secs, 120);
        assert_eq!(parsed.auth.issuer, "scribe");
        assert_eq!(
            parsed.rate_limits.rules.get("upload"),
            Some(&RateLimitRule::new(3, 60))
        );
    }
}
