//! Security audit logging for authentication events
//!
//! Every event is logged at INFO with the `audit` target so it can be
//! routed separately from application logs. Events carry the client IP and
//! user agent when known, and never contain raw tokens or passwords; tokens
//! appear only as fingerprints.
//!
//! # Example
//!
//! ```ignore
//! use scribe_api::audit::{audit_log, AuditEvent, RequestContext};
//!
//! audit_log(&AuditEvent::LoginFailure {
//!     identifier: "alice".to_string(),
//!     reason: "bad password".to_string(),
//!     context: RequestContext::default(),
//! });
//! ```

use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

/// Client details attached to audit events
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl RequestContext {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self {
            ip_address: extract_ip_address(headers),
            user_agent: extract_user_agent(headers),
        }
    }
}

/// Security audit events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum AuditEvent {
    LoginSuccess {
        user_id: Uuid,
        username: String,
        #[serde(flatten)]
        context: RequestContext,
    },

    LoginFailure {
        /// Username or email as presented
        identifier: String,
        reason: String,
        #[serde(flatten)]
        context: RequestContext,
    },

    RegistrationSuccess {
        user_id: Uuid,
        username: String,
        role: String,
        #[serde(flatten)]
        context: RequestContext,
    },

    RegistrationFailure {
        username: String,
        reason: String,
        #[serde(flatten)]
        context: RequestContext,
    },

    /// Refresh token redeemed for a new pair
    TokenRefresh {
        user_id: Uuid,
        username: String,
        #[serde(flatten)]
        context: RequestContext,
    },

    /// A refresh token was presented again after rotation
    RefreshTokenReplay {
        token_fingerprint: String,
        #[serde(flatten)]
        context: RequestContext,
    },

    Logout {
        user_id: Uuid,
        username: String,
        access_token_revoked: bool,
        #[serde(flatten)]
        context: RequestContext,
    },

    InvalidToken {
        reason: String,
        #[serde(flatten)]
        context: RequestContext,
    },

    RateLimitExceeded {
        operation: String,
        actor: String,
        #[serde(flatten)]
        context: RequestContext,
    },

    /// Privileged: every revocation wiped
    RevocationsCleared {
        admin_id: Uuid,
        removed: u64,
        #[serde(flatten)]
        context: RequestContext,
    },

    /// Privileged: a single revocation lifted
    TokenUnrevoked {
        admin_id: Uuid,
        token_fingerprint: String,
        existed: bool,
        #[serde(flatten)]
        context: RequestContext,
    },
}

impl AuditEvent {
    fn summary(&self) -> &'static str {
        match self {
            AuditEvent::LoginSuccess { .. } => "Login successful",
            AuditEvent::LoginFailure { .. } => "Login failed",
            AuditEvent::RegistrationSuccess { .. } => "Registration successful",
            AuditEvent::RegistrationFailure { .. } => "Registration failed",
            AuditEvent::TokenRefresh { .. } => "Token refresh",
            AuditEvent::RefreshTokenReplay { .. } => "Revoked refresh token presented",
            AuditEvent::Logout { .. } => "User logout",
            AuditEvent::InvalidToken { .. } => "Invalid token",
            AuditEvent::RateLimitExceeded { .. } => "Rate limit exceeded",
            AuditEvent::RevocationsCleared { .. } => "All revocations cleared",
            AuditEvent::TokenUnrevoked { .. } => "Token revocation removed",
        }
    }

    fn context(&self) -> &RequestContext {
        match self {
            AuditEvent::LoginSuccess { context, .. }
            | AuditEvent::LoginFailure { context, .. }
            | AuditEvent::RegistrationSuccess { context, .. }
            | AuditEvent::RegistrationFailure { context, .. }
            | AuditEvent::TokenRefresh { context, .. }
            | AuditEvent::RefreshTokenReplay { context, .. }
            | AuditEvent::Logout { context, .. }
            | AuditEvent::InvalidToken { context, .. }
            | AuditEvent::RateLimitExceeded { context, .. }
            | AuditEvent::RevocationsCleared { context, .. }
            | AuditEvent::TokenUnrevoked { context, .. } => context,
        }
    }

    /// Admin-initiated events
    pub fn is_privileged(&self) -> bool {
        matches!(
            self,
            AuditEvent::RevocationsCleared { .. } | AuditEvent::TokenUnrevoked { .. }
        )
    }
}

/// Log a security audit event
///
/// The whole event is serialized to JSON in the `event` field for log
/// aggregators; the client IP is also logged as its own field.
pub fn audit_log(event: &AuditEvent) {
    let event_json = serde_json::to_string(event)
        .unwrap_or_else(|e| format!("{{\"error\":\"Failed to serialize audit event: {e}\"}}"));

    info!(
        target: "audit",
        event = %event_json,
        privileged = event.is_privileged(),
        ip_address = ?event.context().ip_address,
        "{}",
        event.summary()
    );
}

/// Extract the client IP from proxy headers
///
/// Checks `X-Forwarded-For` (first hop), then `X-Real-IP`.
pub fn extract_ip_address(headers: &HeaderMap) -> Option<String> {
    if let Some(first) = headers
        .get("x-forwarded-for")
        .and_then(|xff| xff.to_str().ok())
        .and_then(|xff| xff.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
    {
        return Some(first.to_string());
    }

    headers
        .get("x-real-ip")
        .and_then(|ip| ip.to_str().ok())
        .map(|ip| ip.trim().to_string())
}

pub fn extract_user_agent(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|ua| ua.to_str().ok())
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> RequestContext {
        RequestContext {
            ip_address: Some("192.0.2.10".to_string()),
            user_agent: Some("test-agent".to_string()),
        }
    }

    #[test]
    fn test_event_serialization_is_flat_and_tagged() {
        let event = AuditEvent::LoginSuccess {
            user_id: Uuid::new_v4(),
            username: "alice".to_string(),
            context: context(),
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event_type"], "login_success");
        assert_eq!(json["username"], "alice");
        assert_eq!(json["ip_address"], "192.0.2.10");
        assert_eq!(json["user_agent"], "test-agent");
    }

    #[test]
    fn test_privileged_events() {
        let cleared = AuditEvent::RevocationsCleared {
            admin_id: Uuid::new_v4(),
            removed: 3,
            context: context(),
        };
        let refresh = AuditEvent::TokenRefresh {
            user_id: Uuid::new_v4(),
            username: "bob".to_string(),
            context: context(),
        };

        assert!(cleared.is_privileged());
        assert!(!refresh.is_privileged());
        audit_log(&cleared);
        audit_log(&refresh);
    }

    #[test]
    fn test_extract_ip_from_x_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            "203.0.113.1, 198.51.100.1".parse().unwrap(),
        );
        assert_eq!(extract_ip_address(&headers), Some("203.0.113.1".to_string()));
    }

    #[test]
    fn test_extract_ip_from_x_real_ip() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", "203.0.113.7".parse().unwrap());
        assert_eq!(extract_ip_address(&headers), Some("203.0.113.7".to_string()));
    }

    #[test]
    fn test_request_context_from_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::USER_AGENT, "curl/8".parse().unwrap());

        let ctx = RequestContext::from_headers(&headers);
        assert_eq!(ctx.ip_address, None);
        assert_eq!(ctx.user_agent.as_deref(), Some("curl/8"));
    }
}
